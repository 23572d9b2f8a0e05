/*
[INPUT]:  Interactive user input via CLI
[OUTPUT]: Generated YAML configuration file
[POS]:    CLI initialization layer
[UPDATE]: When CliConfig schema changes
*/

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use std::path::PathBuf;

use passage_cli::CliConfig;

pub fn run_init(output: PathBuf) -> Result<()> {
    println!("{}", style("Welcome to Passage").bold().cyan());
    println!(
        "{}",
        style("This will create a configuration file for the passage CLI.").dim()
    );

    let theme = ColorfulTheme::default();
    let defaults = CliConfig::default();

    if output.exists() {
        let overwrite = Confirm::with_theme(&theme)
            .with_prompt(format!("{} exists. Overwrite?", output.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            return Ok(());
        }
    }

    let base_url: String = Input::with_theme(&theme)
        .with_prompt("Identity service URL")
        .default(defaults.base_url.clone())
        .interact_text()?;

    let timeout_secs: u64 = Input::with_theme(&theme)
        .with_prompt("Request timeout (seconds)")
        .default(defaults.timeout_secs)
        .interact_text()?;

    let storage_dir: String = Input::with_theme(&theme)
        .with_prompt("Session storage directory (empty for platform default)")
        .allow_empty(true)
        .interact_text()?;

    let config = CliConfig {
        base_url,
        timeout_secs,
        storage_dir: Some(storage_dir.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from),
        ..defaults
    };

    let yaml = config.to_yaml()?;
    std::fs::write(&output, yaml).with_context(|| format!("write {}", output.display()))?;

    println!(
        "\n{} {}",
        style("Configuration written to").green(),
        style(output.display()).bold()
    );
    Ok(())
}
