/*
[INPUT]:  CLI arguments, YAML configuration file, PASSAGE_* environment
[OUTPUT]: Identity operations against the configured service, persisted session
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, subcommands or startup flow
*/

mod cli;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use passage_cli::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "passage", version, about = "Passage identity session client")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", global = true)]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a configuration file template
    Init {
        #[arg(long, value_name = "PATH", default_value = "passage.yaml")]
        output: PathBuf,
    },
    /// Sign in with email and password
    Login {
        email: String,
    },
    /// Sign in by signing a challenge with a local EVM key
    WalletLogin {
        #[arg(long = "private-key", env = "PASSAGE_WALLET_KEY", hide_env_values = true)]
        private_key: String,
    },
    /// Create an account: email code, then profile
    Register {
        email: Option<String>,
    },
    /// Show the signed-in user
    Profile,
    /// Refresh the access token and re-fetch the profile
    Refresh,
    /// Sign out and forget the stored session
    Logout,
    /// Reset a forgotten password with an emailed code
    ResetPassword {
        email: String,
    },
    /// Link the signed-in wallet session to an email identity
    LinkWallet {
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    if let Command::Init { output } = &args.command {
        return cli::init::run_init(output.clone());
    }

    let config = CliConfig::load(args.config_path.as_deref()).context("load config")?;
    debug!(base_url = %config.base_url, "configuration loaded");
    let app = cli::commands::App::open(config)?;

    let result = match args.command {
        Command::Init { .. } => Ok(()),
        Command::Login { email } => cli::commands::login(&app, &email).await,
        Command::WalletLogin { private_key } => cli::commands::wallet_login(&app, &private_key).await,
        Command::Register { email } => cli::commands::register(&app, email).await,
        Command::Profile => cli::commands::profile(&app).await,
        Command::Refresh => cli::commands::refresh(&app).await,
        Command::Logout => cli::commands::logout(&app).await,
        Command::ResetPassword { email } => cli::commands::reset_password(&app, &email).await,
        Command::LinkWallet { email } => cli::commands::link_wallet(&app, &email).await,
    };

    result.map_err(cli::commands::explain)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}
