/*
[INPUT]:  Parsed subcommands, CLI configuration and interactive input
[OUTPUT]: Session operations with a file-backed token and terminal output
[POS]:    CLI command layer
[UPDATE]: When adding subcommands or changing their prompts
*/

use anyhow::{Context, Result, anyhow, bail};
use console::style;
use dialoguer::{Input, Password, theme::ColorfulTheme};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use passage_cli::CliConfig;
use passage_client::{
    EvmWalletSigner, FileStorage, LocalWalletProvider, PassageError, RegistrationFlow, Session, SessionState,
    SessionUser, WalletLoginCoordinator, WalletLoginOutcome, WalletSigner,
};

const WALLET_LOGIN_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OTP_ATTEMPTS: usize = 3;

/// Everything a subcommand needs, built once per invocation
pub struct App {
    storage: Arc<FileStorage>,
    session: Session,
    theme: ColorfulTheme,
}

impl App {
    pub fn open(config: CliConfig) -> Result<Self> {
        let dir = config.resolved_storage_dir()?;
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let storage = Arc::new(FileStorage::new(&dir));
        let session = Session::connect(config.client_config(), storage.clone()).context("build session")?;
        Ok(Self {
            storage,
            session,
            theme: ColorfulTheme::default(),
        })
    }

    /// Resolve the stored session, failing when nobody is signed in
    async fn signed_in_user(&self) -> Result<SessionUser> {
        match self.session.initialize().await {
            SessionState::Authenticated(user) => Ok(user),
            _ => bail!("not signed in; run `passage login` or `passage wallet-login` first"),
        }
    }

    fn prompt_password(&self, prompt: &str, confirm: bool) -> Result<String> {
        let mut input = Password::with_theme(&self.theme).with_prompt(prompt);
        if confirm {
            input = input.with_confirmation("Repeat password", "Passwords do not match");
        }
        Ok(input.interact()?)
    }

    fn prompt_text(&self, prompt: &str) -> Result<String> {
        Ok(Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .interact_text()?)
    }
}

pub async fn login(app: &App, email: &str) -> Result<()> {
    let password = app.prompt_password("Password", false)?;
    let outcome = app.session.login(email, &password).await?;
    print_signed_in(&outcome.user);
    Ok(())
}

pub async fn wallet_login(app: &App, private_key: &str) -> Result<()> {
    if let SessionState::Authenticated(user) = app.session.initialize().await {
        println!("{}", style("Already signed in.").yellow());
        print_user(&user);
        return Ok(());
    }

    let signer = EvmWalletSigner::new(private_key)?;
    let address = signer.address().to_string();
    let provider = Arc::new(LocalWalletProvider::new());
    let coordinator = WalletLoginCoordinator::new(app.session.clone(), provider.clone());
    let mut outcomes = coordinator.outcomes();
    let driver = coordinator.spawn();

    info!(address = %address, "connecting local wallet");
    provider.connect(Arc::new(signer));

    let outcome = tokio::time::timeout(WALLET_LOGIN_TIMEOUT, outcomes.recv())
        .await
        .context("timed out waiting for wallet login")?
        .context("wallet login stopped")?;
    driver.abort();

    match outcome {
        WalletLoginOutcome::Authenticated { .. } => {
            let user = app.session.current_user().context("session missing after wallet login")?;
            print_signed_in(&user);
            Ok(())
        }
        WalletLoginOutcome::Cancelled { address } => bail!("signature request for {address} was cancelled"),
        WalletLoginOutcome::Failed { code, message, .. } => match code {
            Some(code) => bail!("{message} ({code})"),
            None => bail!("{message}"),
        },
    }
}

pub async fn register(app: &App, email: Option<String>) -> Result<()> {
    let flow = RegistrationFlow::new(app.session.client().clone(), app.storage.clone());
    let email = match email.or_else(|| flow.pending_email()) {
        Some(email) => email,
        None => app.prompt_text("Email")?,
    };

    let dispatch = flow.send_otp(&email).await?;
    match dispatch.expires_at.as_deref() {
        Some(expires_at) => println!("Verification code sent to {email} (expires {expires_at})."),
        None => println!("Verification code sent to {email}."),
    }

    let mut attempts = 0;
    loop {
        attempts += 1;
        let code = app.prompt_text("Verification code")?;
        match flow.verify_otp(&email, &code).await {
            Ok(_) => break,
            Err(PassageError::Auth(err)) if attempts < MAX_OTP_ATTEMPTS && !err.is_rate_limited() => {
                println!("{}", style(err.user_message()).red());
            }
            Err(err) => return Err(err.into()),
        }
    }

    let full_name = app.prompt_text("Full name")?;
    let password = app.prompt_password("Password", true)?;
    let user = flow.complete(&app.session, &full_name, &password).await?;
    print_signed_in(&user);
    Ok(())
}

pub async fn profile(app: &App) -> Result<()> {
    let user = app.signed_in_user().await?;
    print_user(&user);
    Ok(())
}

pub async fn refresh(app: &App) -> Result<()> {
    app.signed_in_user().await?;
    let user = app.session.refresh_auth().await?;
    println!("{}", style("Access token refreshed.").green());
    print_user(&user);
    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    let was_signed_in = app.session.initialize().await.is_authenticated();
    app.session.logout().await;
    if was_signed_in {
        println!("{}", style("Signed out.").green());
    } else {
        println!("{}", style("No active session; local state cleared.").dim());
    }
    Ok(())
}

pub async fn reset_password(app: &App, email: &str) -> Result<()> {
    app.session.request_password_reset(email).await?;
    println!("If {email} has an account, a reset code is on its way.");

    let code = app.prompt_text("Reset code")?;
    let password = app.prompt_password("New password", true)?;
    app.session.reset_password(email, &code, &password).await?;
    println!("{}", style("Password updated. Sign in with the new password.").green());
    Ok(())
}

pub async fn link_wallet(app: &App, email: &str) -> Result<()> {
    let user = app.signed_in_user().await?;
    let address = user
        .wallet_address
        .clone()
        .filter(|_| user.is_wallet_session())
        .context("link-wallet needs a wallet session; run `passage wallet-login` first")?;

    let outcome = app.session.link_email_to_web3(email, &address).await?;
    println!(
        "{} {:?}",
        style("Identities linked:").green(),
        outcome.link_type
    );
    print_user(&outcome.user);
    Ok(())
}

/// Replace classified identity errors with their user-facing text
pub fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<PassageError>() {
        Some(PassageError::Auth(auth)) => match auth.code.as_deref() {
            Some(code) => anyhow!("{} [{code}]", auth.user_message()),
            None => anyhow!("{}", auth.user_message()),
        },
        Some(PassageError::SessionExpired) => anyhow!("your session has expired; sign in again"),
        _ => err,
    }
}

fn print_signed_in(user: &SessionUser) {
    println!("{}", style("Signed in.").green().bold());
    print_user(user);
}

fn print_user(user: &SessionUser) {
    let label = |name: &str| style(format!("{name:>10}")).dim();
    println!("{} {}", label("id"), user.id);
    if let Some(name) = user.full_name.as_deref() {
        println!("{} {name}", label("name"));
    }
    if let Some(email) = user.email.as_deref() {
        let verified = if user.is_email_verified { "verified" } else { "unverified" };
        println!("{} {email} ({verified})", label("email"));
    }
    if let Some(wallet) = user.wallet_address.as_deref() {
        println!("{} {wallet}", label("wallet"));
    }
    println!("{} {:?}", label("auth"), user.auth_type);
    println!("{} {:?}", label("status"), user.status);
}
