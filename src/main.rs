use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use aigen_client::config::{ClientConfig, ConfigError, normalize_base_url};
use aigen_client::error::{CredentialError, StorageError, TransportError};
use aigen_client::net::transport::{ReqwestBackend, TransportGuard};
use aigen_client::state::gate::{ACCESS_DENIED_TITLE, GateView, Requirement};
use aigen_client::state::session::{SessionState, SessionStore};
use aigen_client::storage::FileCredentialStore;
use aigen_client::util::auth::{Navigator, spawn_invalidation_listener};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not load .env: {0}")]
    DotEnv(#[from] dotenvy::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("credential accepted, but the account could not be loaded; try again")]
    SessionNotEstablished,
    #[error("{title}: {message}")]
    Denied { title: &'static str, message: &'static str },
}

#[derive(Parser, Debug)]
#[command(name = "aigen", about = "Session client for the AI image generation API")]
struct Cli {
    #[arg(long, env = "AIGEN_API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "AIGEN_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[arg(long, env = "AIGEN_LOGOUT_POLICY", help = "any_failure or auth_failure")]
    logout_policy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login(CredentialArgs),
    Register(CredentialArgs),
    Logout,
    Whoami,
    Admin,
}

#[derive(Args, Debug)]
struct CredentialArgs {
    #[arg(long)]
    email: String,

    #[arg(long, env = "AIGEN_PASSWORD", hide_env_values = true)]
    password: String,
}

/// Terminal stand-in for navigating to the sign-in page.
struct CliNavigator;

impl Navigator for CliNavigator {
    fn redirect_to_login(&self) {
        eprintln!("session expired; run `aigen login` to sign in again");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let credentials = match &config.state_dir {
        Some(dir) => FileCredentialStore::new(dir, &config.api_base_url),
        None => FileCredentialStore::in_default_dir(&config.api_base_url)?,
    };
    let backend = ReqwestBackend::new(config.api_base_url.clone(), config.timeouts)?;
    tracing::debug!(
        base_url = backend.base_url(),
        credential_file = %credentials.path().display(),
        "client ready"
    );
    let guard = TransportGuard::new(Arc::new(backend), Arc::new(credentials));
    let listener = spawn_invalidation_listener(guard.subscribe(), Arc::new(CliNavigator));
    let store = SessionStore::new(guard, config.logout_policy);

    let result = match cli.command {
        Command::Login(args) => {
            let state = store.login(&args.email, &args.password).await?;
            print_account(&state)
        }
        Command::Register(args) => {
            let state = store.register(&args.email, &args.password).await?;
            print_account(&state)
        }
        Command::Logout => {
            store.logout();
            println!("logged out");
            Ok(())
        }
        Command::Whoami => {
            rehydrate(&store).await;
            let state = store.snapshot();
            match &state.profile {
                Some(profile) => {
                    println!("{} (id {})", profile.email, profile.id);
                    println!("credits: {}", profile.credit_balance);
                    println!("admin: {}", state.is_admin());
                }
                None => println!("not logged in"),
            }
            Ok(())
        }
        Command::Admin => {
            rehydrate(&store).await;
            check_admin(store.gate(Requirement::Admin).current())
        }
    };

    // Closing the store drops the guard, which ends the listener after it
    // has drained any pending invalidation.
    drop(store);
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "invalidation listener failed");
    }
    result
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.base_url {
        config.api_base_url = normalize_base_url(url);
    }
    if let Some(dir) = &cli.state_dir {
        config.state_dir = Some(dir.clone());
    }
    if let Some(policy) = &cli.logout_policy {
        config.logout_policy = policy.parse()?;
    }
    tracing::debug!(policy = ?config.logout_policy, "client config resolved");
    Ok(config)
}

async fn rehydrate(store: &SessionStore) {
    if let Err(e) = store.rehydrate().await {
        tracing::warn!(cause = %e.cause(), "stored session could not be restored");
    }
}

fn print_account(state: &SessionState) -> Result<(), CliError> {
    let Some(profile) = &state.profile else {
        return Err(CliError::SessionNotEstablished);
    };
    println!("logged in as {}", profile.email);
    println!("credits: {}", profile.credit_balance);
    Ok(())
}

fn check_admin(view: GateView) -> Result<(), CliError> {
    if view.is_authorized() {
        println!("admin access granted");
        return Ok(());
    }
    if let Some(path) = view.redirect_path() {
        tracing::debug!(?view, path, "admin gate denied");
    }
    Err(CliError::Denied {
        title: view.title().unwrap_or(ACCESS_DENIED_TITLE),
        message: view.message().unwrap_or("session still loading"),
    })
}
