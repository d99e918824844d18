//! Army Command CLI - sign in, sign out, and watch the session.
//!
//! # Usage
//!
//! ```bash
//! # Sign in with a service number (password from ARMY_COMMAND_PASSWORD)
//! ac-cli login -s 2470-0001
//!
//! # Create an account
//! ac-cli register -s 2470-0001 --password hunter22
//!
//! # Show who is signed in
//! ac-cli status
//!
//! # Print every session change until Ctrl-C
//! ac-cli watch
//!
//! # Sign out
//! ac-cli logout
//! ```
//!
//! Configuration is read from the environment (see
//! [`army_command_session::config`]). The session survives between
//! invocations in `SESSION_STATE_DIR`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Args, Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use army_command_session::SessionConfig;

mod commands;

#[derive(Parser)]
#[command(name = "ac-cli")]
#[command(author, version, about = "Army Command session tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to an existing account
    Login(AccountArgs),
    /// Create an account and sign in to it
    Register(AccountArgs),
    /// Sign out
    Logout,
    /// Print the resolved session
    Status,
    /// Print every session change until Ctrl-C
    Watch,
}

#[derive(Args)]
struct AccountArgs {
    /// Service number (`DDDD-DDDD`, dashes optional)
    #[arg(short, long, conflicts_with = "email", required_unless_present = "email")]
    service_number: Option<String>,

    /// Email address, for accounts without a service number
    #[arg(short, long)]
    email: Option<String>,

    /// Account password
    #[arg(long, env = "ARMY_COMMAND_PASSWORD", hide_env_values = true)]
    password: String,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &SessionConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "army_command_session=info,army_command_cli=info".into());

    // Session output goes to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() {
    let cli = Cli::parse();

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Login(args) => {
            let credentials = args.into_credentials()?;
            commands::auth::login(&config, credentials).await?;
        }
        Commands::Register(args) => {
            let credentials = args.into_credentials()?;
            commands::auth::register(&config, credentials).await?;
        }
        Commands::Logout => commands::auth::logout(&config).await?,
        Commands::Status => commands::status::status(&config).await?,
        Commands::Watch => commands::status::watch(&config).await?,
    }
    Ok(())
}

impl AccountArgs {
    fn into_credentials(
        self,
    ) -> Result<army_command_session::Credentials, army_command_session::AuthError> {
        use army_command_session::Credentials;
        use secrecy::SecretString;

        let password = SecretString::from(self.password);
        match (self.service_number, self.email) {
            (Some(number), _) => Credentials::service_number(&number, password),
            (None, Some(email)) => Credentials::email(&email, password),
            (None, None) => Err(army_command_session::AuthError::InvalidCredential(
                "a service number or email is required".to_string(),
            )),
        }
    }
}
