//! dowhile - sign in to DoWhile with GitHub from the terminal.
//!
//! Commands:
//! - `dowhile login-url`       print the GitHub authorize URL
//! - `dowhile callback <url>`  finish sign-in with the URL GitHub redirected to
//! - `dowhile whoami`          show the signed-in user
//! - `dowhile logout`          forget the stored session

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dowhile_core::auth::{AuthSession, MemoryHistory, SessionState};
use dowhile_core::Config;

/// Location reported when no callback URL was given
const IDLE_LOCATION: &str = "dowhile://cli/";

const USAGE: &str = "Usage: dowhile <login-url | callback <url> | whoami | logout>";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    let config = Config::load()?;
    debug!(api = %config.api_base_url, storage = ?config.storage, "Config loaded");

    match command {
        Some("login-url") => {
            println!("{}", config.sign_in_url()?);
            Ok(())
        }
        Some("callback") => {
            let url = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing callback URL\n{}", USAGE))?;
            complete_callback(&config, url).await
        }
        Some("whoami") => whoami(&config).await,
        Some("logout") => logout(&config),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn open_session(config: &Config, location: &str) -> Result<AuthSession> {
    let storage = config.open_storage()?;
    let history = Arc::new(MemoryHistory::new(location));
    let mut session = AuthSession::start(config, storage, history)
        .context("Failed to start auth session")?;
    session.settle().await;
    Ok(session)
}

async fn complete_callback(config: &Config, url: &str) -> Result<()> {
    let session = open_session(config, url).await?;
    let state = session.state();
    if !state.is_signed_in() {
        match state.error {
            Some(ref err) => anyhow::bail!("{}", err),
            None => anyhow::bail!("No OAuth code found in {}", url),
        }
    }
    info!("Sign-in complete");
    print_state(&state);
    Ok(())
}

async fn whoami(config: &Config) -> Result<()> {
    let session = open_session(config, IDLE_LOCATION).await?;
    let state = session.state();
    if let Some(ref err) = state.error {
        eprintln!("{}", err);
    }
    print_state(&state);
    Ok(())
}

fn logout(config: &Config) -> Result<()> {
    let session = AuthSession::new(config, config.open_storage()?, Arc::new(MemoryHistory::new(IDLE_LOCATION)))
        .context("Failed to create auth session")?;
    session.sign_out();
    println!("Signed out.");
    Ok(())
}

fn print_state(state: &SessionState) {
    match state.user {
        Some(ref user) => {
            println!("Signed in as {} (@{})", user.display_name(), user.login);
            println!("Avatar: {}", user.avatar_url);
        }
        None => {
            println!("Not signed in. Open this URL to sign in with GitHub:");
            println!("{}", state.sign_in_url);
        }
    }
}
