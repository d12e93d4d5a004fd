use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use reqwest::Method;
use std::sync::Arc;

use travelquest_client::auth::SqliteCredentialStore;
use travelquest_client::config::{CliArgs, Command, Config};
use travelquest_client::{ApiClient, SessionEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        api_url = %config.api_url,
        session_db = %config.session_db.display(),
        "Configuration loaded"
    );

    let store = Arc::new(SqliteCredentialStore::open(&config.session_db)?);
    let client = ApiClient::new(&config.api_url, store, config.client_settings())?;
    let mut events = client.session_events();

    let result = run(&client, args.command).await;

    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Terminated { reason } = event {
            tracing::debug!(reason = ?reason, "Session ended");
            eprintln!("Session ended, sign in again with `travelquest-client login <email>`");
        }
    }

    result
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            client.login(&email, &password).await?;
            println!("Logged in as {}", email);
        }

        Command::Logout => {
            client.logout();
            println!("Logged out");
        }

        Command::Status => {
            if !client.is_logged_in() {
                println!("Not logged in ({})", client.base_url());
                return Ok(());
            }

            let user = client.current_user().await?;
            println!("Logged in to {}", client.base_url());
            println!("{}", serde_json::to_string_pretty(&user)?);
        }

        Command::Get { path } => {
            let response = client.send(client.request(Method::GET, &path)).await?;
            print_body(response).await?;
        }

        Command::Send { method, path, data } => {
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("Invalid HTTP method: {}", method))?;

            let mut builder = client.request(method, &path);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data must be valid JSON")?;
                builder = builder.json(&body);
            }

            let response = client.send(builder).await?;
            print_body(response).await?;
        }
    }

    Ok(())
}

/// Print a response body, pretty-printing JSON
async fn print_body(response: reqwest::Response) -> Result<()> {
    let body = response.text().await.context("Failed to read response body")?;

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", body),
    }

    Ok(())
}
