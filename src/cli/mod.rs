//! Command-line interface for the gateway
//!
//! `mcpgw serve` runs the HTTP server; `mcpgw apikey generate` mints a
//! bootstrap key against the configured storage; `mcpgw config check`
//! validates a configuration file.

use crate::config::Config;
use crate::model::{ApiKeyInput, User};
use crate::storage::create_repositories;
use crate::{GatewayError, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mcpgw", version, about = "Authenticating multi-tenant gateway for MCP servers")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = crate::constants::CONFIG_FILE_NAME)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway HTTP server
    Serve {
        /// Override the listen host
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// API key management
    Apikey {
        #[command(subcommand)]
        command: ApikeyCommands,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ApikeyCommands {
    /// Mint a key for a user; the plain key is printed exactly once
    Generate {
        /// Email of the owning user (created if missing)
        #[arg(long)]
        user_email: String,
        /// Display name for the key
        #[arg(long, default_value = "bootstrap")]
        name: String,
        /// Comma-separated scopes, e.g. servers:read,servers:execute
        #[arg(long)]
        scopes: Option<String>,
        /// Role granted to the user if it has to be created
        #[arg(long, default_value = crate::constants::ADMIN_ROLE)]
        role: String,
        /// Restrict the key to GET/HEAD/OPTIONS
        #[arg(long)]
        read_only: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Parse and validate the configuration file
    Check,
}

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if host.is_some() || port.is_some() {
                let mut http = config.http();
                if let Some(host) = host {
                    http.host = host;
                }
                if let Some(port) = port {
                    http.port = port;
                }
                config.http = Some(http);
            }
            crate::http::start_server(config).await
        }
        Commands::Apikey {
            command:
                ApikeyCommands::Generate {
                    user_email,
                    name,
                    scopes,
                    role,
                    read_only,
                },
        } => generate_key(&config, &user_email, &name, scopes.as_deref(), &role, read_only).await,
        Commands::Config { command: ConfigCommands::Check } => {
            println!("configuration ok (storage driver: {})", config.storage.driver);
            Ok(())
        }
    }
}

async fn generate_key(
    config: &Config,
    user_email: &str,
    name: &str,
    scopes: Option<&str>,
    role: &str,
    read_only: bool,
) -> Result<()> {
    if config.storage.driver == "memory" {
        return Err(GatewayError::config(
            "apikey generate needs persistent storage; keys minted against \
             the memory backend vanish on exit",
        ));
    }

    let repos = create_repositories(&config.storage).await?;

    let user = match repos.users.by_email(user_email).await? {
        Some(user) => user,
        None => {
            let user = User {
                id: Uuid::new_v4(),
                email: user_email.to_string(),
                name: None,
                is_active: true,
                provider: None,
                external_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            repos.users.create(&user).await?;
            repos.users.assign_role(user.id, role).await?;
            eprintln!("created user {} with role {}", user_email, role);
            user
        }
    };

    let scopes = scopes
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let (record, plain) = repos
        .api_keys
        .create(ApiKeyInput {
            user_id: user.id,
            name: name.to_string(),
            scopes,
            read_only,
            ..Default::default()
        })
        .await?;

    eprintln!("key id: {}", record.id);
    eprintln!("store this key now; it cannot be shown again:");
    println!("{}", plain);
    Ok(())
}
