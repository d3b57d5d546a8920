//! dirgate - directory-backed authentication
//!
//! Serves a small HTTP site whose pages are protected by credentials checked
//! against an LDAP directory, and offers offline tooling for the same checks.

use clap::{Parser, Subcommand};
use dirgate_auth::{open_directory, DirectoryAuthenticator};
use dirgate_core::DirgateConfig;
use dirgate_web::DirgateServer;
use std::io::BufRead;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dirgate")]
#[command(version = dirgate_core::VERSION)]
#[command(about = "Directory-backed authentication gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DIRGATE_CONFIG")]
    config: Option<String>,

    /// Bind address
    #[arg(long, env = "DIRGATE_BIND_ADDRESS")]
    bind: Option<String>,

    /// Port number
    #[arg(short, long, env = "DIRGATE_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DIRGATE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server,

    /// Validate the configuration and exit
    Check,

    /// Check a username against the directory; the password is read from stdin
    Verify { username: String },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DirgateConfig::from_file(path).unwrap_or_else(|e| exit_with(e)),
        None => DirgateConfig::from_env(),
    };

    // Override with CLI args
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config);

    match cli.command.unwrap_or(Commands::Server) {
        Commands::Version => {
            println!("dirgate {}", dirgate_core::VERSION);
        }
        Commands::Check => {
            if let Err(e) = config.validate() {
                exit_with(e);
            }
            println!("Configuration OK");
        }
        Commands::Verify { username } => {
            let verdict = verify(&config, &username).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.authenticated {
                std::process::exit(1);
            }
        }
        Commands::Server => {
            info!("Starting dirgate {}", dirgate_core::VERSION);
            info!("Directory: {}", describe_directory(&config));

            if let Err(e) = DirgateServer::new(config).run().await {
                exit_with(e);
            }
        }
    }

    Ok(())
}

fn init_logging(config: &DirgateConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // stdout is reserved for command output
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn describe_directory(config: &DirgateConfig) -> String {
    match &config.directory.ldif {
        Some(path) => format!("LDIF file {}", path.display()),
        None => config.directory.url.clone(),
    }
}

async fn verify(
    config: &DirgateConfig,
    username: &str,
) -> anyhow::Result<dirgate_auth::AuthenticationVerdict> {
    if let Err(e) = config.validate() {
        exit_with(e);
    }

    let mut password = String::new();
    std::io::stdin().lock().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    let directory = open_directory(&config.directory).unwrap_or_else(|e| exit_with(e));
    let authenticator = DirectoryAuthenticator::new(&config.directory, directory)
        .unwrap_or_else(|e| exit_with(e.into()));

    Ok(authenticator.authenticate(username, password).await)
}

fn exit_with(e: dirgate_core::Error) -> ! {
    eprintln!("dirgate: {}", e);
    std::process::exit(e.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_takes_username() {
        let cli = Cli::try_parse_from(["dirgate", "--port", "9000", "verify", "alice"]).unwrap();
        assert_eq!(cli.port, Some(9000));
        assert!(matches!(cli.command, Some(Commands::Verify { username }) if username == "alice"));
    }
}
