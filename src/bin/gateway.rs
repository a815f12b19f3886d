use clap::Parser;
use edoreczenia_gateway::config::{hash_password, GatewayConfig};
use edoreczenia_gateway::logging;
use edoreczenia_gateway::server::Application;
use log::{error, info};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// IMAP/SMTP gateway for an e-Doręczenia mailbox
#[derive(Debug, Parser)]
#[command(name = "edoreczenia-gateway", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Read a password from stdin and print its Argon2id hash
    #[arg(long)]
    hash_password: bool,

    /// Print a sample configuration file
    #[arg(long)]
    sample_config: bool,
}

fn hash_password_from_stdin() -> ExitCode {
    print!("Enter password: ");
    let _ = io::stdout().flush();

    let mut password = String::new();
    if let Err(e) = io::stdin().lock().read_line(&mut password) {
        eprintln!("Error reading password: {}", e);
        return ExitCode::FAILURE;
    }
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        eprintln!("Error: Password cannot be empty");
        return ExitCode::FAILURE;
    }

    match hash_password(password) {
        Ok(hash) => {
            println!();
            println!("Add this to your config.toml under [auth]:");
            println!("password_hash = \"{}\"", hash);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.hash_password {
        return hash_password_from_stdin();
    }
    if cli.sample_config {
        println!("{}", GatewayConfig::sample());
        return ExitCode::SUCCESS;
    }

    let config = match GatewayConfig::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.logging, cli.verbose);
    info!("Loaded configuration from {}", cli.config.display());

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let app = match Application::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Gateway failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
