use anyhow::Result;
use clap::{Parser, Subcommand};

use dojo::config::Config;
use dojo::server::rest::auth::{issue_token, Role};
use dojo::server::rest::server::run_server;
use dojo::shared::logging;

#[derive(Parser)]
#[command(name = "dojo")]
#[command(about = "Dojo - sandboxed training platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator (API server, proxy and lifecycle machinery)
    Serve {
        /// Host to bind the API server to
        #[arg(short = 'H', long, default_value = "0.0.0.0")]
        host: String,

        /// Port for the API server
        #[arg(short, long, default_value = "9000", env = "DOJO_PORT")]
        port: u16,
    },

    /// Mint a bearer token for local development and operations
    Token {
        /// Subject the token authenticates as
        #[arg(long)]
        subject: String,

        /// Grant the admin role
        #[arg(long)]
        admin: bool,

        /// Token lifetime in hours
        #[arg(long, default_value = "24")]
        expires_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = logging::init_logging("./logs", "dojo");

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port: 9000,
    });

    match command {
        Commands::Serve { host, port } => {
            run_server(&host, port).await?;
        }
        Commands::Token {
            subject,
            admin,
            expires_hours,
        } => {
            dotenvy::dotenv().ok();
            let config = Config::from_env();
            let role = if admin { Role::Admin } else { Role::User };
            let token = issue_token(&subject, role, &config.jwt_secret, expires_hours)?;
            println!("{token}");
        }
    }

    Ok(())
}
