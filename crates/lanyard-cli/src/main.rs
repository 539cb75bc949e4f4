//! Lanyard CLI - run and administer the identity provider.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "lanyard")]
#[command(about = "Lanyard - sign in as several users at once")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "LANYARD_PORT")]
        port: Option<u16>,

        /// Bind address (local, public, or an IP)
        #[arg(long)]
        bind: Option<String>,

        /// Directory for the user and session databases
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Start even if the port looks busy
        #[arg(long)]
        force: bool,
    },

    /// Check whether a server is running
    Status,

    /// Manage user accounts
    Users {
        #[command(subcommand)]
        action: UserCommands,

        /// Data directory override
        #[arg(long, global = true)]
        data_dir: Option<PathBuf>,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a local account
    Create {
        /// Username for the new user
        #[arg(long)]
        username: String,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,

        /// Generate a random password
        #[arg(long, conflicts_with = "password")]
        generate_password: bool,
    },

    /// List all users
    List,

    /// Reset a user's password
    ResetPassword {
        /// Username of the user
        #[arg(long)]
        username: String,
    },

    /// Show one user
    Show {
        /// Username of the user
        #[arg(long)]
        username: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration, secrets redacted
    Show,

    /// Print the config file path
    Path,

    /// Write a default config file with a fresh session secret
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let Some(command) = cli.command else {
        ui::banner();
        ui::info("Run 'lanyard serve' to start, or 'lanyard --help' for all commands.");
        return Ok(());
    };

    match command {
        Commands::Serve {
            port,
            bind,
            data_dir,
            force,
        } => {
            let args = commands::serve::ServeArgs {
                port,
                bind,
                data_dir,
                force,
            };
            commands::run_serve(args).await?;
        }

        Commands::Status => {
            commands::run_status().await?;
        }

        Commands::Users { action, data_dir } => {
            let args = commands::users::UsersArgs {
                action: match action {
                    UserCommands::Create {
                        username,
                        email,
                        password,
                        generate_password,
                    } => commands::users::UsersAction::Create {
                        username,
                        email,
                        password,
                        generate_password,
                    },
                    UserCommands::List => commands::users::UsersAction::List,
                    UserCommands::ResetPassword { username } => {
                        commands::users::UsersAction::ResetPassword { username }
                    }
                    UserCommands::Show { username } => {
                        commands::users::UsersAction::Show { username }
                    }
                },
                data_dir,
            };
            commands::run_users(args).await?;
        }

        Commands::Config { action } => {
            let action = match action {
                Some(ConfigCommands::Path) => commands::config::ConfigAction::Path,
                Some(ConfigCommands::Init { force }) => {
                    commands::config::ConfigAction::Init { force }
                }
                Some(ConfigCommands::Show) | None => commands::config::ConfigAction::Show,
            };
            commands::run_config(action)?;
        }
    }

    Ok(())
}
