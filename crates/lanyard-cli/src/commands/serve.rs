//! Serve command - run the HTTP server.

use std::path::PathBuf;

use anyhow::Result;
use lanyard_core::config::{BindMode, Config};

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port to listen on.
    pub port: Option<u16>,
    /// Bind mode or address.
    pub bind: Option<String>,
    /// Database directory.
    pub data_dir: Option<PathBuf>,
    /// Start even if the port looks busy.
    pub force: bool,
}

/// Map a `--bind` value onto a bind mode.
fn parse_bind(bind: &str) -> BindMode {
    match bind {
        "local" | "loopback" => BindMode::Local,
        "public" | "lan" => BindMode::Public,
        addr => BindMode::Custom(addr.to_string()),
    }
}

/// Start the server.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = Config::load_default()?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind.as_deref() {
        config.server.mode = parse_bind(bind);
    }
    if let Some(dir) = args.data_dir {
        config.server.data_dir = Some(dir);
    }

    let host = config.server.bind_host().to_string();
    let port = config.server.port;

    if !args.force && std::net::TcpListener::bind((host.as_str(), port)).is_err() {
        ui::error(&format!(
            "Port {port} is already in use. Use --force to override."
        ));
        return Ok(());
    }

    ui::header("Starting Lanyard");
    ui::kv("Address", &format!("{host}:{port}"));
    ui::kv("Data", &config.data_dir().display().to_string());
    ui::kv(
        "Registration",
        if config.registration.enabled { "open" } else { "closed" },
    );
    ui::kv(
        "Discord login",
        if config.discord.oauth.is_some() { "enabled" } else { "disabled" },
    );
    if config.session.secret.is_none() {
        ui::warning("No session secret configured; sessions will not survive a restart");
        ui::info("Run 'lanyard config init' to create one");
    }
    println!();
    ui::info("Press Ctrl+C to stop");

    lanyard_gateway::start(config).await?;

    Ok(())
}
