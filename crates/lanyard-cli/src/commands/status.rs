//! Status command - probe a running server.

use std::time::Duration;

use anyhow::Result;
use lanyard_core::config::Config;

use crate::ui::{self, HealthStatus};

/// Run the status command.
pub async fn run_status() -> Result<()> {
    ui::header("Lanyard Status");

    let config = match Config::load_default() {
        Ok(config) => {
            ui::health_check("Config", HealthStatus::Ok, Some("loaded"));
            config
        }
        Err(e) => {
            ui::health_check("Config", HealthStatus::Error, Some(&e.to_string()));
            Config::default()
        }
    };

    let port = config.server.port;
    match probe_health(port).await {
        Ok(()) => {
            ui::health_check("Server", HealthStatus::Ok, Some(&format!("running on port {port}")));
        }
        Err(e) => {
            ui::health_check("Server", HealthStatus::Warning, Some(&e));
            ui::info("  Start with: lanyard serve");
        }
    }

    Ok(())
}

/// Hit `/health` on the local server.
async fn probe_health(port: u16) -> Result<(), String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| e.to_string())?;

    let resp = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .map_err(|_| format!("not running on port {port}"))?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(format!("HTTP {}", resp.status()))
    }
}
