//! Config show/path/init commands.

use anyhow::Result;
use lanyard_core::config::Config;
use serde_json::Value;

use crate::ui;

/// Config actions.
#[derive(Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file path.
    Path,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        force: bool,
    },
}

/// Run a config command.
pub fn run_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(),
        ConfigAction::Path => {
            println!("{}", Config::default_path().display());
            Ok(())
        }
        ConfigAction::Init { force } => init_config(force),
    }
}

const REDACTED: &str = "[REDACTED]";

/// Replace secret values in a serialized config.
fn redact(value: &mut Value) {
    if let Some(secret) = value.pointer_mut("/session/secret") {
        *secret = Value::String(REDACTED.to_string());
    }
    if let Some(secret) = value.pointer_mut("/discord/oauth/clientSecret") {
        *secret = Value::String(REDACTED.to_string());
    }
}

fn show_config() -> Result<()> {
    let path = Config::default_path();
    if !path.exists() {
        ui::warning(&format!("No config file at {}, showing defaults", path.display()));
    }

    let config = Config::load_default()?;
    let mut value = serde_json::to_value(&config)?;
    redact(&mut value);
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Config::default_path();
    if path.exists()
        && !force
        && !ui::prompts::confirm(&format!("Overwrite {}?", path.display()))?
    {
        ui::info("Left existing config untouched");
        return Ok(());
    }

    let mut config = Config::default();
    config.ensure_session_secret();
    config.save(&path)?;

    ui::success(&format!("Wrote {}", path.display()));
    ui::info("The file holds the session secret; keep it private");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanyard_core::Secret;

    #[test]
    fn test_redact_hides_secrets() {
        let mut config = Config::default();
        config.session.secret = Some(Secret::new("cookie-key"));
        let mut value = serde_json::to_value(&config).unwrap();

        redact(&mut value);

        let text = value.to_string();
        assert!(!text.contains("cookie-key"));
        assert_eq!(value["session"]["secret"], REDACTED);
    }
}
