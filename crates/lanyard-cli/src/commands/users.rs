//! User management commands.
//!
//! These open the sled database directly, so they cannot run while a
//! server holds it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use rand::{Rng, distributions::Alphanumeric};

use lanyard_core::config::Config;
use lanyard_core::store::CredentialStore;
use lanyard_core::user::{AccountKind, UserRecord};
use lanyard_core::validation::{RegistrationInput, normalize_username, validate_registration};
use lanyard_gateway::auth::{SledCredentialStore, open_database};

use crate::ui;

const GENERATED_PASSWORD_LEN: usize = 16;

/// Arguments for user commands.
pub struct UsersArgs {
    /// The action to perform.
    pub action: UsersAction,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

/// User actions.
pub enum UsersAction {
    /// Create a local account.
    Create {
        username: String,
        email: Option<String>,
        password: Option<String>,
        generate_password: bool,
    },
    /// List all users.
    List,
    /// Reset a user's password.
    ResetPassword { username: String },
    /// Show one user.
    Show { username: String },
}

/// Run a user command.
///
/// # Errors
///
/// Returns error if the database cannot be opened or the operation fails.
pub async fn run_users(args: UsersArgs) -> Result<()> {
    let config = Config::load_default()?;
    let data_dir = args.data_dir.unwrap_or_else(|| config.data_dir());
    std::fs::create_dir_all(&data_dir)?;

    let db = open_database(&data_dir).context("Is a server running against this data directory?")?;
    let store = SledCredentialStore::with_db(&db)?;

    match args.action {
        UsersAction::Create {
            username,
            email,
            password,
            generate_password: generate,
        } => create_user(&store, &config, username, email, password, generate).await,
        UsersAction::List => list_users(&store),
        UsersAction::ResetPassword { username } => reset_password(&store, &username).await,
        UsersAction::Show { username } => show_user(&store, &username).await,
    }
}

/// A random alphanumeric password.
fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

async fn create_user(
    store: &SledCredentialStore,
    config: &Config,
    username: String,
    email: Option<String>,
    password: Option<String>,
    generate: bool,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None if generate => {
            let password = generate_password(GENERATED_PASSWORD_LEN);
            ui::success(&format!("Generated password: {password}"));
            password
        }
        None => ui::prompts::new_password("Password")?,
    };

    // Administrators may create accounts while public registration is closed.
    let input = RegistrationInput {
        username,
        email,
        password,
    };
    let registration = validate_registration(&input, &config.registration)?;
    let user = store.create(registration.into_new_user()?).await?;

    ui::success(&format!("Created user '{}' ({})", user.username, user.id));
    Ok(())
}

fn kind_label(user: &UserRecord) -> &'static str {
    match user.account {
        AccountKind::Local { .. } => "local",
        AccountKind::Linked { .. } => "linked",
        AccountKind::Both { .. } => "both",
    }
}

fn list_users(store: &SledCredentialStore) -> Result<()> {
    let users = store.list()?;

    if users.is_empty() {
        ui::info("No users yet.");
        ui::info("Run 'lanyard users create --username <name>' to add one.");
        return Ok(());
    }

    ui::info(&format!("Users ({}):", users.len()));
    println!();
    println!("{:<32} {:<8} {:<28} {:<20}", "USERNAME", "KIND", "EMAIL", "CREATED");
    println!("{}", "-".repeat(90));

    for user in &users {
        let created = user.created_at.format("%Y-%m-%d %H:%M:%S");
        println!(
            "{:<32} {:<8} {:<28} {:<20}",
            user.username,
            kind_label(user),
            user.email.as_deref().unwrap_or("-"),
            created
        );
    }

    Ok(())
}

async fn find_user(store: &SledCredentialStore, username: &str) -> Result<UserRecord> {
    store
        .find_by_username(&normalize_username(username))
        .await?
        .with_context(|| format!("User not found: {username}"))
}

async fn reset_password(store: &SledCredentialStore, username: &str) -> Result<()> {
    let mut user = find_user(store, username).await?;

    let new_password = generate_password(GENERATED_PASSWORD_LEN);
    user.set_password(&new_password)?;
    store.save(&user).await?;

    ui::success(&format!("Password reset for user '{}'", user.username));
    ui::success(&format!("New password: {new_password}"));
    Ok(())
}

async fn show_user(store: &SledCredentialStore, username: &str) -> Result<()> {
    let user = find_user(store, username).await?;

    ui::header(&user.username);
    ui::kv("Id", user.id.as_str());
    ui::kv("Kind", kind_label(&user));
    ui::kv("Email", user.email.as_deref().unwrap_or("-"));
    if let Some(external) = user.external() {
        ui::kv(
            "Linked",
            &format!("{} {} ({})", external.provider, external.external_id, external.display_name),
        );
    }
    ui::kv("Created", &user.created_at.to_rfc3339());
    ui::kv("Updated", &user.updated_at.to_rfc3339());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_password() {
        let password = generate_password(16);
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password(16));
    }
}
