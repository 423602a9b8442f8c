//! Application settings loaded from config.toml
//!
//! The file is optional. When it is missing the built-in defaults are used:
//! a default administrator with 1000 credits and two sample sessions, the
//! same baseline the store is seeded with on first start.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "SESSION_LEDGER_CONFIG";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database URL, overridden by `DATABASE_URL`
    pub database_url: Option<String>,
    /// Capacity of the change notification channel
    pub notification_capacity: usize,
    /// Records created when the store is empty
    pub seed: SeedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            notification_capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
            seed: SeedConfig::default(),
        }
    }
}

/// Seed data for an empty store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub admin: AdminSeed,
    pub sessions: Vec<SessionSeed>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            admin: AdminSeed::default(),
            sessions: vec![
                SessionSeed {
                    venue: "Court A - Main Hall".to_string(),
                    divisions: vec![3, 4, 5],
                    days_from_now: 1,
                    start_hour: 18,
                    start_minute: 0,
                    duration_minutes: 120,
                    credit_cost: 2,
                    max_participants: 8,
                },
                SessionSeed {
                    venue: "Court B - Sports Center".to_string(),
                    divisions: vec![5, 6],
                    days_from_now: 2,
                    start_hour: 19,
                    start_minute: 0,
                    duration_minutes: 90,
                    credit_cost: 1,
                    max_participants: 6,
                },
            ],
        }
    }
}

/// Default administrator account
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminSeed {
    pub id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub division: i32,
    /// Opening balance, recorded as an earned transaction
    pub credits: i64,
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self {
            id: "admin-001".to_string(),
            email: "admin@example.com".to_string(),
            username: "admin".to_string(),
            first_name: "Admin".to_string(),
            last_name: "User".to_string(),
            division: 1,
            credits: 1000,
        }
    }
}

/// A sample session scheduled relative to the seeding date
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSeed {
    pub venue: String,
    pub divisions: Vec<i32>,
    pub days_from_now: i64,
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    pub duration_minutes: i64,
    pub credit_cost: i64,
    pub max_participants: i32,
}

/// Loads the application configuration from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read, the TOML syntax is invalid,
/// or a field has the wrong type.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path_ref.display()),
    })
}

/// Loads configuration from `SESSION_LEDGER_CONFIG` or `./config.toml`,
/// falling back to defaults when the file does not exist.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        let config = load_config(&path)?;
        info!(path, "Loaded configuration file");
        Ok(config)
    } else {
        info!(path, "No configuration file found, using defaults");
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            database_url = "sqlite::memory:"
            notification_capacity = 16

            [seed.admin]
            id = "admin-xyz"
            email = "root@club.test"
            username = "root"
            first_name = "Root"
            last_name = "Admin"
            division = 2
            credits = 50

            [[seed.sessions]]
            venue = "Hall 1"
            divisions = [1, 2]
            days_from_now = 3
            start_hour = 20
            duration_minutes = 60
            credit_cost = 3
            max_participants = 4
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.notification_capacity, 16);
        assert_eq!(config.seed.admin.id, "admin-xyz");
        assert_eq!(config.seed.admin.credits, 50);
        assert_eq!(config.seed.sessions.len(), 1);
        assert_eq!(config.seed.sessions[0].start_minute, 0);
        assert_eq!(config.seed.sessions[0].divisions, vec![1, 2]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.notification_capacity, 256);
        assert_eq!(config.seed.admin.credits, 1000);
        assert_eq!(config.seed.sessions.len(), 2);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("definitely/not/here.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
