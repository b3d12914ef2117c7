use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub db_max_connections: u32,
    pub maintenance_task: MaintenanceTask,
    /// Reference instant for the maintenance run; `None` means "now".
    pub maintenance_as_of: Option<DateTime<Utc>>,
}

/// Which upkeep the maintenance binary performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    /// Overdue sweep, which also rebuilds rankings.
    All,
    Overdue,
    Rankings,
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaintenanceTask::All => "all",
            MaintenanceTask::Overdue => "overdue",
            MaintenanceTask::Rankings => "rankings",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let db_max_connections = env_map
            .get("DB_MAX_CONNECTIONS")
            .map(|s| s.as_str())
            .unwrap_or("5")
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "DB_MAX_CONNECTIONS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let maintenance_task = match env_map
            .get("MAINTENANCE_TASK")
            .map(|s| s.as_str())
            .unwrap_or("all")
        {
            "all" => MaintenanceTask::All,
            "overdue" => MaintenanceTask::Overdue,
            "rankings" => MaintenanceTask::Rankings,
            other => {
                return Err(ConfigError::InvalidValue(
                    "MAINTENANCE_TASK".to_string(),
                    format!("must be all, overdue, or rankings, got {}", other),
                ))
            }
        };

        let maintenance_as_of = match env_map.get("MAINTENANCE_AS_OF") {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| {
                        ConfigError::InvalidValue(
                            "MAINTENANCE_AS_OF".to_string(),
                            "must be an RFC 3339 timestamp".to_string(),
                        )
                    })?,
            ),
            None => None,
        };

        Ok(Config {
            database_path,
            db_max_connections,
            maintenance_task,
            maintenance_as_of,
        })
    }
}
