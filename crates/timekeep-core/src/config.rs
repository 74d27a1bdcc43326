//! Configuration module
//!
//! Loads settings for the database, invitation lifecycle, email delivery and
//! logging from the environment (and a `.env` file when present).

use std::env;

use crate::models::InvitationPolicy;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const INVITATION_EXPIRY_DAYS: i64 = 7;
const INVITATION_MAX_REMINDERS: i32 = 3;
const INVITATION_REMINDER_INTERVAL_HOURS: i64 = 24;
const INVITATION_SWEEP_INTERVAL_SECS: u64 = 3600;
const MAX_INVITATION_EXPIRY_DAYS: i64 = 365;
const MAX_REMINDER_INTERVAL_HOURS: i64 = 24 * 365;
const SMTP_PORT: u16 = 587;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    /// Base URL used to build invitation links.
    pub frontend_url: String,
    pub invitation_expiry_days: i64,
    pub invitation_max_reminders: i32,
    pub invitation_reminder_interval_hours: i64,
    /// Interval of the invitation expiry sweep. 0 = disabled.
    pub invitation_sweep_interval_secs: u64,
    pub email_enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_tls: bool,
    /// `json` switches the log output to JSON lines.
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| v.to_lowercase().parse().unwrap_or(default))
                .unwrap_or(default)
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: get("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: get("DB_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            frontend_url: get("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            invitation_expiry_days: get("INVITATION_EXPIRY_DAYS")
                .map(|v| {
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("INVITATION_EXPIRY_DAYS must be a number"))
                })
                .transpose()?
                .unwrap_or(INVITATION_EXPIRY_DAYS),
            invitation_max_reminders: get("INVITATION_MAX_REMINDERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(INVITATION_MAX_REMINDERS),
            invitation_reminder_interval_hours: get("INVITATION_REMINDER_INTERVAL_HOURS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(INVITATION_REMINDER_INTERVAL_HOURS),
            invitation_sweep_interval_secs: get("INVITATION_SWEEP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(INVITATION_SWEEP_INTERVAL_SECS),
            email_enabled: flag("EMAIL_ENABLED", false),
            smtp_host: get("SMTP_HOST"),
            smtp_port: get("SMTP_PORT")
                .and_then(|v| v.parse().ok())
                .filter(|&p| p > 0)
                .unwrap_or(SMTP_PORT),
            smtp_user: get("SMTP_USER"),
            smtp_password: get("SMTP_PASSWORD"),
            smtp_from: get("SMTP_FROM"),
            smtp_tls: flag("SMTP_TLS", true),
            log_format: get("LOG_FORMAT").unwrap_or_else(|| "pretty".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if !(1..=MAX_INVITATION_EXPIRY_DAYS).contains(&self.invitation_expiry_days) {
            return Err(anyhow::anyhow!(
                "INVITATION_EXPIRY_DAYS must be between 1 and {}",
                MAX_INVITATION_EXPIRY_DAYS
            ));
        }

        if self.invitation_max_reminders < 0 || self.invitation_reminder_interval_hours < 0 {
            return Err(anyhow::anyhow!(
                "Invitation reminder settings must not be negative"
            ));
        }

        if self.invitation_reminder_interval_hours > MAX_REMINDER_INTERVAL_HOURS {
            return Err(anyhow::anyhow!(
                "INVITATION_REMINDER_INTERVAL_HOURS must be at most {}",
                MAX_REMINDER_INTERVAL_HOURS
            ));
        }

        if self.email_enabled && (self.smtp_host.is_none() || self.smtp_from.is_none()) {
            return Err(anyhow::anyhow!(
                "EMAIL_ENABLED=true requires SMTP_HOST and SMTP_FROM to be set"
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn invitation_policy(&self) -> InvitationPolicy {
        InvitationPolicy {
            expiry_days: self.invitation_expiry_days,
            max_reminders: self.invitation_max_reminders,
            reminder_interval_hours: self.invitation_reminder_interval_hours,
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/timekeep")]).unwrap();
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.db_timeout_seconds, 30);
        assert_eq!(config.invitation_policy(), InvitationPolicy::default());
        assert_eq!(config.invitation_sweep_interval_secs, 3600);
        assert!(!config.email_enabled);
        assert!(config.smtp_tls);
        assert!(!config.is_production());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_database_url() {
        assert!(config(&[]).is_err());
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let config = config(&[("DATABASE_URL", "mysql://localhost/timekeep")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_email_requires_smtp_settings() {
        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/timekeep"),
            ("EMAIL_ENABLED", "true"),
            ("SMTP_HOST", "smtp.example.com"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/timekeep"),
            ("INVITATION_EXPIRY_DAYS", "14"),
            ("INVITATION_SWEEP_INTERVAL_SECS", "0"),
            ("LOG_FORMAT", "JSON"),
            ("ENVIRONMENT", "prod"),
        ])
        .unwrap();
        assert_eq!(config.invitation_policy().expiry_days, 14);
        assert_eq!(config.invitation_sweep_interval_secs, 0);
        assert!(config.json_logs());
        assert!(config.is_production());
    }

    #[test]
    fn test_invalid_expiry_days_is_an_error() {
        assert!(config(&[
            ("DATABASE_URL", "postgresql://localhost/timekeep"),
            ("INVITATION_EXPIRY_DAYS", "soon"),
        ])
        .is_err());
    }

    #[test]
    fn test_expiry_days_must_be_in_range() {
        for days in ["0", "366", "9223372036854775807"] {
            let config = config(&[
                ("DATABASE_URL", "postgresql://localhost/timekeep"),
                ("INVITATION_EXPIRY_DAYS", days),
            ])
            .unwrap();
            assert!(config.validate().is_err(), "{} days accepted", days);
        }

        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/timekeep"),
            ("INVITATION_EXPIRY_DAYS", "365"),
        ])
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reminder_interval_is_bounded() {
        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/timekeep"),
            ("INVITATION_REMINDER_INTERVAL_HOURS", "1000000000000"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }
}
