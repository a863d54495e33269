//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default provider API root.
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.yclients.com";

/// Scheduling provider connection settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Partner-level bearer token, sent on every call.
    pub partner_token: SecretString,
    /// Acting-user token used when a call does not carry its own.
    pub user_token: Option<SecretString>,
    /// Sent as the `partner_id` query parameter.
    pub partner_id: i64,
    pub company_id: i64,
    pub timeout: Duration,
}

/// Placeholders used when the user has no contact data on file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDefaults {
    pub phone: String,
    pub email: String,
}

impl Default for ContactDefaults {
    fn default() -> Self {
        Self {
            phone: "79000000000".to_string(),
            email: "user@example.com".to_string(),
        }
    }
}

/// Settings for the booking orchestrator and conversation.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub company_id: i64,
    /// Branch display name stored with each reservation.
    pub branch_name: String,
    pub contact_defaults: ContactDefaults,
    /// Local offset of the salon; "today" and displayed times use it.
    pub utc_offset: FixedOffset,
}

impl BookingConfig {
    pub fn new(company_id: i64) -> Self {
        Self {
            company_id,
            branch_name: "Main branch".to_string(),
            contact_defaults: ContactDefaults::default(),
            utc_offset: utc(),
        }
    }
}

/// Telegram transport settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub allowed_users: Vec<String>,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub http_port: u16,
    pub session_idle_timeout: Duration,
    pub log_dir: Option<PathBuf>,
    pub provider: ProviderConfig,
    pub booking: BookingConfig,
    pub telegram: Option<TelegramConfig>,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let partner_token = SecretString::from(require("YCLIENTS_PARTNER_TOKEN")?);
        let company_id: i64 = parse_value("YCLIENTS_COMPANY_ID", &require("YCLIENTS_COMPANY_ID")?)?;
        let partner_id = match get("YCLIENTS_PARTNER_ID") {
            Some(raw) => parse_value("YCLIENTS_PARTNER_ID", &raw)?,
            None => company_id,
        };

        let provider = ProviderConfig {
            base_url: get("YCLIENTS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            partner_token,
            user_token: get("YCLIENTS_USER_TOKEN").map(SecretString::from),
            partner_id,
            company_id,
            timeout: Duration::from_secs(30),
        };

        let utc_offset = match get("BOOKING_UTC_OFFSET") {
            Some(raw) => parse_utc_offset(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "BOOKING_UTC_OFFSET".into(),
                message: format!("expected an offset like +05:00, got {raw:?}"),
            })?,
            None => utc(),
        };

        let defaults = ContactDefaults::default();
        let booking = BookingConfig {
            company_id,
            branch_name: get("YCLIENTS_BRANCH_NAME").unwrap_or_else(|| "Main branch".to_string()),
            contact_defaults: ContactDefaults {
                phone: get("BOOKING_PHONE_PLACEHOLDER").unwrap_or(defaults.phone),
                email: get("BOOKING_EMAIL_PLACEHOLDER").unwrap_or(defaults.email),
            },
            utc_offset,
        };

        let http_port = match get("BOOKING_HTTP_PORT") {
            Some(raw) => parse_value("BOOKING_HTTP_PORT", &raw)?,
            None => 8080,
        };

        let idle_minutes: u64 = match get("BOOKING_SESSION_IDLE_MIN") {
            Some(raw) => parse_value("BOOKING_SESSION_IDLE_MIN", &raw)?,
            None => 30,
        };

        let telegram = get("TELEGRAM_BOT_TOKEN").map(|bot_token| TelegramConfig {
            bot_token,
            allowed_users: get("TELEGRAM_ALLOWED_USERS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        });

        Ok(Self {
            database_path: get("BOOKING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/booking-assist.db")),
            http_port,
            session_idle_timeout: Duration::from_secs(idle_minutes * 60),
            log_dir: get("BOOKING_LOG_DIR").map(PathBuf::from),
            provider,
            booking,
            telegram,
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parse `+05:00`, `-03:30` or `Z` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    chrono::DateTime::parse_from_rfc3339(&format!("2000-01-01T00:00:00{}", raw.trim()))
        .ok()
        .map(|dt| *dt.offset())
}

fn utc() -> FixedOffset {
    Utc.fix()
}
