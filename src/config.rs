//! Environment-driven configuration.
//!
//! `.env` is loaded first when present; real environment variables win.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::delivery::DeviceCredentials;
use crate::encoding::payload::MIN_FRAGMENT_BUDGET;
use crate::error::ConfigError;
use crate::mail::gmail::DEFAULT_API_BASE;

/// Weather-by-mail responder settings.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub provider_address: String,
    pub reply_sender: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub access_token: SecretString,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Mailbox address; sender of outbound mail and default form reply address.
    pub relay_account: String,
    pub gmail: GmailConfig,
    pub device: Option<DeviceCredentials>,
    pub anthropic_api_key: Option<SecretString>,
    pub mistral_api_key: Option<SecretString>,
    pub claude_balance: Decimal,
    pub mistral_balance: Decimal,
    /// Ledgers persist here when set.
    pub ledger_path: Option<PathBuf>,
    pub weather: WeatherConfig,
    pub fragment_char_budget: usize,
    pub fragment_delay: Duration,
    pub check_interval: Duration,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!(error = %e, "Failed to load .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let relay_account = env.required("RELAY_ACCOUNT")?;
        let gmail = GmailConfig {
            access_token: SecretString::from(env.required("GMAIL_ACCESS_TOKEN")?),
            api_base: env
                .optional("GMAIL_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        };

        let device = match (env.optional("DEVICE_USERNAME"), env.optional("DEVICE_PASSWORD")) {
            (Some(username), Some(password)) => Some(DeviceCredentials {
                username,
                password: SecretString::from(password),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(env.invalid("DEVICE_PASSWORD", "required when DEVICE_USERNAME is set")),
            (None, Some(_)) => return Err(env.invalid("DEVICE_USERNAME", "required when DEVICE_PASSWORD is set")),
        };

        let fragment_char_budget: usize = env.parsed("FRAGMENT_CHAR_BUDGET", 120)?;
        if fragment_char_budget < MIN_FRAGMENT_BUDGET {
            return Err(env.invalid(
                "FRAGMENT_CHAR_BUDGET",
                &format!("must be at least {MIN_FRAGMENT_BUDGET}"),
            ));
        }

        let poll_secs: u64 = env.parsed("WEATHER_POLL_SECS", 10)?;
        if poll_secs == 0 {
            return Err(env.invalid("WEATHER_POLL_SECS", "must be positive"));
        }
        let check_secs: u64 = env.parsed("CHECK_INTERVAL_SECS", 300)?;
        if check_secs == 0 {
            return Err(env.invalid("CHECK_INTERVAL_SECS", "must be positive"));
        }

        Ok(Self {
            relay_account,
            gmail,
            device,
            anthropic_api_key: env.optional("ANTHROPIC_API_KEY").map(SecretString::from),
            mistral_api_key: env.optional("MISTRAL_API_KEY").map(SecretString::from),
            claude_balance: env.parsed("CLAUDE_BALANCE", Decimal::new(500, 2))?,
            mistral_balance: env.parsed("MISTRAL_BALANCE", Decimal::new(500, 2))?,
            ledger_path: env.optional("LEDGER_PATH").map(PathBuf::from),
            weather: WeatherConfig {
                provider_address: env
                    .optional("WEATHER_PROVIDER_ADDRESS")
                    .unwrap_or_else(|| "query@saildocs.com".to_string()),
                reply_sender: env
                    .optional("WEATHER_REPLY_SENDER")
                    .unwrap_or_else(|| "query-reply@saildocs.com".to_string()),
                timeout: Duration::from_secs(env.parsed("WEATHER_TIMEOUT_SECS", 300)?),
                poll_interval: Duration::from_secs(poll_secs),
            },
            fragment_char_budget,
            fragment_delay: Duration::from_secs(env.parsed("FRAGMENT_DELAY_SECS", 5)?),
            check_interval: Duration::from_secs(check_secs),
        })
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| self.invalid(key, &e.to_string())),
            None => Ok(default),
        }
    }

    fn invalid(&self, key: &str, message: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}
