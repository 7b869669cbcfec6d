use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub profile: ProfileConfig,
    pub invitation: InvitationConfig,
    pub min_password_length: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// When resolution may synthesize a profile for a session that has none.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    Never,
    /// Only for identities created by `register` in this process.
    #[default]
    AfterRegistration,
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub call_timeout: Duration,
    pub fallback: FallbackMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvitationConfig {
    pub code_length: usize,
    pub temporary_password_length: usize,
    pub expiry_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "rentalsync-auth".to_string(),
            log_level: "info".to_string(),
            profile: ProfileConfig {
                retry_attempts: 5,
                retry_delay: Duration::from_millis(2000),
                call_timeout: Duration::from_secs(10),
                fallback: FallbackMode::AfterRegistration,
            },
            invitation: InvitationConfig {
                code_length: 6,
                temporary_password_length: 8,
                expiry_days: 7,
            },
            min_password_length: 8,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("rentalsync-auth"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            profile: ProfileConfig {
                retry_attempts: parse_env("PROFILE_RETRY_ATTEMPTS", "5", is_prod)?,
                retry_delay: Duration::from_millis(parse_env(
                    "PROFILE_RETRY_DELAY_MS",
                    "2000",
                    is_prod,
                )?),
                call_timeout: Duration::from_secs(parse_env(
                    "STORE_CALL_TIMEOUT_SECS",
                    "10",
                    is_prod,
                )?),
                fallback: get_env("PROFILE_FALLBACK", Some("after_registration"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            invitation: InvitationConfig {
                code_length: parse_env("INVITATION_CODE_LENGTH", "6", is_prod)?,
                temporary_password_length: parse_env("TEMPORARY_PASSWORD_LENGTH", "8", is_prod)?,
                expiry_days: parse_env("INVITATION_EXPIRY_DAYS", "7", is_prod)?,
            },
            min_password_length: parse_env("MIN_PASSWORD_LENGTH", "8", is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.profile.retry_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PROFILE_RETRY_ATTEMPTS must be greater than 0"
            )));
        }

        if self.profile.call_timeout.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_CALL_TIMEOUT_SECS must be greater than 0"
            )));
        }

        if self.invitation.code_length == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITATION_CODE_LENGTH must be greater than 0"
            )));
        }

        if self.invitation.temporary_password_length < 4 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TEMPORARY_PASSWORD_LENGTH must be at least 4"
            )));
        }

        if self.invitation.expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITATION_EXPIRY_DAYS must be positive"
            )));
        }

        if self.environment == Environment::Prod && self.profile.fallback == FallbackMode::Always {
            tracing::warn!("PROFILE_FALLBACK=always in production grants admin to orphaned sessions");
        }

        Ok(())
    }

    /// Retry policy used for profile reads and other store writes.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.profile.retry_attempts,
            self.profile.retry_delay,
            self.profile.call_timeout,
        )
    }

    pub fn invitation_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.invitation.expiry_days)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for FallbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(FallbackMode::Never),
            "after_registration" => Ok(FallbackMode::AfterRegistration),
            "always" => Ok(FallbackMode::Always),
            _ => Err(format!("Invalid profile fallback mode: {}", s)),
        }
    }
}
