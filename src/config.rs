//! Environment-backed service configuration.
//!
//! Every tunable has a default and a `PAIRGATE_*` override; nothing is
//! required to get a working local deployment. [`PairingConfig::validate`]
//! enforces the cross-field rules and runs both on `from_env` and again
//! after CLI overrides are applied.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::code::{self, CodeSource};
use crate::error::ConfigError;
use crate::identity::IdentityRule;

/// All tunables for the pairing service.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// How long an issued session stays actionable.
    pub session_ttl: Duration,
    /// Sliding throttle window per identity.
    pub throttle_window: Duration,
    /// Issuance attempts allowed per identity per window.
    pub throttle_max_attempts: usize,
    /// How often the reaper sweeps.
    pub reap_interval: Duration,
    /// Age past which an orphaned artifact directory is removed.
    pub staleness_cutoff: Duration,
    /// Upper bound on any single handshake driver call.
    pub handshake_timeout: Duration,
    /// Pairing-code length in symbols.
    pub code_length: usize,
    /// Whether codes are generated locally or issued by the protocol.
    pub code_source: CodeSource,
    /// What counts as a well-formed identity.
    pub identity_rule: IdentityRule,
    /// Bind address for the HTTP facade.
    pub bind_addr: SocketAddr,
    /// Root directory for per-session artifact areas.
    pub artifact_root: PathBuf,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(120),
            throttle_window: Duration::from_secs(3600),
            throttle_max_attempts: 3,
            reap_interval: Duration::from_secs(3600),
            staleness_cutoff: Duration::from_secs(86_400),
            handshake_timeout: Duration::from_secs(15),
            code_length: code::DEFAULT_CODE_LENGTH,
            code_source: CodeSource::SelfGenerated,
            identity_rule: IdentityRule::default(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8470)),
            artifact_root: PathBuf::from("./pairgate-artifacts"),
        }
    }
}

impl PairingConfig {
    /// Load configuration from `PAIRGATE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            session_ttl: env_duration_secs("PAIRGATE_SESSION_TTL_SECS", defaults.session_ttl)?,
            throttle_window: env_duration_secs(
                "PAIRGATE_THROTTLE_WINDOW_SECS",
                defaults.throttle_window,
            )?,
            throttle_max_attempts: env_parse(
                "PAIRGATE_THROTTLE_MAX_ATTEMPTS",
                defaults.throttle_max_attempts,
            )?,
            reap_interval: env_duration_secs("PAIRGATE_REAP_INTERVAL_SECS", defaults.reap_interval)?,
            staleness_cutoff: env_duration_secs(
                "PAIRGATE_STALENESS_CUTOFF_SECS",
                defaults.staleness_cutoff,
            )?,
            handshake_timeout: env_duration_secs(
                "PAIRGATE_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            )?,
            code_length: env_parse("PAIRGATE_CODE_LENGTH", defaults.code_length)?,
            code_source: env_parse("PAIRGATE_CODE_SOURCE", defaults.code_source)?,
            identity_rule: identity_rule_from_env()?,
            bind_addr: env_parse("PAIRGATE_BIND_ADDR", defaults.bind_addr)?,
            artifact_root: env_path("PAIRGATE_ARTIFACT_ROOT", defaults.artifact_root),
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl.is_zero() {
            return Err(invalid(
                "PAIRGATE_SESSION_TTL_SECS",
                "session TTL must be nonzero",
            ));
        }
        if self.staleness_cutoff <= self.session_ttl {
            return Err(invalid(
                "PAIRGATE_STALENESS_CUTOFF_SECS",
                "staleness cutoff must exceed the session TTL",
            ));
        }
        if self.throttle_window.is_zero() {
            return Err(invalid(
                "PAIRGATE_THROTTLE_WINDOW_SECS",
                "throttle window must be nonzero",
            ));
        }
        if self.throttle_max_attempts == 0 {
            return Err(invalid(
                "PAIRGATE_THROTTLE_MAX_ATTEMPTS",
                "at least one attempt per window is required",
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(invalid(
                "PAIRGATE_REAP_INTERVAL_SECS",
                "reap interval must be nonzero",
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(invalid(
                "PAIRGATE_HANDSHAKE_TIMEOUT_SECS",
                "handshake timeout must be nonzero",
            ));
        }
        if code::entropy_bits(self.code_length) < code::MIN_CODE_BITS {
            return Err(invalid(
                "PAIRGATE_CODE_LENGTH",
                format!(
                    "{} symbols carry under {} bits of entropy",
                    self.code_length,
                    code::MIN_CODE_BITS
                ),
            ));
        }
        match &self.identity_rule {
            IdentityRule::Digits { min_len, max_len }
            | IdentityRule::Prefixed {
                min_len, max_len, ..
            } => {
                if *min_len == 0 || min_len > max_len {
                    return Err(invalid(
                        "PAIRGATE_IDENTITY_MIN_LEN",
                        "identity length bounds must satisfy 1 <= min <= max",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}: {e}"),
        }),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(key, default.as_secs())?))
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn identity_rule_from_env() -> Result<IdentityRule, ConfigError> {
    let min_len = env_parse("PAIRGATE_IDENTITY_MIN_LEN", crate::identity::DEFAULT_MIN_LEN)?;
    let max_len = env_parse("PAIRGATE_IDENTITY_MAX_LEN", crate::identity::DEFAULT_MAX_LEN)?;

    match std::env::var("PAIRGATE_IDENTITY_PREFIX") {
        Ok(prefix) if !prefix.trim().is_empty() => {
            let prefix = prefix.trim().to_string();
            if !prefix.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid(
                    "PAIRGATE_IDENTITY_PREFIX",
                    "prefix must contain only digits",
                ));
            }
            Ok(IdentityRule::Prefixed {
                prefix,
                min_len,
                max_len,
            })
        }
        _ => Ok(IdentityRule::Digits { min_len, max_len }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PairingConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(120));
        assert_eq!(config.throttle_window, Duration::from_secs(3600));
        assert_eq!(config.throttle_max_attempts, 3);
        assert_eq!(config.reap_interval, Duration::from_secs(3600));
        assert_eq!(config.staleness_cutoff, Duration::from_secs(86_400));
        assert_eq!(config.handshake_timeout, Duration::from_secs(15));
        assert_eq!(config.code_length, 8);
        assert_eq!(config.code_source, CodeSource::SelfGenerated);
        assert_eq!(config.bind_addr.port(), 8470);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = PairingConfig {
            session_ttl: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PAIRGATE_SESSION_TTL_SECS"));
    }

    #[test]
    fn test_validate_rejects_cutoff_below_ttl() {
        let config = PairingConfig {
            session_ttl: Duration::from_secs(300),
            staleness_cutoff: Duration::from_secs(120),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("staleness cutoff"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = PairingConfig {
            throttle_max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_enforces_entropy_floor() {
        let config = PairingConfig {
            code_length: 6,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("entropy"));

        let config = PairingConfig {
            code_length: 7,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_inverted_identity_bounds() {
        let config = PairingConfig {
            identity_rule: IdentityRule::Digits {
                min_len: 10,
                max_len: 6,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_without_overrides_matches_defaults() {
        // No PAIRGATE_* variables are set in the test environment.
        let config = PairingConfig::from_env().unwrap();
        assert_eq!(config.session_ttl, Duration::from_secs(120));
        assert_eq!(config.code_length, 8);
        assert_eq!(config.identity_rule, IdentityRule::default());
    }

    #[test]
    fn test_env_parse_reports_garbage() {
        // Safety: test-only; potential races are acceptable in test contexts.
        unsafe {
            std::env::set_var("PAIRGATE_TEST_GARBAGE", "not-a-number");
        }
        let err = env_parse::<u64>("PAIRGATE_TEST_GARBAGE", 5).unwrap_err();
        assert!(err.to_string().contains("not-a-number"));
        unsafe {
            std::env::remove_var("PAIRGATE_TEST_GARBAGE");
        }
    }
}
