//! Identity validation rules.
//!
//! Nothing in the lifecycle manager hard-codes an identity format; the
//! configured [`IdentityRule`] decides what counts as well-formed and
//! produces the canonical form used as the session key.

/// Default minimum identity length in digits.
pub const DEFAULT_MIN_LEN: usize = 6;

/// Default maximum identity length in digits.
pub const DEFAULT_MAX_LEN: usize = 20;

/// Pluggable identity format rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRule {
    /// Any digit string within the length bounds.
    Digits { min_len: usize, max_len: usize },
    /// Digit string pinned to a fixed prefix (e.g. a country code).
    Prefixed {
        prefix: String,
        min_len: usize,
        max_len: usize,
    },
}

impl Default for IdentityRule {
    fn default() -> Self {
        Self::Digits {
            min_len: DEFAULT_MIN_LEN,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl IdentityRule {
    /// Validate a raw identity and return its canonical digit string.
    ///
    /// Surrounding whitespace is trimmed and a single leading `+` is
    /// stripped before the rule is applied. The error carries the
    /// rejection reason for the caller's `InvalidIdentity`.
    pub fn validate(&self, raw: &str) -> Result<String, String> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

        if digits.is_empty() {
            return Err("identity is empty".to_string());
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err("identity must contain only digits".to_string());
        }

        match self {
            Self::Digits { min_len, max_len } => {
                if digits.len() < *min_len || digits.len() > *max_len {
                    return Err(format!(
                        "identity must be {min_len}-{max_len} digits, got {}",
                        digits.len()
                    ));
                }
            }
            Self::Prefixed {
                prefix,
                min_len,
                max_len,
            } => {
                if digits.len() < *min_len || digits.len() > *max_len {
                    return Err(format!(
                        "identity must be {min_len}-{max_len} digits, got {}",
                        digits.len()
                    ));
                }
                if !digits.starts_with(prefix.as_str()) {
                    return Err(format!("identity must start with {prefix}"));
                }
            }
        }

        Ok(digits.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_accepts_plain_number() {
        let rule = IdentityRule::default();
        assert_eq!(rule.validate("254712345678").unwrap(), "254712345678");
    }

    #[test]
    fn test_digits_strips_plus_and_whitespace() {
        let rule = IdentityRule::default();
        assert_eq!(rule.validate(" +254712345678 ").unwrap(), "254712345678");
    }

    #[test]
    fn test_digits_rejects_letters() {
        let rule = IdentityRule::default();
        let err = rule.validate("2547abc5678").unwrap_err();
        assert!(err.contains("only digits"));
    }

    #[test]
    fn test_digits_rejects_second_plus() {
        let rule = IdentityRule::default();
        assert!(rule.validate("++254712345678").is_err());
    }

    #[test]
    fn test_digits_rejects_empty() {
        let rule = IdentityRule::default();
        assert!(rule.validate("  ").is_err());
        assert!(rule.validate("+").is_err());
    }

    #[test]
    fn test_digits_enforces_length_bounds() {
        let rule = IdentityRule::Digits {
            min_len: 6,
            max_len: 20,
        };
        assert!(rule.validate("12345").is_err());
        assert!(rule.validate("123456").is_ok());
        assert!(rule.validate("12345678901234567890").is_ok());
        assert!(rule.validate("123456789012345678901").is_err());
    }

    #[test]
    fn test_prefixed_requires_prefix() {
        let rule = IdentityRule::Prefixed {
            prefix: "254".to_string(),
            min_len: 9,
            max_len: 15,
        };
        assert_eq!(rule.validate("+254712345678").unwrap(), "254712345678");
        let err = rule.validate("441234567890").unwrap_err();
        assert!(err.contains("254"));
    }

    #[test]
    fn test_prefixed_checks_length_first() {
        let rule = IdentityRule::Prefixed {
            prefix: "254".to_string(),
            min_len: 9,
            max_len: 12,
        };
        let err = rule.validate("254").unwrap_err();
        assert!(err.contains("digits"));
    }
}
