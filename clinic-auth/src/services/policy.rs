//! Password strength policy.
//!
//! Every rule is checked; callers get the full list of violations at once.

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A single password rule that was not met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Password is too short.
    PasswordTooShort {
        min_length: usize,
        actual_length: usize,
    },
    /// Password missing uppercase letter.
    PasswordMissingUppercase,
    /// Password missing lowercase letter.
    PasswordMissingLowercase,
    /// Password missing number.
    PasswordMissingNumber,
    /// Password missing special character.
    PasswordMissingSpecial,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::PasswordTooShort {
                min_length,
                actual_length,
            } => {
                write!(
                    f,
                    "Password must be at least {} characters (got {})",
                    min_length, actual_length
                )
            }
            PolicyError::PasswordMissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyError::PasswordMissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PolicyError::PasswordMissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PolicyError::PasswordMissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Outcome of a strength check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrengthReport {
    pub valid: bool,
    pub violations: Vec<PolicyError>,
}

impl StrengthReport {
    /// Human-readable reasons, one per violated rule.
    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.to_string()).collect()
    }
}

/// Check `password` against every rule.
pub fn check_strength(password: &str) -> StrengthReport {
    let mut violations = Vec::new();

    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        violations.push(PolicyError::PasswordTooShort {
            min_length: MIN_PASSWORD_LENGTH,
            actual_length: length,
        });
    }

    if !password.chars().any(|c| c.is_uppercase()) {
        violations.push(PolicyError::PasswordMissingUppercase);
    }

    if !password.chars().any(|c| c.is_lowercase()) {
        violations.push(PolicyError::PasswordMissingLowercase);
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PolicyError::PasswordMissingNumber);
    }

    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        violations.push(PolicyError::PasswordMissingSpecial);
    }

    StrengthReport {
        valid: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_password_passes() {
        let report = check_strength("Str0ng!Pass");
        assert!(report.valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_all_violations_reported_together() {
        let report = check_strength("abc");
        assert!(!report.valid);
        assert_eq!(
            report.violations,
            vec![
                PolicyError::PasswordTooShort {
                    min_length: 8,
                    actual_length: 3
                },
                PolicyError::PasswordMissingUppercase,
                PolicyError::PasswordMissingNumber,
                PolicyError::PasswordMissingSpecial,
            ]
        );
        assert_eq!(report.reasons().len(), 4);
    }

    #[test]
    fn test_empty_password_fails_every_rule() {
        assert_eq!(check_strength("").violations.len(), 5);
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 7 characters, more than 8 bytes.
        let report = check_strength("Ä1!aaaa");
        assert!(matches!(
            report.violations.first(),
            Some(PolicyError::PasswordTooShort { actual_length: 7, .. })
        ));
    }
}
