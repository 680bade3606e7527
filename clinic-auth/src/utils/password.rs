use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash (PHC string, salt and parameters embedded)
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    /// OWASP baseline for Argon2id (19 MiB, 2 passes, 1 lane).
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// One-way credential hashing.
pub trait CredentialHasher: Send + Sync {
    /// Salted hash of `password`. Any input, including the empty string, is accepted.
    fn hash(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error>;

    /// Constant-time verification. Malformed digests verify as `false`.
    fn verify(&self, password: &Password, password_hash: &PasswordHashString) -> bool;

    /// Burn the same work as a real verification without a real digest, so
    /// unknown accounts answer as slowly as wrong passwords.
    fn verify_dummy(&self, password: &Password);
}

#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy_hash: PasswordHashString,
}

impl Argon2Hasher {
    pub fn new(params: HashingParams) -> Result<Self, anyhow::Error> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut hasher = Self {
            argon2,
            dummy_hash: PasswordHashString::new(String::new()),
        };
        hasher.dummy_hash = hasher.hash(&Password::new(crate::utils::generate_token()))?;
        Ok(hasher)
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_str().as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();

        Ok(PasswordHashString::new(password_hash))
    }

    fn verify(&self, password: &Password, password_hash: &PasswordHashString) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(password_hash.as_str()) else {
            return false;
        };

        self.argon2
            .verify_password(password.as_str().as_bytes(), &parsed_hash)
            .is_ok()
    }

    fn verify_dummy(&self, password: &Password) {
        let _ = self.verify(password, &self.dummy_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::new(HashingParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .expect("Failed to build hasher")
    }

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123");
        let hash = hasher().hash(&password).expect("Failed to hash password");

        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(!hash.as_str().contains("mySecurePassword123"));
    }

    #[test]
    fn test_verify_password_correct_and_incorrect() {
        let hasher = hasher();
        let password = Password::new("mySecurePassword123");
        let hash = hasher.hash(&password).expect("Failed to hash password");

        assert!(hasher.verify(&password, &hash));
        assert!(!hasher.verify(&Password::new("wrongPassword"), &hash));
    }

    #[test]
    fn test_empty_password_hashes() {
        let hasher = hasher();
        let hash = hasher.hash(&Password::new("")).expect("Failed to hash password");
        assert!(hasher.verify(&Password::new(""), &hash));
    }

    #[test]
    fn test_malformed_digest_is_false() {
        let hasher = hasher();
        let password = Password::new("anything");
        assert!(!hasher.verify(&password, &PasswordHashString::new("not-a-hash".into())));
        assert!(!hasher.verify(&password, &PasswordHashString::new(String::new())));
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let hasher = hasher();
        let password = Password::new("mySecurePassword123");
        let hash1 = hasher.hash(&password).expect("Failed to hash password");
        let hash2 = hasher.hash(&password).expect("Failed to hash password");

        // Same password should produce different hashes (due to random salt)
        assert_ne!(hash1.as_str(), hash2.as_str());
        assert!(hasher.verify(&password, &hash1));
        assert!(hasher.verify(&password, &hash2));
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let rendered = format!("{:?}", Password::new("Str0ng!Pass"));
        assert!(!rendered.contains("Str0ng"));
    }
}
