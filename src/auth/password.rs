//! Password hashing and verification using Argon2
//!
//! Uses the argon2id variant. The time cost is the configurable work factor;
//! memory and parallelism stay at the crate's recommended defaults.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

use crate::types::MarqueeError;

/// Default Argon2 time cost
pub const DEFAULT_WORK_FACTOR: u32 = 2;

/// One-way salted credential hasher
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    work_factor: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            work_factor: DEFAULT_WORK_FACTOR,
        }
    }
}

impl CredentialHasher {
    pub fn new(work_factor: u32) -> Result<Self, MarqueeError> {
        Params::new(Params::DEFAULT_M_COST, work_factor, Params::DEFAULT_P_COST, None)
            .map_err(|e| MarqueeError::Config(format!("Invalid hash work factor: {e}")))?;
        Ok(Self { work_factor })
    }

    pub fn work_factor(&self) -> u32 {
        self.work_factor
    }

    fn argon2(&self) -> Result<Argon2<'static>, MarqueeError> {
        let params = Params::new(
            Params::DEFAULT_M_COST,
            self.work_factor,
            Params::DEFAULT_P_COST,
            None,
        )
        .map_err(|e| MarqueeError::Hashing(format!("Invalid Argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash a password
    ///
    /// Returns the PHC-formatted hash string that includes the salt and parameters.
    pub fn hash(&self, password: &str) -> Result<String, MarqueeError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| MarqueeError::Hashing(format!("Failed to hash password: {e}")))
    }

    /// Verify a password against a stored hash
    ///
    /// A mismatch is `Ok(false)`. Only a malformed stored hash is an error.
    /// Cost parameters come from the stored hash, not from `self`.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, MarqueeError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| MarqueeError::Hashing(format!("Invalid password hash format: {e}")))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(MarqueeError::Hashing(format!(
                "Password verification failed: {e}"
            ))),
        }
    }

    /// Hash on the blocking thread pool
    pub async fn hash_blocking(&self, password: String) -> Result<String, MarqueeError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| MarqueeError::Internal(format!("Hashing task failed: {e}")))?
    }

    /// Verify on the blocking thread pool
    pub async fn verify_blocking(
        &self,
        password: String,
        hash: String,
    ) -> Result<bool, MarqueeError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| MarqueeError::Internal(format!("Verification task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_hash_and_verify() {
        let hasher = CredentialHasher::new(1).unwrap();
        let password = "correct-horse-battery-staple";
        let hash = hasher.hash(password).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("t=1"));
        assert!(hasher.verify(password, &hash).unwrap());
        assert!(!hasher.verify("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_different_salts() {
        let hasher = CredentialHasher::new(1).unwrap();
        let hash1 = hasher.hash("same-password").unwrap();
        let hash2 = hasher.hash("same-password").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify("same-password", &hash1).unwrap());
        assert!(hasher.verify("same-password", &hash2).unwrap());
    }

    #[test]
    fn test_verify_uses_stored_params() {
        let old = CredentialHasher::new(1).unwrap();
        let new = CredentialHasher::new(3).unwrap();
        let hash = old.hash("secret").unwrap();

        assert!(new.verify("secret", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        let hasher = CredentialHasher::default();
        let err = assert_err!(hasher.verify("password", "not-a-valid-hash"));
        assert!(matches!(err, MarqueeError::Hashing(_)));
    }

    #[test]
    fn test_work_factor_bounds() {
        assert_err!(CredentialHasher::new(0));
        let hasher = assert_ok!(CredentialHasher::new(10));
        assert_eq!(hasher.work_factor(), 10);
    }

    #[tokio::test]
    async fn test_blocking_round_trip() {
        let hasher = CredentialHasher::new(1).unwrap();
        let hash = hasher.hash_blocking("pw123456".into()).await.unwrap();
        assert!(hasher
            .verify_blocking("pw123456".into(), hash.clone())
            .await
            .unwrap());
        assert!(!hasher.verify_blocking("nope".into(), hash).await.unwrap());
    }
}
