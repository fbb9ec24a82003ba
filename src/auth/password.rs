use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::config::PasswordConfig;
use crate::error::{AppError, ErrorKind};

/// Argon2id hasher with a fixed work factor.
///
/// Verification goes through `PasswordVerifier`, which compares digests in
/// constant time.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(cfg: &PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, plain: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                AppError::internal(anyhow::anyhow!(e.to_string()))
            })?
            .to_string();
        Ok(hash)
    }

    /// `WrongPassword` on mismatch, `Internal` when `hash` is not a PHC string.
    pub fn verify(&self, hash: &str, plain: &str) -> Result<(), AppError> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            AppError::internal(anyhow::anyhow!(e.to_string()))
        })?;
        match self.argon2.verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(()),
            Err(password_hash::Error::Password) => {
                Err(AppError::new(ErrorKind::WrongPassword, "wrong password"))
            }
            Err(e) => Err(AppError::internal(anyhow::anyhow!(e.to_string()))),
        }
    }

    /// Runs [`hash`](Self::hash) on the blocking pool so slow hashes don't
    /// stall other requests.
    pub async fn hash_async(&self, plain: String) -> Result<String, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(AppError::internal)?
    }

    pub async fn verify_async(&self, hash: String, plain: String) -> Result<(), AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &plain))
            .await
            .map_err(AppError::internal)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordHasher {
        PasswordHasher::new(&PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .expect("cheap params are valid")
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = cheap();
        let hash = hasher.hash("Secur3P@ssw0rd!").expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        hasher.verify(&hash, "Secur3P@ssw0rd!").expect("verify should succeed");
    }

    #[test]
    fn same_password_gets_fresh_salt() {
        let hasher = cheap();
        let a = hasher.hash("secret1").unwrap();
        let b = hasher.hash("secret1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = cheap();
        let hash = hasher.hash("correct-horse-battery-staple").unwrap();
        let err = hasher.verify(&hash, "wrong-password").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongPassword);
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = cheap().verify("not-a-valid-hash", "anything").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn rejects_impossible_params() {
        let res = PasswordHasher::new(&PasswordConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn async_variants_match_sync() {
        let hasher = cheap();
        let hash = hasher.hash_async("secret1".into()).await.unwrap();
        hasher.verify_async(hash.clone(), "secret1".into()).await.unwrap();
        let err = hasher.verify_async(hash, "secret2".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongPassword);
    }
}
