//! Room password hashing and constant-time verification.
//!
//! Hashes use the encoded form `pbkdf2_sha256$<iterations>$<salt>$<base64>`,
//! so records written by other PBKDF2-SHA256 deployments of the same format
//! verify unchanged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const ALGORITHM: &str = "pbkdf2_sha256";
const SALT_LEN: usize = 22;
const KEY_LEN: usize = 32;

/// Iteration count for newly hashed passwords.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("iteration count must be at least 1")]
    InvalidIterations,
}

/// Hashing and verification of room passwords.
///
/// Both operations are CPU-bound; callers run them off the async executor.
pub trait CredentialVerifier: Send + Sync {
    fn hash_password(&self, plain: &str) -> Result<String, CredentialError>;

    /// `false` for a mismatch and for any hash this verifier cannot parse.
    fn verify_password(&self, plain: &str, stored_hash: &str) -> bool;
}

/// PBKDF2-HMAC-SHA256 verifier with random alphanumeric salts.
#[derive(Clone, Debug)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: u32) -> Result<Self, CredentialError> {
        if iterations == 0 {
            return Err(CredentialError::InvalidIterations);
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn derive(plain: &str, salt: &str, iterations: u32) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(plain.as_bytes(), salt.as_bytes(), iterations, &mut key);
        key
    }

    fn encode(plain: &str, salt: &str, iterations: u32) -> String {
        let key = Self::derive(plain, salt, iterations);
        format!("{ALGORITHM}${iterations}${salt}${}", STANDARD.encode(key))
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl CredentialVerifier for Pbkdf2Hasher {
    fn hash_password(&self, plain: &str) -> Result<String, CredentialError> {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        Ok(Self::encode(plain, &salt, self.iterations))
    }

    fn verify_password(&self, plain: &str, stored_hash: &str) -> bool {
        let mut parts = stored_hash.splitn(4, '$');
        let (Some(algorithm), Some(iterations), Some(salt), Some(expected)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if algorithm != ALGORITHM {
            return false;
        }
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        if iterations == 0 {
            return false;
        }
        let Ok(expected) = STANDARD.decode(expected) else {
            return false;
        };
        let computed = Self::derive(plain, salt, iterations);
        computed.as_slice().ct_eq(expected.as_slice()).into()
    }
}
