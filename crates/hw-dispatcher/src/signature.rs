//! Payload signing and delivery ids

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Sha256, Sha384, Sha512};

use crate::DeliveryError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha384 = Hmac<Sha384>;
type HmacSha512 = Hmac<Sha512>;

/// HMAC digest used for `X-Webhook-Signature`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha384 => "sha384",
            SignatureAlgorithm::Sha512 => "sha512",
        }
    }

    fn mac(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>, DeliveryError> {
        let key_error = |e: hmac::digest::InvalidLength| DeliveryError::Config(format!("Invalid signing key: {}", e));

        Ok(match self {
            SignatureAlgorithm::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(secret).map_err(key_error)?;
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            }
            SignatureAlgorithm::Sha384 => {
                let mut mac = HmacSha384::new_from_slice(secret).map_err(key_error)?;
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            }
            SignatureAlgorithm::Sha512 => {
                let mut mac = HmacSha512::new_from_slice(secret).map_err(key_error)?;
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    /// Base64 HMAC of the exact body bytes
    pub fn sign(&self, payload: &[u8], secret: &str) -> Result<String, DeliveryError> {
        Ok(STANDARD.encode(self.mac(payload, secret.as_bytes())?))
    }

    /// Check a received signature the way a receiver would
    pub fn verify(&self, payload: &[u8], secret: &str, signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature) else {
            return false;
        };

        let key = secret.as_bytes();
        match self {
            SignatureAlgorithm::Sha256 => HmacSha256::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(payload);
                    mac.verify_slice(&expected).is_ok()
                })
                .unwrap_or(false),
            SignatureAlgorithm::Sha384 => HmacSha384::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(payload);
                    mac.verify_slice(&expected).is_ok()
                })
                .unwrap_or(false),
            SignatureAlgorithm::Sha512 => HmacSha512::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(payload);
                    mac.verify_slice(&expected).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            "sha384" => Ok(SignatureAlgorithm::Sha384),
            "sha512" => Ok(SignatureAlgorithm::Sha512),
            other => Err(DeliveryError::Config(format!("Unsupported signature algorithm: {}", other))),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracing id for one delivery attempt.
///
/// Derived from the webhook id and the current second, so two attempts for
/// the same webhook within one second share an id. Not a security token.
pub fn delivery_id(webhook_id: &str, unix_secs: i64, salt: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(salt.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return format!("{}-{}", webhook_id, unix_secs),
    };
    mac.update(format!("{}{}", webhook_id, unix_secs).as_bytes());

    let mut id = hex::encode(mac.finalize().into_bytes());
    id.truncate(32);
    id
}

/// Random per-process salt
pub fn generate_salt() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sha256_signature() {
        // RFC 4231 test case 2
        let mac = SignatureAlgorithm::Sha256
            .mac(b"what do ya want for nothing?", b"Jefe")
            .unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_verify_all_algorithms() {
        let body = br#"{"id":42,"status":"processing"}"#;
        for algorithm in [SignatureAlgorithm::Sha256, SignatureAlgorithm::Sha384, SignatureAlgorithm::Sha512] {
            let signature = algorithm.sign(body, "s3cr3t").unwrap();
            assert!(algorithm.verify(body, "s3cr3t", &signature));
            assert!(!algorithm.verify(body, "other", &signature));
            assert!(!algorithm.verify(b"{}", "s3cr3t", &signature));
        }
    }

    #[test]
    fn test_signature_lengths() {
        let sig = |a: SignatureAlgorithm| STANDARD.decode(a.sign(b"x", "k").unwrap()).unwrap().len();
        assert_eq!(sig(SignatureAlgorithm::Sha256), 32);
        assert_eq!(sig(SignatureAlgorithm::Sha384), 48);
        assert_eq!(sig(SignatureAlgorithm::Sha512), 64);
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("SHA512".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha512);
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn test_delivery_id_shape_and_granularity() {
        let a = delivery_id("7", 1_714_557_600, "salt");
        let b = delivery_id("7", 1_714_557_601, "salt");
        let c = delivery_id("7", 1_714_557_600, "salt");

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, delivery_id("7", 1_714_557_600, "other-salt"));
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
