//! Turning human-chosen secrets into committable 32-byte words.
//!
//! The commitment is `keccak256` over the raw 32 bytes of the normalized
//! secret, the same check `resolveSpin` performs on-chain.

use crate::{
    error::{
        Result,
        SlotsError,
    },
    types::Bytes32,
};
use ethers::utils::keccak256;
use std::fmt;

/// Returns a well-formed `0x` + 64 hex digit value unchanged and hashes
/// anything else as UTF-8.
pub fn normalize(secret: &str) -> Result<Bytes32> {
    if secret.is_empty() {
        return Err(SlotsError::EmptySecret);
    }
    if secret.len() == 66
        && secret.starts_with("0x")
        && let Ok(word) = secret.parse::<Bytes32>()
    {
        return Ok(word);
    }
    Ok(Bytes32(keccak256(secret.as_bytes())))
}

pub fn commitment_of(secret: &Bytes32) -> Bytes32 {
    Bytes32(keccak256(secret.as_bytes()))
}

/// Fresh player seed for a spin.
pub fn random_seed() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("0x{}", hex::encode(bytes))
}

/// The house secret. Its contents never appear in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct HouseSecret(String);

impl HouseSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SlotsError::EmptySecret);
        }
        Ok(Self(secret))
    }

    pub fn normalized(&self) -> Result<Bytes32> {
        normalize(&self.0)
    }

    pub fn commitment(&self) -> Result<Bytes32> {
        self.normalized().map(|secret| commitment_of(&secret))
    }
}

impl fmt::Debug for HouseSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HouseSecret(<redacted>)")
    }
}
