use crate::games::types::{Multiplier, MULTIPLIER_SCALE};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const CRASH_DOMAIN: &[u8] = b"crash:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FairnessError {
    #[error("Seed must be 32 bytes of hex, got {0} bytes")]
    BadSeedLength(usize),
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Seed does not match commitment")]
    CommitmentMismatch,
}

/// Secret server seed for one crash round
#[derive(Clone, PartialEq, Eq)]
pub struct RoundSeed([u8; 32]);

impl std::fmt::Debug for RoundSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print an unrevealed seed by accident.
        write!(f, "RoundSeed({})", self.commitment())
    }
}

impl RoundSeed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, FairnessError> {
        let raw = hex::decode(s.trim()).map_err(|e| FairnessError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| FairnessError::BadSeedLength(raw.len()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Published before the round: hex(SHA-256(seed))
    pub fn commitment(&self) -> String {
        hex::encode(Sha256::digest(self.0))
    }

    /// First 32 bits of the domain-separated outcome digest
    pub fn outcome_word(&self) -> u32 {
        let mut hasher = Sha256::new();
        hasher.update(CRASH_DOMAIN);
        hasher.update(self.0);
        let digest = hasher.finalize();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    pub fn crash_point(&self, rtp_bps: u64, max_bps: u64) -> Multiplier {
        crash_point_from_word(self.outcome_word(), rtp_bps, max_bps)
    }
}

/// `rtp × 2^32 / (2^32 − v)`, clamped to `[1.00x, max]`
pub fn crash_point_from_word(v: u32, rtp_bps: u64, max_bps: u64) -> Multiplier {
    let span: u128 = 1u128 << 32;
    let raw = (rtp_bps as u128 * span) / (span - v as u128);
    let clamped = raw.clamp(MULTIPLIER_SCALE as u128, max_bps.max(MULTIPLIER_SCALE) as u128);
    Multiplier(clamped as u64)
}

/// Revealed round data that anyone can recheck
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundReveal {
    pub commitment: String,
    pub seed: String,
    pub crash_point: Multiplier,
}

/// Recompute the crash point of a revealed seed and check it against its commitment
pub fn verify(
    seed_hex: &str,
    commitment: &str,
    rtp_bps: u64,
    max_bps: u64,
) -> Result<Multiplier, FairnessError> {
    let seed = RoundSeed::from_hex(seed_hex)?;
    if !seed.commitment().eq_ignore_ascii_case(commitment.trim()) {
        return Err(FairnessError::CommitmentMismatch);
    }
    Ok(seed.crash_point(rtp_bps, max_bps))
}
