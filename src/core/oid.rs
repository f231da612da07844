//! # ObjectId
//!
//! 12-byte document identifier.
//!
//! ## Layout
//! ```text
//! [Seconds BE(4)] [Process random(5)] [Counter BE(3)]
//! ```
//!
//! The process-random part is drawn once per process; the counter starts at a
//! random value and wraps at 2^24.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use once_cell::sync::Lazy;
use rand::Rng;

use crate::error::{DriverError, Result};

const COUNTER_MASK: u32 = 0x00FF_FFFF;

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
    let mut bytes = [0u8; 5];
    // Fall back to the thread RNG if the OS source is unavailable
    if getrandom::fill(&mut bytes).is_err() {
        rand::rng().fill(&mut bytes);
    }
    bytes
});

static COUNTER: Lazy<AtomicU32> =
    Lazy::new(|| AtomicU32::new(rand::rng().random::<u32>() & COUNTER_MASK));

/// 12-byte unique identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    bytes: [u8; 12],
}

impl ObjectId {
    /// Generate a fresh id stamped with the current time
    pub fn new() -> Self {
        let seconds = chrono::Utc::now().timestamp() as u32;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self { bytes }
    }

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self { bytes }
    }

    pub const fn bytes(&self) -> [u8; 12] {
        self.bytes
    }

    /// Parse 24 hex characters. Uppercase digits are accepted.
    pub fn parse_str(s: &str) -> Result<Self> {
        if s.len() != 24 {
            return Err(DriverError::InvalidFormat(format!(
                "ObjectId must be 24 hex characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| {
            DriverError::InvalidFormat(format!("ObjectId '{s}' is not valid hex: {e}"))
        })?;
        Ok(Self { bytes })
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Creation time in seconds since the Unix epoch
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl From<[u8; 12]> for ObjectId {
    fn from(bytes: [u8; 12]) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let s = "507f1f77bcf86cd799439011";
        let id = ObjectId::parse_str(s).unwrap();
        assert_eq!(id.to_string(), s);
        assert_eq!(id.bytes()[0], 0x50);
    }

    #[test]
    fn test_uppercase_input_normalizes() {
        let id: ObjectId = "507F1F77BCF86CD799439011".parse().unwrap();
        assert_eq!(id.to_hex(), "507f1f77bcf86cd799439011");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            ObjectId::parse_str("507f1f77"),
            Err(DriverError::InvalidFormat(_))
        ));
        assert!(matches!(
            ObjectId::parse_str("zz7f1f77bcf86cd799439011"),
            Err(DriverError::InvalidFormat(_))
        ));
        assert!(ObjectId::parse_str("").is_err());
        // 24 bytes but multi-byte characters
        assert!(ObjectId::parse_str("éééééééééééé").is_err());
    }

    #[test]
    fn test_generated_ids_are_unique_and_timestamped() {
        let now = chrono::Utc::now().timestamp() as u32;
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert!(a.timestamp() >= now.saturating_sub(1));
        assert_eq!(a.bytes()[4..9], b.bytes()[4..9]);
    }
}
