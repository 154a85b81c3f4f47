//! Message shapes: how big each fuzz message is and what goes in it.
//!
//! The generic path is blind: a size from [`message_size`] filled with random
//! bytes. Services whose envelope is known get a [`Strategy::StructuredEnvelope`]
//! entry in the [`SpecializationTable`] instead.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Header-sized and power-of-two boundaries. 28 appears twice on purpose so
/// it is drawn more often.
pub const INTERESTING_SIZES: [usize; 6] = [28, 0x1c, 512, 1024, 2046, 4096];

/// Exclusive upper bound of the uniform size range.
pub const RANDOM_SIZE_CEILING: usize = 3000;

/// One in `INTERESTING_ODDS` sizes comes from [`INTERESTING_SIZES`].
pub const INTERESTING_ODDS: u32 = 3;

/// Sent when random bytes cannot be sourced so the loop still makes progress.
pub const FALLBACK_PAYLOAD: &[u8] = b"AAAAAAAAAAAAA";

/// True with probability `1/k`.
pub fn chance<R: Rng + ?Sized>(rng: &mut R, k: u32) -> bool {
    rng.gen_range(0..k) == 0
}

pub fn message_size<R: Rng + ?Sized>(rng: &mut R) -> usize {
    let size = rng.gen_range(0..RANDOM_SIZE_CEILING);
    if chance(rng, INTERESTING_ODDS) {
        return INTERESTING_SIZES.choose(rng).copied().unwrap_or(size);
    }
    size
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    size: usize,
    payload: Vec<u8>,
}

impl MessageSpec {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            size: payload.len(),
            payload,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// A fixed-size message: a random little-endian `u16` leading field followed
/// by a constant-filled body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSpec {
    pub send_len: usize,
    pub field_min: u16,
    pub field_max: u16,
    pub fill: u8,
}

impl EnvelopeSpec {
    /// `phone-service`: 28 bytes, message number in 0x1000..=0x9000, body of 'D'.
    pub const PHONE_SERVICE: Self = Self {
        send_len: 0x1c,
        field_min: 0x1000,
        field_max: 0x9000,
        fill: 0x44,
    };

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> MessageSpec {
        let (low, high) = if self.field_min <= self.field_max {
            (self.field_min, self.field_max)
        } else {
            (self.field_max, self.field_min)
        };
        let field = rng.gen_range(low..=high).to_le_bytes();
        let mut payload = vec![self.fill; self.send_len];
        let head = self.send_len.min(field.len());
        payload[..head].copy_from_slice(&field[..head]);
        MessageSpec::new(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Generic,
    StructuredEnvelope(EnvelopeSpec),
}

#[derive(Debug, Clone)]
pub struct SpecializationTable {
    entries: HashMap<String, Strategy>,
}

impl Default for SpecializationTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert(
            "phone-service",
            Strategy::StructuredEnvelope(EnvelopeSpec::PHONE_SERVICE),
        );
        table
    }
}

impl SpecializationTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, endpoint: impl Into<String>, strategy: Strategy) {
        self.entries.insert(endpoint.into(), strategy);
    }

    pub fn resolve(&self, endpoint: &str) -> &Strategy {
        self.entries.get(endpoint).unwrap_or(&Strategy::Generic)
    }
}

/// Where generic payload bytes come from.
#[derive(Debug, Clone, Copy)]
pub enum ByteSource {
    /// The operating system's entropy source.
    Os,
    /// The iteration RNG, so a seeded run replays byte for byte.
    Seeded,
    Custom(fn(&mut [u8]) -> Result<(), getrandom::Error>),
}

#[derive(Debug, Clone)]
pub struct MessageGenerator {
    table: SpecializationTable,
    source: ByteSource,
}

impl Default for MessageGenerator {
    fn default() -> Self {
        Self::new(SpecializationTable::default(), ByteSource::Os)
    }
}

impl MessageGenerator {
    pub fn new(table: SpecializationTable, source: ByteSource) -> Self {
        Self { table, source }
    }

    pub fn table(&self) -> &SpecializationTable {
        &self.table
    }

    pub fn generate<R: Rng + ?Sized>(&self, endpoint: &str, rng: &mut R) -> MessageSpec {
        match self.table.resolve(endpoint) {
            Strategy::Generic => self.generic(rng),
            Strategy::StructuredEnvelope(envelope) => {
                debug!(endpoint, "using structured envelope");
                envelope.build(rng)
            }
        }
    }

    fn generic<R: Rng + ?Sized>(&self, rng: &mut R) -> MessageSpec {
        let size = message_size(rng);
        let mut payload = vec![0u8; size];
        let filled = match self.source {
            ByteSource::Os => getrandom::getrandom(&mut payload),
            ByteSource::Seeded => {
                rng.fill_bytes(&mut payload);
                Ok(())
            }
            ByteSource::Custom(fill) => fill(&mut payload),
        };
        match filled {
            Ok(()) => MessageSpec::new(payload),
            Err(err) => {
                warn!(error = %err, size, "random bytes unavailable, sending fallback pattern");
                MessageSpec::new(FALLBACK_PAYLOAD.to_vec())
            }
        }
    }
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
