//! Random streams for clients and server.
//!
//! The public pipeline seed keys only the shared stream, which depends on seed
//! and round so that all participants derive the same rotation without
//! exchanging it. Noise is drawn from a [`NoiseSource`]: fresh entropy unless a
//! private noise seed is supplied explicitly.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Generator type handed to stages.
pub type StageRng = ChaCha20Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
enum Domain {
    Shared = 0,
    Client = 1,
    Server = 2,
}

fn stream(seed: u64, round: u64, domain: Domain, index: u64) -> StageRng {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&round.to_le_bytes());
    key[16..24].copy_from_slice(&(domain as u64).to_le_bytes());
    key[24..].copy_from_slice(&index.to_le_bytes());
    ChaCha20Rng::from_seed(key)
}

/// Stream shared by every participant of `round`.
pub fn shared_rng(seed: u64, round: u64) -> StageRng {
    stream(seed, round, Domain::Shared, 0)
}

/// Reproducible noise stream of client `client` in `round`, keyed by a
/// private noise seed.
pub fn client_rng(seed: u64, round: u64, client: usize) -> StageRng {
    stream(seed, round, Domain::Client, client as u64)
}

/// Reproducible server noise stream of `round`, keyed by a private noise
/// seed.
pub fn server_rng(seed: u64, round: u64) -> StageRng {
    stream(seed, round, Domain::Server, 0)
}

/// Origin of client and server noise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NoiseSource {
    /// A freshly seeded generator from operating system entropy per stream.
    #[default]
    Entropy,
    /// Streams keyed by a private seed, for reproducible test runs.
    Seeded(u64),
}

impl NoiseSource {
    /// Noise stream of client `client` in `round`.
    pub fn client_rng(&self, round: u64, client: usize) -> StageRng {
        match self {
            NoiseSource::Entropy => ChaCha20Rng::from_entropy(),
            NoiseSource::Seeded(seed) => client_rng(*seed, round, client),
        }
    }

    /// Server noise stream of `round`.
    pub fn server_rng(&self, round: u64) -> StageRng {
        match self {
            NoiseSource::Entropy => ChaCha20Rng::from_entropy(),
            NoiseSource::Seeded(seed) => server_rng(*seed, round),
        }
    }
}
