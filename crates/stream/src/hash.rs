//! Incremental content digests.
//!
//! A [`Hasher`] is fed every chunk that passes through a
//! [`ByteStream`](crate::ByteStream) and finalizes into [`Digests`] once the
//! stream has been fully drained.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A digest algorithm that can be computed while bytes stream through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Blake3,
    Crc32,
    Sha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3",
            Algorithm::Crc32 => "crc32",
            Algorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized hex-encoded digests, keyed by algorithm.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Digests(BTreeMap<Algorithm, String>);

impl Digests {
    pub fn get(&self, algorithm: Algorithm) -> Option<&str> {
        self.0.get(&algorithm).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &str)> {
        self.0.iter().map(|(algorithm, hex)| (*algorithm, hex.as_str()))
    }

    /// Digests keyed by algorithm name, the shape metadata records expect.
    pub fn to_named(&self) -> BTreeMap<String, String> {
        self.iter().map(|(algorithm, hex)| (algorithm.to_string(), hex.to_string())).collect()
    }
}

enum State {
    Blake3(Box<blake3::Hasher>),
    Crc32(crc32fast::Hasher),
    Sha256(Sha256),
}

/// Running state for one or more digest algorithms.
pub struct Hasher {
    states: Vec<State>,
}

impl Hasher {
    /// Create a hasher for the given algorithms. Duplicates are ignored.
    pub fn new(algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        let mut seen = Vec::new();
        let mut states = Vec::new();
        for algorithm in algorithms {
            if seen.contains(&algorithm) {
                continue;
            }
            seen.push(algorithm);
            states.push(match algorithm {
                Algorithm::Blake3 => State::Blake3(Box::default()),
                Algorithm::Crc32 => State::Crc32(crc32fast::Hasher::new()),
                Algorithm::Sha256 => State::Sha256(Sha256::new()),
            });
        }
        Self { states }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        for state in &mut self.states {
            match state {
                State::Blake3(h) => {
                    h.update(chunk);
                },
                State::Crc32(h) => h.update(chunk),
                State::Sha256(h) => h.update(chunk),
            }
        }
    }

    pub fn finalize(self) -> Digests {
        let digests = self
            .states
            .into_iter()
            .map(|state| match state {
                State::Blake3(h) => (Algorithm::Blake3, h.finalize().to_hex().to_string()),
                State::Crc32(h) => (Algorithm::Crc32, format!("{:08x}", h.finalize())),
                State::Sha256(h) => (Algorithm::Sha256, format!("{:x}", h.finalize())),
            })
            .collect();
        Digests(digests)
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher").field("algorithms", &self.states.len()).finish()
    }
}
