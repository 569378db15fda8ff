//! Timestamp authority pool and retry schedule

use rand::Rng;

/// Public RFC 3161 timestamp authorities
pub const DEFAULT_TIMESTAMP_SERVERS: [&str; 4] = [
    "http://timestamp.digicert.com",
    "http://timestamp.sectigo.com",
    "http://timestamp.globalsign.com/tsa/r6advanced1",
    "http://timestamp.entrust.net/TSS/RFC3161sha2TS",
];

/// Attempts per server
pub const DEFAULT_RETRIES: usize = 5;

/// `signtool` exit codes that mean "try another timestamp attempt"
pub const DEFAULT_RETRYABLE_CODES: [i32; 1] = [2];

/// Ordered list of timestamp servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampServerPool {
    servers: Vec<String>,
}

impl Default for TimestampServerPool {
    fn default() -> Self {
        TimestampServerPool::new(DEFAULT_TIMESTAMP_SERVERS.iter().map(|s| s.to_string()))
    }
}

impl TimestampServerPool {
    pub fn new<I: IntoIterator<Item = String>>(servers: I) -> Self {
        TimestampServerPool {
            servers: servers.into_iter().filter(|s| !s.trim().is_empty()).collect(),
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Uniformly random start index, spreading load across the authorities
    pub fn random_start(&self) -> usize {
        if self.servers.is_empty() {
            0
        } else {
            rand::rng().random_range(0..self.servers.len())
        }
    }

    /// Attempt order: round-robin from `start`, `retries` rounds
    ///
    /// Yields exactly `len() * retries` servers; each server appears at most
    /// `retries` times.
    pub fn schedule(&self, start: usize, retries: usize) -> impl Iterator<Item = &str> + '_ {
        let count = self.servers.len();
        (0..count * retries).map(move |attempt| self.servers[(start + attempt) % count].as_str())
    }
}
