//! Streaming content fingerprinting
//!
//! This module provides:
//! 1. Chunked hashing of files and arbitrary readers in O(chunk size) memory
//! 2. Adaptive chunk sizing based on the source length
//! 3. Cancellation checks at every chunk boundary
//! 4. Throttled byte-level progress reporting
//!
//! Both supported algorithms are incremental, so a fingerprint never depends
//! on how the input was split into chunks.

use std::fmt;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, trace, warn};
use twox_hash::XxHash64;

use super::cancellation::CancellationToken;
use super::error::HashError;
use super::progress::{self, HashProgress};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

const SMALL_SOURCE_LIMIT: u64 = MIB as u64;
const MEDIUM_SOURCE_LIMIT: u64 = 64 * MIB as u64;
const LARGE_SOURCE_LIMIT: u64 = 1024 * MIB as u64;

const SMALL_CHUNK: usize = 16 * KIB;
const MEDIUM_CHUNK: usize = 256 * KIB;
const LARGE_CHUNK: usize = MIB;
const HUGE_CHUNK: usize = 4 * MIB;
const UNKNOWN_LENGTH_CHUNK: usize = MEDIUM_CHUNK;

/// Chunks between progress reports when the source length is unknown
const UNKNOWN_LENGTH_REPORT_INTERVAL: u32 = 16;

pub const DEFAULT_PROGRESS_STEP_PERCENT: u8 = 5;

/// How many bytes are read per chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkPolicy {
    /// Small chunks for small sources, progressively larger ones for big sources
    #[default]
    Adaptive,
    /// Always read this many bytes per chunk
    Fixed(usize),
}

impl ChunkPolicy {
    /// `0` selects the adaptive policy
    pub fn from_config_value(chunk_size: usize) -> Self {
        if chunk_size == 0 {
            ChunkPolicy::Adaptive
        } else {
            ChunkPolicy::Fixed(chunk_size)
        }
    }

    /// Chunk size to use for a source of the given length
    pub fn chunk_size_for(&self, total_len: Option<u64>) -> usize {
        match *self {
            ChunkPolicy::Fixed(size) => size.max(1),
            ChunkPolicy::Adaptive => match total_len {
                None => UNKNOWN_LENGTH_CHUNK,
                Some(len) if len < SMALL_SOURCE_LIMIT => SMALL_CHUNK,
                Some(len) if len < MEDIUM_SOURCE_LIMIT => MEDIUM_CHUNK,
                Some(len) if len < LARGE_SOURCE_LIMIT => LARGE_CHUNK,
                Some(_) => HUGE_CHUNK,
            },
        }
    }
}

/// Content hash algorithm used for fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    /// 64-bit xxHash, seed 0
    #[default]
    Xxh64,
    /// 256-bit BLAKE3
    Blake3,
}

impl FingerprintAlgorithm {
    /// Parse algorithm from config string
    pub fn from_config_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "xxh64" | "xxhash" | "xxhash64" => FingerprintAlgorithm::Xxh64,
            "blake3" => FingerprintAlgorithm::Blake3,
            other => {
                warn!("Unknown fingerprint algorithm '{}', using default", other);
                FingerprintAlgorithm::default()
            }
        }
    }

    /// Digest width in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            FingerprintAlgorithm::Xxh64 => 8,
            FingerprintAlgorithm::Blake3 => 32,
        }
    }

    fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            8 => Some(FingerprintAlgorithm::Xxh64),
            32 => Some(FingerprintAlgorithm::Blake3),
            _ => None,
        }
    }
}

impl fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintAlgorithm::Xxh64 => write!(f, "xxh64"),
            FingerprintAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintParseError {
    #[error("Fingerprint is not valid hex: {0}")]
    Hex(String),

    #[error("Fingerprint has unsupported width of {0} bytes")]
    Width(usize),
}

/// Fixed-width content fingerprint, displayed as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    algorithm: FingerprintAlgorithm,
    digest: Box<[u8]>,
}

impl Fingerprint {
    pub fn algorithm(&self) -> FingerprintAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// First 8 hex characters, used to disambiguate file names
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest = hex::decode(s.trim()).map_err(|e| FingerprintParseError::Hex(e.to_string()))?;
        let algorithm = FingerprintAlgorithm::from_digest_len(digest.len())
            .ok_or(FingerprintParseError::Width(digest.len()))?;
        Ok(Self {
            algorithm,
            digest: digest.into_boxed_slice(),
        })
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone)]
enum HasherState {
    Xxh64(XxHash64),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental hashing state.
///
/// Taking a fingerprint does not consume the state, so hashing can resume
/// with more data afterwards.
#[derive(Clone)]
pub struct StreamingHasher {
    state: HasherState,
    processed: u64,
}

impl StreamingHasher {
    pub fn new(algorithm: FingerprintAlgorithm) -> Self {
        let state = match algorithm {
            FingerprintAlgorithm::Xxh64 => HasherState::Xxh64(XxHash64::with_seed(0)),
            FingerprintAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self {
            state,
            processed: 0,
        }
    }

    pub fn algorithm(&self) -> FingerprintAlgorithm {
        match self.state {
            HasherState::Xxh64(_) => FingerprintAlgorithm::Xxh64,
            HasherState::Blake3(_) => FingerprintAlgorithm::Blake3,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Xxh64(hasher) => hasher.write(data),
            HasherState::Blake3(hasher) => {
                hasher.update(data);
            }
        }
        self.processed += data.len() as u64;
    }

    pub fn bytes_processed(&self) -> u64 {
        self.processed
    }

    /// Fingerprint of everything fed so far
    pub fn fingerprint(&self) -> Fingerprint {
        let digest: Box<[u8]> = match &self.state {
            HasherState::Xxh64(hasher) => Box::new(hasher.finish().to_be_bytes()),
            HasherState::Blake3(hasher) => Box::new(*hasher.finalize().as_bytes()),
        };
        Fingerprint {
            algorithm: self.algorithm(),
            digest,
        }
    }
}

impl fmt::Debug for StreamingHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingHasher")
            .field("algorithm", &self.algorithm())
            .field("processed", &self.processed)
            .finish()
    }
}

/// Outcome of one hashing operation
#[derive(Debug, Clone)]
pub struct HashResult {
    /// Path or stream identifier
    pub source: String,
    pub fingerprint: Option<Fingerprint>,
    /// Bytes read before the operation ended
    pub byte_len: u64,
    pub elapsed: Duration,
    pub failure: Option<HashError>,
}

impl HashResult {
    fn completed(source: String, fingerprint: Fingerprint, byte_len: u64, elapsed: Duration) -> Self {
        Self {
            source,
            fingerprint: Some(fingerprint),
            byte_len,
            elapsed,
            failure: None,
        }
    }

    fn failed(source: String, byte_len: u64, elapsed: Duration, failure: HashError) -> Self {
        Self {
            source,
            fingerprint: None,
            byte_len,
            elapsed,
            failure: Some(failure),
        }
    }

    pub fn success(&self) -> bool {
        self.failure.is_none() && self.fingerprint.is_some()
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.failure, Some(HashError::Canceled))
    }
}

/// Decides when a byte-level progress report is due
pub(crate) struct ProgressGate {
    step: u16,
    next_percent: u16,
    chunks_since_report: u32,
}

impl ProgressGate {
    pub(crate) fn new(step_percent: u8) -> Self {
        let step = u16::from(step_percent.clamp(1, 100));
        Self {
            step,
            next_percent: step,
            chunks_since_report: 0,
        }
    }

    /// Called once per chunk; true when a report should fire
    pub(crate) fn on_chunk(&mut self, processed: u64, total: Option<u64>) -> bool {
        match total {
            Some(total) => {
                let pct = u16::from(progress::percent_of(processed, total));
                if pct >= self.next_percent {
                    self.next_percent = (pct / self.step + 1) * self.step;
                    true
                } else {
                    false
                }
            }
            None => {
                self.chunks_since_report += 1;
                if self.chunks_since_report >= UNKNOWN_LENGTH_REPORT_INTERVAL {
                    self.chunks_since_report = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether the final 100% report has already been sent
    pub(crate) fn completed(&self) -> bool {
        self.next_percent > 100
    }
}

/// Streaming fingerprint engine
#[derive(Debug, Clone)]
pub struct HashEngine {
    algorithm: FingerprintAlgorithm,
    chunk_policy: ChunkPolicy,
    progress_step_percent: u8,
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new(FingerprintAlgorithm::default(), ChunkPolicy::default())
    }
}

impl HashEngine {
    pub fn new(algorithm: FingerprintAlgorithm, chunk_policy: ChunkPolicy) -> Self {
        Self {
            algorithm,
            chunk_policy,
            progress_step_percent: DEFAULT_PROGRESS_STEP_PERCENT,
        }
    }

    /// Report progress roughly every `percent` of the source (clamped to 1..=100)
    pub fn with_progress_step(mut self, percent: u8) -> Self {
        self.progress_step_percent = percent.clamp(1, 100);
        self
    }

    pub fn algorithm(&self) -> FingerprintAlgorithm {
        self.algorithm
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        self.chunk_policy
    }

    pub fn progress_step_percent(&self) -> u8 {
        self.progress_step_percent
    }

    /// Fresh incremental state for this engine's algorithm
    pub fn hasher(&self) -> StreamingHasher {
        StreamingHasher::new(self.algorithm)
    }

    /// Fingerprint an in-memory buffer
    pub fn hash_bytes(&self, data: &[u8]) -> Fingerprint {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.fingerprint()
    }

    /// Fingerprint a file on disk. The handle is closed before returning.
    pub fn hash_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        progress: &dyn HashProgress,
    ) -> HashResult {
        let started = Instant::now();
        let source = path.display().to_string();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                debug!(file = %source, error = %e, "Failed to open file for hashing");
                return HashResult::failed(source, 0, started.elapsed(), HashError::from_io(&e));
            }
        };
        let total_len = file.metadata().ok().map(|m| m.len());

        self.hash_stream(source, file, total_len, cancel, progress, started)
    }

    /// Fingerprint any readable stream. `total_len` drives chunk sizing and
    /// percentage reporting when known.
    pub fn hash_reader<R: Read>(
        &self,
        source_id: impl Into<String>,
        reader: R,
        total_len: Option<u64>,
        cancel: &CancellationToken,
        progress: &dyn HashProgress,
    ) -> HashResult {
        self.hash_stream(source_id.into(), reader, total_len, cancel, progress, Instant::now())
    }

    fn hash_stream<R: Read>(
        &self,
        source: String,
        mut reader: R,
        total_len: Option<u64>,
        cancel: &CancellationToken,
        progress: &dyn HashProgress,
        started: Instant,
    ) -> HashResult {
        let chunk_size = self.chunk_policy.chunk_size_for(total_len);
        let mut buffer = vec![0u8; chunk_size];
        let mut hasher = self.hasher();
        let mut gate = ProgressGate::new(self.progress_step_percent);

        trace!(file = %source, chunk_size, total_len, "Hashing started");

        loop {
            if cancel.is_canceled() {
                debug!(file = %source, processed = hasher.bytes_processed(), "Hashing canceled");
                return HashResult::failed(
                    source,
                    hasher.bytes_processed(),
                    started.elapsed(),
                    HashError::Canceled,
                );
            }

            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(file = %source, error = %e, "Read failed while hashing");
                    return HashResult::failed(
                        source,
                        hasher.bytes_processed(),
                        started.elapsed(),
                        HashError::from_io(&e),
                    );
                }
            };

            hasher.update(&buffer[..read]);

            let processed = hasher.bytes_processed();
            if gate.on_chunk(processed, total_len) {
                progress::guarded("hash_progress", || progress.on_bytes_hashed(processed, total_len));
            }
        }

        let processed = hasher.bytes_processed();
        if !gate.completed() {
            progress::guarded("hash_progress", || {
                progress.on_bytes_hashed(processed, Some(total_len.unwrap_or(processed)))
            });
        }

        let fingerprint = hasher.fingerprint();
        let elapsed = started.elapsed();
        trace!(file = %source, fingerprint = %fingerprint, bytes = processed, ?elapsed, "Hashing finished");
        HashResult::completed(source, fingerprint, processed, elapsed)
    }
}
