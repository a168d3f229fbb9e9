//! Payload compression with algorithm selection

use crate::error::{LifecycleError, Result};
use crate::history::HistoryRing;
use crate::models::OperationResult;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use tracing::debug;

/// Balanced zstd level; maximum buys a few percent of ratio at a large
/// throughput cost on big batches.
const ZSTD_LEVEL: i32 = 3;

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Zstd,
    Gzip,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Zstd, Algorithm::Gzip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Zstd => "zstd",
            Algorithm::Gzip => "gzip",
        }
    }
}

/// Result of one compression call
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub algorithm: Algorithm,
    pub bytes: Vec<u8>,
    /// compressed_size / original_size; 1.0 for empty input
    pub ratio: f64,
}

/// Compresses and decompresses byte payloads off the scheduler's control
/// path. CPU work runs under `spawn_blocking` behind a semaphore so a large
/// payload never stalls the next scheduled tick.
pub struct CompressionService {
    workers: Arc<Semaphore>,
    history: HistoryRing,
}

impl CompressionService {
    pub fn new(worker_slots: usize, history_capacity: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(worker_slots.max(1))),
            history: HistoryRing::new(history_capacity),
        }
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Compress with the given algorithm (default zstd).
    pub async fn compress(
        &self,
        bytes: Vec<u8>,
        algorithm: Option<Algorithm>,
    ) -> Result<CompressionOutcome> {
        let algorithm = algorithm.unwrap_or(Algorithm::Zstd);
        let started_at = Utc::now();
        let original_len = bytes.len() as u64;

        let outcome = self
            .run_blocking(move || compress_with(algorithm, &bytes))
            .await;

        match outcome {
            Ok(outcome) => {
                debug!(
                    algorithm = outcome.algorithm.as_str(),
                    ratio = outcome.ratio,
                    "Payload compressed"
                );
                self.history
                    .push(OperationResult::success(started_at, original_len));
                Ok(outcome)
            }
            Err(e) => {
                self.history.push(OperationResult::failure(
                    started_at,
                    0,
                    e.safe_summary(),
                ));
                Err(e)
            }
        }
    }

    /// Try every known algorithm and keep the smallest output.
    ///
    /// Only the winning result lands in history; recording each trial would
    /// inflate the statistics with throwaway runs.
    pub async fn find_best(&self, bytes: Vec<u8>) -> Result<CompressionOutcome> {
        let started_at = Utc::now();
        let original_len = bytes.len() as u64;

        let outcome = self
            .run_blocking(move || {
                let mut best: Option<CompressionOutcome> = None;
                for algorithm in Algorithm::ALL {
                    let candidate = compress_with(algorithm, &bytes)?;
                    let better = best
                        .as_ref()
                        .map_or(true, |b| candidate.bytes.len() < b.bytes.len());
                    if better {
                        best = Some(candidate);
                    }
                }
                best.ok_or_else(|| LifecycleError::Internal("no algorithms configured".into()))
            })
            .await;

        match outcome {
            Ok(outcome) => {
                self.history
                    .push(OperationResult::success(started_at, original_len));
                Ok(outcome)
            }
            Err(e) => {
                self.history.push(OperationResult::failure(
                    started_at,
                    0,
                    e.safe_summary(),
                ));
                Err(e)
            }
        }
    }

    /// Decompress a payload previously produced by `compress`.
    pub async fn decompress(&self, bytes: Vec<u8>, algorithm: Algorithm) -> Result<Vec<u8>> {
        self.run_blocking(move || decompress_with(algorithm, &bytes))
            .await
    }

    async fn run_blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| LifecycleError::Internal("worker pool closed".into()))?;
        let joined = spawn_blocking(move || {
            let result = work();
            drop(permit);
            result
        })
        .await
        .map_err(|e| LifecycleError::Internal(format!("worker panicked: {}", e)))?;
        joined
    }
}

fn compress_with(algorithm: Algorithm, bytes: &[u8]) -> Result<CompressionOutcome> {
    if bytes.is_empty() {
        return Ok(CompressionOutcome {
            algorithm,
            bytes: Vec::new(),
            ratio: 1.0,
        });
    }
    let compressed = match algorithm {
        Algorithm::Zstd => zstd::stream::encode_all(bytes, ZSTD_LEVEL)
            .map_err(|e| LifecycleError::Internal(format!("zstd encode: {}", e)))?,
        Algorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(bytes)?;
            encoder
                .finish()
                .map_err(|e| LifecycleError::Internal(format!("gzip encode: {}", e)))?
        }
    };
    let ratio = compressed.len() as f64 / bytes.len() as f64;
    Ok(CompressionOutcome {
        algorithm,
        bytes: compressed,
        ratio,
    })
}

fn decompress_with(algorithm: Algorithm, bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match algorithm {
        Algorithm::Zstd => zstd::stream::decode_all(bytes)
            .map_err(|e| LifecycleError::Internal(format!("zstd decode: {}", e))),
        Algorithm::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CompressionService {
        CompressionService::new(2, 10)
    }

    #[tokio::test]
    async fn test_round_trip_zstd() {
        let service = service();
        let payload = b"abcabcabcabcabcabcabcabc".repeat(100);

        let outcome = service.compress(payload.clone(), None).await.unwrap();
        assert_eq!(outcome.algorithm, Algorithm::Zstd);
        assert!(outcome.bytes.len() < payload.len());

        let restored = service
            .decompress(outcome.bytes, Algorithm::Zstd)
            .await
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn test_round_trip_gzip() {
        let service = service();
        let payload = b"tiered time series lifecycle".repeat(50).to_vec();

        let outcome = service
            .compress(payload.clone(), Some(Algorithm::Gzip))
            .await
            .unwrap();
        let restored = service
            .decompress(outcome.bytes, Algorithm::Gzip)
            .await
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn test_empty_input_ratio_is_one() {
        let service = service();
        let outcome = service.compress(Vec::new(), None).await.unwrap();
        assert_eq!(outcome.ratio, 1.0);
        assert!(outcome.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_find_best_returns_smallest() {
        let service = service();
        let payload = b"0123456789".repeat(1000).to_vec();

        let best = service.find_best(payload.clone()).await.unwrap();
        for algorithm in Algorithm::ALL {
            let candidate = compress_with(algorithm, &payload).unwrap();
            assert!(best.bytes.len() <= candidate.bytes.len());
        }
    }

    #[tokio::test]
    async fn test_find_best_records_single_history_entry() {
        let service = service();
        service
            .find_best(b"payload".repeat(100).to_vec())
            .await
            .unwrap();
        // One entry for the winning result, not one per trial
        assert_eq!(service.history().len(), 1);
    }

    #[tokio::test]
    async fn test_ratio_matches_sizes() {
        let service = service();
        let payload = b"x".repeat(10_000).to_vec();
        let outcome = service.compress(payload.clone(), None).await.unwrap();
        let expected = outcome.bytes.len() as f64 / payload.len() as f64;
        assert!((outcome.ratio - expected).abs() < f64::EPSILON);
    }
}
