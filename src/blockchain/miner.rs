// Proof of work search
//
// The search is a plain loop over nonces. It checks its cancel token on every
// iteration so a caller (or a competing block) can abort it at any point.

use log::{debug, info};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::block::{Block, BlockError};
use super::chain::{BlockchainError, MinedBlock};

/// Longest run of leading zeros a SHA-256 hex digest can have
pub const MAX_DIFFICULTY: usize = 64;

/// Returns true when the first `difficulty` hex digits of `hash` are all '0'
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Cooperative cancellation flag for a mining search
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    /// Chain height counter and the value it had when the search started
    height: Option<(Arc<AtomicUsize>, usize)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancelled, or once the watched chain height moved
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }

        match &self.height {
            Some((current, started_at)) => current.load(Ordering::Acquire) != *started_at,
            None => false,
        }
    }

    /// A clone that also fires when `height` changes from its present value.
    /// A token already watching keeps the height it started from.
    pub(crate) fn watching_height(&self, height: &Arc<AtomicUsize>) -> Self {
        if self.height.is_some() {
            return self.clone();
        }

        CancelToken {
            cancelled: Arc::clone(&self.cancelled),
            height: Some((Arc::clone(height), height.load(Ordering::Acquire))),
        }
    }
}

/// Increments `block.nonce` until its hash meets `difficulty`.
///
/// Leaves `hash` and `nonce` set to the winning values. A difficulty above
/// `MAX_DIFFICULTY` can never be met and fails without searching.
pub(crate) fn proof_of_work(
    block: &mut Block,
    difficulty: usize,
    cancel: &CancelToken,
) -> Result<Duration, BlockError> {
    if difficulty > MAX_DIFFICULTY {
        return Err(BlockError::ProofOfWorkFailed);
    }

    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            debug!("Mining cancelled at nonce {}", block.nonce);
            return Err(BlockError::Cancelled);
        }

        block.hash = block.calculate_hash();
        if meets_difficulty(&block.hash, difficulty) {
            break;
        }

        block.nonce = block.nonce.wrapping_add(1);
    }

    let elapsed = started.elapsed();
    info!(
        "Proof of work found: {} (nonce {}, {:.3}s)",
        block.hash,
        block.nonce,
        elapsed.as_secs_f64()
    );

    Ok(elapsed)
}

/// A mining search running on the blocking worker pool
///
/// Dropping the handle cancels the search, so a block is only appended
/// while someone is waiting for it.
#[derive(Debug)]
pub struct MiningHandle {
    cancel: CancelToken,
    task: Option<tokio::task::JoinHandle<Result<MinedBlock, BlockchainError>>>,
}

impl MiningHandle {
    pub(crate) fn new(
        cancel: CancelToken,
        task: tokio::task::JoinHandle<Result<MinedBlock, BlockchainError>>,
    ) -> Self {
        MiningHandle {
            cancel,
            task: Some(task),
        }
    }

    /// Aborts the search; the ledger is left untouched
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Waits for the search to finish
    pub async fn join(mut self) -> Result<MinedBlock, BlockchainError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| BlockchainError::Worker("mining task already joined".to_string()))?;

        task.await.map_err(|e| BlockchainError::Worker(e.to_string()))?
    }
}

impl Drop for MiningHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
