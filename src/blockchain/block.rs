use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashMap;
use std::ops::Deref;
use std::time::Duration;

use super::chain::{LedgerView, AMOUNT_EPSILON};
use super::crypto::{sha256_hex, Address};
use super::miner::{self, CancelToken};
use super::transaction::{Transaction, TransactionError};

/// Ways the transaction list of a block can break the minting rules
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionSetViolation {
    #[error("expected exactly one mint transaction, found {0}")]
    MintCount(usize),

    #[error("reward minus gas is {actual}, expected {expected}")]
    RewardMismatch { expected: f64, actual: f64 },

    #[error("transaction {index} is invalid: {source}")]
    Transaction {
        index: usize,
        #[source]
        source: TransactionError,
    },
}

/// Reasons a block is refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockError {
    #[error("Block has no previous hash")]
    MissingLink,

    #[error("Invalid transaction set: {0}")]
    InvalidTransactionSet(#[from] TransactionSetViolation),

    #[error("Block hash does not meet the proof-of-work target")]
    ProofOfWorkFailed,

    #[error("Mining was cancelled")]
    Cancelled,
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions in block order, the reward first
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, empty for genesis
    pub previous_hash: String,

    /// Proof of work search counter
    pub nonce: u64,

    /// Hash of the current block, empty until mined
    pub hash: String,
}

impl Block {
    /// Creates an unsealed block on top of `previous_hash`
    pub fn new(transactions: Vec<Transaction>, previous_hash: String) -> Self {
        Block {
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        }
    }

    /// Creates the genesis block. Its hash is set directly, without mining.
    pub fn genesis() -> Self {
        let mut block = Block::new(Vec::new(), String::new());
        block.hash = block.calculate_hash();
        block
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// SHA-256 over previous hash, timestamp (ms), transactions and nonce
    pub fn calculate_hash(&self) -> String {
        let transactions =
            Value::Array(self.transactions.iter().map(Transaction::canonical_value).collect());

        let data = format!(
            "{}{}{}{}",
            self.previous_hash,
            self.timestamp.timestamp_millis(),
            transactions,
            self.nonce
        );

        sha256_hex(data.as_bytes())
    }

    /// Searches nonces until the hash meets `difficulty`
    ///
    /// # Returns
    ///
    /// The wall time spent, or `BlockError::Cancelled` once `cancel` fires
    pub fn mine(&mut self, difficulty: usize, cancel: &CancelToken) -> Result<Duration, BlockError> {
        miner::proof_of_work(self, difficulty, cancel)
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        miner::meets_difficulty(&self.hash, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_empty()
    }

    /// Validates a mined, non-genesis block against the ledger
    ///
    /// Transactions are checked against the balances as of the previous
    /// block; spends by the same sender inside this block accumulate.
    pub fn is_valid<V: LedgerView + ?Sized>(&self, view: &V) -> Result<(), BlockError> {
        if self.previous_hash.is_empty() {
            return Err(BlockError::MissingLink);
        }

        self.validate_transactions(view)?;

        if !self.meets_difficulty(view.difficulty()) {
            return Err(BlockError::ProofOfWorkFailed);
        }

        Ok(())
    }

    fn validate_transactions<V: LedgerView + ?Sized>(
        &self,
        view: &V,
    ) -> Result<(), TransactionSetViolation> {
        let mint = view.mint_address();

        let mint_count = self.transactions.iter().filter(|tx| tx.is_mint(mint)).count();
        if mint_count != 1 {
            return Err(TransactionSetViolation::MintCount(mint_count));
        }

        let reward = self
            .transactions
            .iter()
            .find(|tx| tx.is_mint(mint))
            .map(|tx| tx.amount)
            .unwrap_or_default();
        let gas: f64 = self
            .transactions
            .iter()
            .filter(|tx| !tx.is_mint(mint))
            .map(|tx| tx.gas)
            .sum();

        let actual = reward - gas;
        let expected = view.reward();
        if (actual - expected).abs() > AMOUNT_EPSILON {
            return Err(TransactionSetViolation::RewardMismatch { expected, actual });
        }

        let mut spent: HashMap<&Address, f64> = HashMap::new();
        for (index, tx) in self.transactions.iter().enumerate() {
            let pending = spent.get(&tx.from).copied().unwrap_or(0.0);
            tx.validate_with_pending(view, &self.previous_hash, pending)
                .map_err(|source| TransactionSetViolation::Transaction { index, source })?;

            if !tx.is_mint(mint) {
                *spent.entry(&tx.from).or_insert(0.0) += tx.total_cost();
            }
        }

        Ok(())
    }
}

/// A block that has been appended to the chain. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FrozenBlock(Block);

impl FrozenBlock {
    pub(crate) fn freeze(block: Block) -> Self {
        FrozenBlock(block)
    }

    pub fn block(&self) -> &Block {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn thaw_for_test(&mut self) -> &mut Block {
        &mut self.0
    }
}

impl Deref for FrozenBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.0
    }
}
