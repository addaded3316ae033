// Blockchain module
//
// This module contains the ledger core:
// - Hashing and signing primitives
// - Transaction structure and validation
// - Block structure and validation
// - Proof of work search
// - The ledger itself: chain, pending pool and balance replay

pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockError, FrozenBlock, TransactionSetViolation};
pub use chain::{round_amount, Blockchain, BlockchainError, LedgerView, MinedBlock};
pub use crypto::{sha256_hex, Address, DigitalSignature, Wallet};
pub use miner::{meets_difficulty, CancelToken, MiningHandle, MAX_DIFFICULTY};
pub use transaction::{Transaction, TransactionError, MINIMUM_GAS};
