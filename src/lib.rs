//! Single-node proof-of-work ledger.
//!
//! Signed transactions enter a pending pool, get packaged with a mint reward
//! into a block, the block is mined and appended after the whole chain is
//! re-validated. Balances are computed by replaying the chain from genesis.

pub mod blockchain;
pub mod config;

pub use blockchain::{Block, Blockchain, BlockchainError, Transaction, Wallet};
pub use config::{Config, LedgerConfig};
