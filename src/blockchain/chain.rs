use log::{debug, info, warn};
use parking_lot::RwLock;
use thiserror::Error;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::block::{Block, BlockError, FrozenBlock};
use super::crypto::{Address, Wallet};
use super::miner::{CancelToken, MiningHandle};
use super::transaction::{Transaction, TransactionError};
use crate::config::{ConfigError, LedgerConfig};

/// Decimal digits balances are rounded to
const BALANCE_PRECISION: i32 = 2;

/// Largest float error tolerated when comparing sums of amounts
pub(crate) const AMOUNT_EPSILON: f64 = 1e-9;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Chain integrity violation: {0}")]
    ChainIntegrityViolation(String),

    #[error("Mining was cancelled")]
    MiningCancelled,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Mining worker failed: {0}")]
    Worker(String),
}

/// Read access to the ledger needed to validate transactions and blocks
pub trait LedgerView {
    /// The reserved identity allowed to create value
    fn mint_address(&self) -> &Address;

    /// Fixed payout per mined block
    fn reward(&self) -> f64;

    /// Leading hex zeros required of a block hash
    fn difficulty(&self) -> usize;

    /// Balance of `address` after replaying every block up to and including
    /// the one whose hash is `upto_block`
    fn balance_of(&self, address: &Address, upto_block: &str) -> f64;
}

/// Rounds half-up to the balance precision.
///
/// The small bias absorbs representation error such as `1.005 * 100`
/// landing just under `100.5`.
pub fn round_amount(value: f64) -> f64 {
    let factor = 10f64.powi(BALANCE_PRECISION);
    (value * factor + 0.5 + 1e-6).floor() / factor
}

/// A successfully mined and appended block
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub elapsed: Duration,
}

/// Borrowed view over a sequence of blocks
struct ChainView<'a> {
    blocks: &'a [FrozenBlock],
    mint: &'a Address,
    config: &'a LedgerConfig,
}

impl LedgerView for ChainView<'_> {
    fn mint_address(&self) -> &Address {
        self.mint
    }

    fn reward(&self) -> f64 {
        self.config.reward
    }

    fn difficulty(&self) -> usize {
        self.config.difficulty
    }

    fn balance_of(&self, address: &Address, upto_block: &str) -> f64 {
        let mut balance = 0.0;

        for block in self.blocks {
            for tx in &block.transactions {
                if &tx.from == address {
                    balance -= tx.amount + tx.gas;
                }
                if &tx.to == address {
                    balance += tx.amount;
                }
            }

            if block.hash == upto_block {
                break;
            }
        }

        round_amount(balance)
    }
}

impl ChainView<'_> {
    fn tip_hash(&self) -> &str {
        self.blocks.last().map(|block| block.hash.as_str()).unwrap_or_default()
    }

    /// Checks every block after genesis; returns the first violation
    fn check(&self) -> Result<(), String> {
        if self.blocks.is_empty() {
            return Err("chain has no genesis block".to_string());
        }

        for (index, pair) in self.blocks.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let height = index + 1;

            if current.hash != current.calculate_hash() {
                return Err(format!("block {} hash does not match its contents", height));
            }

            if current.previous_hash != previous.hash {
                return Err(format!("block {} does not link to block {}", height, index));
            }

            current
                .is_valid(self)
                .map_err(|e: BlockError| format!("block {} is invalid: {}", height, e))?;
        }

        Ok(())
    }
}

#[derive(Debug)]
struct LedgerState {
    /// Appended blocks, genesis first
    chain: Vec<FrozenBlock>,

    /// Transactions waiting for the next block, in submission order
    pending: Vec<Transaction>,
}

/// Represents the ledger: chain, pending pool and mint key
///
/// Cloning is cheap and every clone shares the same ledger.
#[derive(Debug, Clone)]
pub struct Blockchain {
    state: Arc<RwLock<LedgerState>>,

    /// Number of appended blocks, watched by in-flight mining searches
    height: Arc<AtomicUsize>,

    /// Key pair of the mint identity, owned by this ledger only
    mint: Arc<Wallet>,

    config: LedgerConfig,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain with the default configuration
    pub fn new() -> Self {
        Self::build(LedgerConfig::default())
    }

    /// Creates a new blockchain with a validated configuration
    pub fn with_config(config: LedgerConfig) -> Result<Self, BlockchainError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: LedgerConfig) -> Self {
        let mint = Wallet::generate();
        let genesis = Block::genesis();

        info!("Created genesis block {}", genesis.hash);
        info!(
            "Mint address {} (reward {}, difficulty {})",
            mint.address(),
            config.reward,
            config.difficulty
        );

        Blockchain {
            state: Arc::new(RwLock::new(LedgerState {
                chain: vec![FrozenBlock::freeze(genesis)],
                pending: Vec::new(),
            })),
            height: Arc::new(AtomicUsize::new(1)),
            mint: Arc::new(mint),
            config,
        }
    }

    fn view<'a>(&'a self, blocks: &'a [FrozenBlock]) -> ChainView<'a> {
        ChainView {
            blocks,
            mint: self.mint.address(),
            config: &self.config,
        }
    }

    pub fn mint_address(&self) -> &Address {
        self.mint.address()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Creates an unsigned transaction with this ledger's gas rules
    pub fn new_transaction(
        &self,
        from: Address,
        to: Address,
        amount: f64,
        gas: Option<f64>,
    ) -> Result<Transaction, TransactionError> {
        Transaction::new(from, to, amount, gas, self.mint.address())
    }

    /// Validates a signed transaction against the tip and adds it to the pool
    ///
    /// Spends already waiting in the pool from the same sender count against
    /// its balance. On error the pool is unchanged.
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<(), BlockchainError> {
        let mut state = self.state.write();

        let pending_spend: f64 = state
            .pending
            .iter()
            .filter(|tx| tx.from == transaction.from)
            .map(Transaction::total_cost)
            .sum();

        let view = self.view(&state.chain);
        if let Err(err) = transaction.validate_with_pending(&view, view.tip_hash(), pending_spend) {
            warn!("Rejected transaction from {}: {}", transaction.from, err);
            return Err(err.into());
        }

        debug!(
            "Accepted transaction {} -> {} ({} + {} gas)",
            transaction.from, transaction.to, transaction.amount, transaction.gas
        );
        state.pending.push(transaction);

        Ok(())
    }

    /// Mines the pending pool into a new block paying `miner`
    ///
    /// Blocks the caller until a nonce is found. See `spawn_mining` to run
    /// the search on a worker.
    pub fn mine_block(&self, miner: &Address) -> Result<MinedBlock, BlockchainError> {
        self.mine_block_with(miner, &CancelToken::new())
    }

    /// Like `mine_block`, aborting when `cancel` fires or another block is
    /// appended first. A failed attempt leaves the ledger untouched.
    pub fn mine_block_with(
        &self,
        miner: &Address,
        cancel: &CancelToken,
    ) -> Result<MinedBlock, BlockchainError> {
        if miner.is_empty() || miner == self.mint.address() {
            return Err(TransactionError::InvalidParameter(format!(
                "miner address {:?} cannot receive the block reward",
                miner.as_str()
            ))
            .into());
        }

        let (pool, previous_hash, token) = {
            let state = self.state.read();
            let tip = self.view(&state.chain).tip_hash().to_string();
            (state.pending.clone(), tip, cancel.watching_height(&self.height))
        };

        let gas: f64 = pool.iter().map(|tx| tx.gas).sum();
        let mut reward =
            Transaction::new_reward(self.mint.address(), miner.clone(), self.config.reward + gas);
        reward.sign(&self.mint)?;

        let included = pool.len();
        let mut transactions = Vec::with_capacity(included + 1);
        transactions.push(reward);
        transactions.extend(pool);

        info!("Mining block with {} pending transactions for {}", included, miner);
        let mut block = Block::new(transactions, previous_hash);

        let elapsed = match block.mine(self.config.difficulty, &token) {
            Ok(elapsed) => elapsed,
            Err(BlockError::Cancelled) => {
                info!("Mining cancelled, block discarded");
                return Err(BlockchainError::MiningCancelled);
            }
            Err(err) => return Err(BlockchainError::ChainIntegrityViolation(err.to_string())),
        };

        let block = self.append_block(block, included)?;
        Ok(MinedBlock { block, elapsed })
    }

    /// Re-validates the chain with `block` on top and, on success, freezes
    /// it and drains the first `included` pool entries
    fn append_block(&self, block: Block, included: usize) -> Result<Block, BlockchainError> {
        let mut state = self.state.write();

        let tip = self.view(&state.chain).tip_hash().to_string();
        if block.previous_hash != tip {
            warn!("Discarding block {}: chain tip moved while mining", block.hash);
            return Err(BlockchainError::ChainIntegrityViolation(
                "chain tip moved while mining".to_string(),
            ));
        }

        let pool_unchanged = state.pending.len() >= included
            && block.transactions.get(1..) == Some(&state.pending[..included]);
        if !pool_unchanged {
            warn!("Discarding block {}: pending pool changed while mining", block.hash);
            return Err(BlockchainError::ChainIntegrityViolation(
                "pending pool changed while mining".to_string(),
            ));
        }

        state.chain.push(FrozenBlock::freeze(block));

        let checked = self.view(&state.chain).check();
        if let Err(reason) = checked {
            state.chain.pop();
            warn!("Discarding mined block: {}", reason);
            return Err(BlockchainError::ChainIntegrityViolation(reason));
        }

        state.pending.drain(..included);
        self.height.store(state.chain.len(), Ordering::Release);

        let appended = state.chain[state.chain.len() - 1].block().clone();
        info!("Appended block {} at height {}", appended.hash, state.chain.len() - 1);

        Ok(appended)
    }

    /// Runs `mine_block` on the blocking worker pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_mining(&self, miner: Address) -> MiningHandle {
        let token = CancelToken::new().watching_height(&self.height);
        let ledger = self.clone();
        let worker_token = token.clone();

        let task =
            tokio::task::spawn_blocking(move || ledger.mine_block_with(&miner, &worker_token));

        MiningHandle::new(token, task)
    }

    /// Balance of `address` at the tip, replayed from genesis
    pub fn balance_of(&self, address: &Address) -> f64 {
        let state = self.state.read();
        let view = self.view(&state.chain);
        view.balance_of(address, view.tip_hash())
    }

    /// Balance of `address` as of the block with hash `upto_block`
    pub fn balance_of_upto(&self, address: &Address, upto_block: &str) -> f64 {
        let state = self.state.read();
        self.view(&state.chain).balance_of(address, upto_block)
    }

    /// Validates every block after genesis
    pub fn is_valid(&self) -> bool {
        let state = self.state.read();

        match self.view(&state.chain).check() {
            Ok(()) => true,
            Err(reason) => {
                warn!("Chain validation failed: {}", reason);
                false
            }
        }
    }

    /// Gets the last block in the chain
    pub fn get_chain_tip(&self) -> Block {
        let state = self.state.read();
        state.chain[state.chain.len() - 1].block().clone()
    }

    /// Gets the entire chain, genesis first
    pub fn get_chain(&self) -> Vec<Block> {
        let state = self.state.read();
        state.chain.iter().map(|block| block.block().clone()).collect()
    }

    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.state.read().pending.clone()
    }

    /// Number of blocks, genesis included
    pub fn block_count(&self) -> usize {
        self.state.read().chain.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::MINIMUM_GAS;
    use std::collections::HashSet;

    fn ledger(difficulty: usize) -> Blockchain {
        Blockchain::with_config(LedgerConfig {
            reward: 1.0,
            difficulty,
        })
        .unwrap()
    }

    fn send(ledger: &Blockchain, sender: &Wallet, to: &Wallet, amount: f64) -> Transaction {
        let mut tx = ledger
            .new_transaction(sender.address().clone(), to.address().clone(), amount, None)
            .unwrap();
        tx.sign(sender).unwrap();
        tx
    }

    fn fund(ledger: &Blockchain, wallet: &Wallet, blocks: usize) {
        for _ in 0..blocks {
            ledger.mine_block(wallet.address()).unwrap();
        }
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = Blockchain::new();
        let chain = blockchain.get_chain();

        assert_eq!(chain.len(), 1);
        assert!(chain[0].previous_hash.is_empty());
        assert!(chain[0].transactions.is_empty());
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[test]
    fn test_genesis_is_exempt_from_proof_of_work() {
        let blockchain = ledger(64);

        assert!(!blockchain.get_chain_tip().meets_difficulty(64));
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Blockchain::with_config(LedgerConfig {
            reward: 0.0,
            difficulty: 1,
        });

        assert!(matches!(result, Err(BlockchainError::Config(_))));
    }

    #[test]
    fn test_mine_block_pays_reward() {
        let blockchain = ledger(1);
        let miner = Wallet::generate();

        let mined = blockchain.mine_block(miner.address()).unwrap();

        assert_eq!(blockchain.block_count(), 2);
        assert_eq!(mined.block.transactions.len(), 1);
        assert!(mined.block.transactions[0].is_mint(blockchain.mint_address()));
        assert!(mined.block.hash.starts_with('0'));
        assert_eq!(blockchain.balance_of(miner.address()), 1.0);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_transfer_and_gas() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        fund(&blockchain, &alice, 2);

        blockchain.submit_transaction(send(&blockchain, &alice, &bob, 0.5)).unwrap();
        let mined = blockchain.mine_block(bob.address()).unwrap();

        assert_eq!(mined.block.transactions.len(), 2);
        assert_eq!(mined.block.transactions[0].amount, 1.1);
        assert_eq!(blockchain.balance_of(alice.address()), 1.4);
        assert_eq!(blockchain.balance_of(bob.address()), 1.6);
        assert!(blockchain.get_pending_transactions().is_empty());
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_pool_order_is_kept() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let carol = Wallet::generate();
        fund(&blockchain, &alice, 3);

        let first = send(&blockchain, &alice, &bob, 0.5);
        let second = send(&blockchain, &alice, &carol, 0.7);
        blockchain.submit_transaction(first.clone()).unwrap();
        blockchain.submit_transaction(second.clone()).unwrap();

        let mined = blockchain.mine_block(carol.address()).unwrap();

        assert_eq!(mined.block.transactions[1..], [first, second]);
    }

    #[test]
    fn test_double_spend_is_rejected_at_submission() {
        let blockchain = ledger(1);
        let sender = Wallet::generate();
        let receiver = Wallet::generate();
        fund(&blockchain, &sender, 5);
        assert_eq!(blockchain.balance_of(sender.address()), 5.0);

        blockchain.submit_transaction(send(&blockchain, &sender, &receiver, 4.0)).unwrap();
        let second = blockchain.submit_transaction(send(&blockchain, &sender, &receiver, 4.0));

        match second {
            Err(BlockchainError::InvalidTransaction(TransactionError::InsufficientFunds {
                required,
                available,
            })) => {
                assert_eq!(required, 4.0 + MINIMUM_GAS);
                assert_eq!(available, 0.9);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(blockchain.get_pending_transactions().len(), 1);
    }

    #[test]
    fn test_spend_over_balance_by_less_than_a_cent_is_rejected() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        fund(&blockchain, &alice, 1);

        let result = blockchain.submit_transaction(send(&blockchain, &alice, &bob, 0.9049));

        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(TransactionError::InsufficientFunds { .. }))
        ));
        assert!(blockchain.get_pending_transactions().is_empty());

        blockchain.submit_transaction(send(&blockchain, &alice, &bob, 0.9)).unwrap();
        blockchain.mine_block(bob.address()).unwrap();
        assert_eq!(blockchain.balance_of(alice.address()), 0.0);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_bad_signature_leaves_pool_unchanged() {
        let blockchain = ledger(1);
        let sender = Wallet::generate();
        let receiver = Wallet::generate();
        fund(&blockchain, &sender, 1);

        let mut tx = send(&blockchain, &sender, &receiver, 0.5);
        tx.amount = 0.6;

        assert!(matches!(
            blockchain.submit_transaction(tx),
            Err(BlockchainError::InvalidTransaction(TransactionError::BadSignature))
        ));
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[test]
    fn test_unfunded_sender_is_rejected() {
        let blockchain = ledger(1);
        let sender = Wallet::generate();
        let receiver = Wallet::generate();

        let result = blockchain.submit_transaction(send(&blockchain, &sender, &receiver, 0.0));

        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(TransactionError::InsufficientFunds { .. }))
        ));
    }

    #[test]
    fn test_balance_replay_is_idempotent_and_historical() {
        let blockchain = ledger(1);
        let miner = Wallet::generate();
        fund(&blockchain, &miner, 3);

        let first = blockchain.balance_of(miner.address());
        let second = blockchain.balance_of(miner.address());
        assert_eq!(first, second);
        assert_eq!(first, 3.0);

        let block_one = blockchain.get_chain()[1].hash.clone();
        assert_eq!(blockchain.balance_of_upto(miner.address(), &block_one), 1.0);
    }

    #[test]
    fn test_value_is_conserved() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let carol = Wallet::generate();
        fund(&blockchain, &alice, 3);

        blockchain.submit_transaction(send(&blockchain, &alice, &bob, 1.25)).unwrap();
        blockchain.submit_transaction(send(&blockchain, &alice, &carol, 0.3)).unwrap();
        blockchain.mine_block(carol.address()).unwrap();
        blockchain.submit_transaction(send(&blockchain, &bob, &carol, 0.5)).unwrap();
        blockchain.mine_block(bob.address()).unwrap();

        let mint = blockchain.mint_address().clone();
        let identities: HashSet<Address> = blockchain
            .get_chain()
            .iter()
            .flat_map(|block| block.transactions.clone())
            .flat_map(|tx| [tx.from, tx.to])
            .filter(|address| address != &mint)
            .collect();

        let total: f64 = identities.iter().map(|id| blockchain.balance_of(id)).sum();
        let mined_blocks = blockchain.block_count() - 1;

        assert_eq!(round_amount(total), round_amount(1.0 * mined_blocks as f64));
    }

    #[test]
    fn test_tampered_amount_invalidates_chain() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        fund(&blockchain, &alice, 2);
        blockchain.submit_transaction(send(&blockchain, &alice, &bob, 1.0)).unwrap();
        blockchain.mine_block(alice.address()).unwrap();
        assert!(blockchain.is_valid());

        {
            let mut state = blockchain.state.write();
            state.chain[3].thaw_for_test().transactions[1].amount = 0.01;
        }

        assert!(!blockchain.is_valid());
    }

    #[test]
    fn test_failed_mining_leaves_ledger_untouched() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        fund(&blockchain, &alice, 2);
        blockchain.submit_transaction(send(&blockchain, &alice, &bob, 1.0)).unwrap();

        {
            let mut state = blockchain.state.write();
            state.chain[1].thaw_for_test().transactions[0].amount = 50.0;
        }
        let chain_before = blockchain.get_chain();
        let pending_before = blockchain.get_pending_transactions();

        let result = blockchain.mine_block(alice.address());

        assert!(matches!(result, Err(BlockchainError::ChainIntegrityViolation(_))));
        assert_eq!(blockchain.get_chain(), chain_before);
        assert_eq!(blockchain.get_pending_transactions(), pending_before);
    }

    #[test]
    fn test_cancelled_mining_leaves_ledger_untouched() {
        let blockchain = ledger(1);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        fund(&blockchain, &alice, 1);
        blockchain.submit_transaction(send(&blockchain, &alice, &bob, 0.5)).unwrap();

        let token = CancelToken::new();
        token.cancel();

        let result = blockchain.mine_block_with(bob.address(), &token);

        assert!(matches!(result, Err(BlockchainError::MiningCancelled)));
        assert_eq!(blockchain.block_count(), 2);
        assert_eq!(blockchain.get_pending_transactions().len(), 1);
    }

    #[test]
    fn test_block_on_stale_tip_is_discarded() {
        let blockchain = ledger(0);
        let miner = Wallet::generate();

        let mut reward = Transaction::new_reward(blockchain.mint_address(), miner.address().clone(), 1.0);
        reward.sign(&blockchain.mint).unwrap();
        let mut stale = Block::new(vec![reward], "not-the-tip".to_string());
        stale.mine(0, &CancelToken::new()).unwrap();

        let result = blockchain.append_block(stale, 0);

        assert!(matches!(result, Err(BlockchainError::ChainIntegrityViolation(_))));
        assert_eq!(blockchain.block_count(), 1);
    }

    #[test]
    fn test_block_minting_extra_value_is_discarded() {
        let blockchain = ledger(0);
        let miner = Wallet::generate();

        let mut reward =
            Transaction::new_reward(blockchain.mint_address(), miner.address().clone(), 1.004);
        reward.sign(&blockchain.mint).unwrap();
        let mut block = Block::new(vec![reward], blockchain.get_chain_tip().hash);
        block.mine(0, &CancelToken::new()).unwrap();

        let result = blockchain.append_block(block, 0);

        assert!(matches!(result, Err(BlockchainError::ChainIntegrityViolation(_))));
        assert_eq!(blockchain.block_count(), 1);
        assert_eq!(blockchain.balance_of(miner.address()), 0.0);
    }

    #[test]
    fn test_mint_or_empty_miner_is_rejected_before_mining() {
        let blockchain = ledger(64);
        let mint = blockchain.mint_address().clone();

        for miner in [mint, Address(String::new())] {
            let result = blockchain.mine_block(&miner);

            assert!(matches!(
                result,
                Err(BlockchainError::InvalidTransaction(TransactionError::InvalidParameter(_)))
            ));
        }
        assert_eq!(blockchain.block_count(), 1);
    }

    #[test]
    fn test_submissions_during_mining_stay_pending() {
        let blockchain = ledger(0);
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        fund(&blockchain, &alice, 3);

        let first = send(&blockchain, &alice, &bob, 0.5);
        blockchain.submit_transaction(first.clone()).unwrap();

        let mut reward = Transaction::new_reward(blockchain.mint_address(), bob.address().clone(), 1.1);
        reward.sign(&blockchain.mint).unwrap();
        let mut block = Block::new(vec![reward, first], blockchain.get_chain_tip().hash);
        block.mine(0, &CancelToken::new()).unwrap();

        let late = send(&blockchain, &alice, &bob, 0.25);
        blockchain.submit_transaction(late.clone()).unwrap();

        blockchain.append_block(block, 1).unwrap();

        assert_eq!(blockchain.get_pending_transactions(), vec![late]);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_round_amount() {
        assert_eq!(round_amount(0.125), 0.13);
        assert_eq!(round_amount(1.005), 1.01);
        assert_eq!(round_amount(0.1 + 0.2), 0.3);
        assert_eq!(round_amount(2.0), 2.0);
        assert_eq!(round_amount(-0.5), -0.5);
    }

    #[tokio::test]
    async fn test_spawned_mining_appends_block() {
        let blockchain = ledger(1);
        let miner = Wallet::generate();

        let mined = blockchain.spawn_mining(miner.address().clone()).join().await.unwrap();

        assert_eq!(blockchain.get_chain_tip().hash, mined.block.hash);
        assert_eq!(blockchain.balance_of(miner.address()), 1.0);
    }

    #[tokio::test]
    async fn test_spawned_mining_can_be_cancelled() {
        let blockchain = ledger(64);
        let miner = Wallet::generate();

        let handle = blockchain.spawn_mining(miner.address().clone());
        handle.cancel();

        assert!(matches!(handle.join().await, Err(BlockchainError::MiningCancelled)));
        assert_eq!(blockchain.block_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels_search() {
        let blockchain = ledger(64);
        let miner = Wallet::generate();

        let handle = blockchain.spawn_mining(miner.address().clone());
        let token = handle.token().clone();
        drop(handle);

        assert!(token.is_cancelled());
        assert_eq!(blockchain.block_count(), 1);
    }

    #[tokio::test]
    async fn test_competing_block_cancels_search() {
        let blockchain = ledger(64);
        let miner = Wallet::generate();

        let handle = blockchain.spawn_mining(miner.address().clone());
        blockchain.height.fetch_add(1, Ordering::Release);

        assert!(matches!(handle.join().await, Err(BlockchainError::MiningCancelled)));
    }
}
