use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use pow_ledger::blockchain::{
    Address, Block, Blockchain, BlockchainError, Transaction, TransactionError, Wallet, MINIMUM_GAS,
};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The gas fee, 0.1 when omitted
    #[serde(default)]
    pub fee: Option<f64>,

    /// Opaque payload stored with the transaction
    #[serde(default)]
    pub payload: Option<String>,

    /// The sender's private key (for signing)
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// Number of transactions now waiting for the next block
    pub pending: usize,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// Seconds spent searching for the nonce
    pub elapsed_seconds: f64,

    /// The newly mined block
    pub block: Block,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Balance replayed from genesis, rounded to 2 decimals
    pub balance: f64,
}

/// Response for the info endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct InfoResponse {
    pub mint_address: String,
    pub reward: f64,
    pub difficulty: usize,
    pub minimum_gas: f64,
}

fn error_response(status: StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

fn status_for(err: &BlockchainError) -> StatusCode {
    match err {
        BlockchainError::InvalidTransaction(_) => StatusCode::BAD_REQUEST,
        BlockchainError::ChainIntegrityViolation(_) | BlockchainError::MiningCancelled => {
            StatusCode::CONFLICT
        }
        BlockchainError::Config(_) | BlockchainError::Worker(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.get_chain();
    let is_valid = blockchain.is_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get the last block
#[utoipa::path(
    get,
    path = "/api/v1/chain/tip",
    responses(
        (status = 200, description = "Chain tip retrieved successfully", body = Block)
    )
)]
pub async fn get_chain_tip(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.get_chain_tip())
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.get_pending_transactions())
}

/// Create a new transaction
///
/// Signs the transaction with the supplied key and adds it to the pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Invalid transaction"),
        (status = 403, description = "Private key does not match sender")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();

    let wallet = match Wallet::from_secret_hex(&request.private_key) {
        Ok(wallet) => wallet,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid private key: {}", err));
        }
    };

    let mut transaction = match blockchain.new_transaction(
        Address(request.sender),
        Address(request.recipient),
        request.amount,
        request.fee,
    ) {
        Ok(transaction) => transaction,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    if let Some(payload) = request.payload {
        transaction = transaction.with_payload(payload);
    }

    if let Err(err) = transaction.sign(&wallet) {
        let status = match err {
            TransactionError::Unauthorized => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        };
        return error_response(status, format!("Failed to sign transaction: {}", err));
    }

    match blockchain.submit_transaction(transaction) {
        Ok(()) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction will be added to the next block".to_string(),
            pending: blockchain.get_pending_transactions().len(),
        }),
        Err(err) => error_response(status_for(&err), format!("Failed to add transaction: {}", err)),
    }
}

/// Mine a new block
///
/// Mines all pending transactions into a new block paying the miner
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid miner address"),
        (status = 409, description = "Block was discarded")
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let miner: Address = match mine_req.miner_address.parse() {
        Ok(address) => address,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid miner address: {}", err));
        }
    };

    match blockchain.spawn_mining(miner).join().await {
        Ok(mined) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            elapsed_seconds: mined.elapsed.as_secs_f64(),
            block: mined.block,
        }),
        Err(err) => {
            warn!("Mining request failed: {}", err);
            error_response(status_for(&err), format!("Failed to mine block: {}", err))
        }
    }
}

/// Check if the blockchain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.is_valid())
}

/// Create a new wallet
///
/// The private key is not stored by the node
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::generate();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: wallet.export_secret_hex(),
    })
}

/// Get wallet balance
///
/// Replays the chain from genesis
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    params(
        ("address" = String, Path, description = "Wallet address")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_wallet_balance(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = blockchain.balance_of(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// Get ledger parameters
#[utoipa::path(
    get,
    path = "/api/v1/info",
    responses(
        (status = 200, description = "Ledger parameters", body = InfoResponse)
    )
)]
pub async fn get_info(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(InfoResponse {
        mint_address: blockchain.mint_address().0.clone(),
        reward: blockchain.config().reward,
        difficulty: blockchain.config().difficulty,
        minimum_gas: MINIMUM_GAS,
    })
}
