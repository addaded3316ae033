use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use utoipa::ToSchema;

use super::chain::{round_amount, LedgerView, AMOUNT_EPSILON};
use super::crypto::{sha256_hex, verify_signature, Address, DigitalSignature, Wallet};

/// Fee every non-mint transaction must pay at least
pub const MINIMUM_GAS: f64 = 0.1;

/// Reasons a transaction is refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Sender and recipient are the same address")]
    SelfTransferRejected,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid signature")]
    BadSignature,

    #[error("Signing key does not belong to the sender")]
    Unauthorized,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// An intent to move value from one address to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address
    pub from: Address,

    /// Recipient's address
    pub to: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Fee paid by the sender to the miner
    pub gas: f64,

    /// Sender's signature over the signing digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,

    /// Opaque payload carried along, never interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Transaction {
    /// Creates a new unsigned transaction
    ///
    /// # Arguments
    ///
    /// * `from` - The address of the sender
    /// * `to` - The address of the recipient
    /// * `amount` - The amount to transfer
    /// * `gas` - The fee, `MINIMUM_GAS` when omitted; ignored for the mint
    /// * `mint` - The ledger's mint address
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when a non-mint sender offers less than `MINIMUM_GAS`.
    pub fn new(
        from: Address,
        to: Address,
        amount: f64,
        gas: Option<f64>,
        mint: &Address,
    ) -> Result<Self, TransactionError> {
        let gas = if &from == mint {
            0.0
        } else {
            let gas = gas.unwrap_or(MINIMUM_GAS);
            if !gas.is_finite() || gas < MINIMUM_GAS {
                return Err(TransactionError::InvalidParameter(format!(
                    "gas fee must be at least {}, got {}",
                    MINIMUM_GAS, gas
                )));
            }
            gas
        };

        Ok(Transaction {
            from,
            to,
            amount,
            gas,
            signature: None,
            payload: None,
        })
    }

    /// Creates the unsigned reward transaction paying `miner`
    pub fn new_reward(mint: &Address, miner: Address, amount: f64) -> Self {
        Transaction {
            from: mint.clone(),
            to: miner,
            amount,
            gas: 0.0,
            signature: None,
            payload: None,
        }
    }

    /// Attaches an opaque payload
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Digest of the signed fields (`from`, `to`, `amount`, `gas`)
    pub fn signing_digest(&self) -> String {
        let message = json!({
            "from": self.from.0,
            "to": self.to.0,
            "amount": self.amount,
            "gas": self.gas,
        });

        sha256_hex(message.to_string().as_bytes())
    }

    /// Signs the transaction with the sender's wallet
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the wallet's address is not `from`.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if wallet.address() != &self.from {
            return Err(TransactionError::Unauthorized);
        }

        self.signature = Some(wallet.sign(self.signing_digest().as_bytes()));
        Ok(())
    }

    pub fn is_mint(&self, mint: &Address) -> bool {
        &self.from == mint
    }

    /// Amount debited from the sender (amount + gas)
    pub fn total_cost(&self) -> f64 {
        self.amount + self.gas
    }

    /// Order-preserving encoding of every field, used for block hashing
    pub(crate) fn canonical_value(&self) -> Value {
        json!([
            self.from.0,
            self.to.0,
            self.amount,
            self.gas,
            self.signature.as_ref().map(|signature| signature.0.as_str()),
            self.payload,
        ])
    }

    /// Checks the transaction against the ledger as of block `at_block`.
    ///
    /// Pure check; see `validate_with_pending` for the rules.
    pub fn validate<V: LedgerView + ?Sized>(
        &self,
        view: &V,
        at_block: &str,
    ) -> Result<(), TransactionError> {
        self.validate_with_pending(view, at_block, 0.0)
    }

    /// Same as `validate`, with `pending_spend` already committed by the
    /// sender on top of the balance at `at_block` (earlier pool entries, or
    /// earlier transactions of the same block).
    pub fn validate_with_pending<V: LedgerView + ?Sized>(
        &self,
        view: &V,
        at_block: &str,
        pending_spend: f64,
    ) -> Result<(), TransactionError> {
        if self.from.is_empty() {
            return Err(TransactionError::Malformed("missing sender".to_string()));
        }
        if self.to.is_empty() {
            return Err(TransactionError::Malformed("missing recipient".to_string()));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(TransactionError::Malformed(format!("invalid amount {}", self.amount)));
        }
        if !self.gas.is_finite() || self.gas < 0.0 {
            return Err(TransactionError::Malformed(format!("invalid gas {}", self.gas)));
        }
        let signature = match &self.signature {
            Some(signature) if !signature.is_empty() => signature,
            _ => return Err(TransactionError::Malformed("missing signature".to_string())),
        };

        if self.from == self.to {
            return Err(TransactionError::SelfTransferRejected);
        }

        if !self.is_mint(view.mint_address()) {
            let required = self.total_cost();
            let available = round_amount(view.balance_of(&self.from, at_block) - pending_spend);
            if available + AMOUNT_EPSILON < required {
                return Err(TransactionError::InsufficientFunds { required, available });
            }
        }

        if !verify_signature(self.signing_digest().as_bytes(), signature, &self.from) {
            return Err(TransactionError::BadSignature);
        }

        Ok(())
    }
}
