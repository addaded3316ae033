use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Hashes arbitrary bytes with SHA-256 and returns the lowercase hex digest.
///
/// This is the single content hash of the ledger: block sealing and
/// transaction message digests both go through it.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A public identity on the ledger (ed25519 verifying key in base58)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates an address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(bs58::encode(public_key.as_bytes()).into_string())
    }

    /// Decodes the address back into the public key it names
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.to_string());
        address.to_public_key()?;
        Ok(address)
    }
}

/// An ed25519 signature in base58
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(bs58::encode(signature.to_bytes()).into_string())
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A key pair able to sign on behalf of its address
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Restores a wallet from a 32-byte secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    /// Restores a wallet from a hex encoded secret key
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Self::from_secret_key(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(&signing_key.verifying_key());
        Wallet {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    pub fn export_secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

/// Verifies a signature over `message` against the key named by `address`.
///
/// Undecodable keys or signatures verify as `false`.
pub fn verify_signature(message: &[u8], signature: &DigitalSignature, address: &Address) -> bool {
    let (Ok(public_key), Ok(signature)) = (address.to_public_key(), signature.to_signature()) else {
        return false;
    };

    public_key.verify(message, &signature).is_ok()
}
