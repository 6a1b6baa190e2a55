//! Signable transaction payloads as returned by the aggregator.
//!
//! Payloads are bincode-encoded [`VersionedTransaction`]s. The message
//! variant decides the encoding; a payload that does not deserialize, or
//! whose message fails sanitization, is rejected before it can be signed.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use solana_sdk::message::VersionedMessage;
use solana_sdk::signature::Signature as SolanaSignature;
use solana_sdk::transaction::VersionedTransaction;

use super::error::AppError;

pub const SIGNATURE_LEN: usize = 64;

/// Serialization convention of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingVariant {
    Legacy,
    Versioned(u8),
}

impl EncodingVariant {
    pub const V0: Self = Self::Versioned(0);

    pub fn of(message: &VersionedMessage) -> Self {
        match message {
            VersionedMessage::Legacy(_) => Self::Legacy,
            VersionedMessage::V0(_) => Self::V0,
        }
    }

    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy)
    }
}

impl fmt::Display for EncodingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Versioned(version) => write!(f, "v{}", version),
        }
    }
}

/// Raw signable payload plus its encoding discriminant
#[derive(Debug, Clone)]
pub struct TransactionEnvelope {
    raw: Vec<u8>,
    transaction: VersionedTransaction,
    encoding: EncodingVariant,
    last_valid_block_height: Option<u64>,
}

impl PartialEq for TransactionEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.last_valid_block_height == other.last_valid_block_height
    }
}

impl Eq for TransactionEnvelope {}

impl TransactionEnvelope {
    /// Decode an unsigned (or partially signed) transaction
    pub fn from_bytes(raw: Vec<u8>, last_valid_block_height: Option<u64>) -> Result<Self, AppError> {
        let transaction: VersionedTransaction =
            bincode::deserialize(&raw).map_err(|e| invalid(format!("not a transaction: {}", e)))?;
        let encoded_len = bincode::serialized_size(&transaction).map_err(|e| invalid(e.to_string()))?;
        if encoded_len != raw.len() as u64 {
            return Err(invalid(format!(
                "{} trailing bytes after the transaction",
                (raw.len() as u64).saturating_sub(encoded_len)
            )));
        }
        transaction
            .sanitize()
            .map_err(|e| invalid(format!("malformed transaction: {}", e)))?;

        let required = usize::from(transaction.message.header().num_required_signatures);
        if required == 0 {
            return Err(invalid("transaction declares no signatures"));
        }
        if required != transaction.signatures.len() {
            return Err(invalid(format!(
                "message requires {} signatures but {} slots are present",
                required,
                transaction.signatures.len()
            )));
        }

        Ok(Self {
            encoding: EncodingVariant::of(&transaction.message),
            raw,
            transaction,
            last_valid_block_height,
        })
    }

    pub fn from_base64(payload: &str, last_valid_block_height: Option<u64>) -> Result<Self, AppError> {
        let raw = BASE64
            .decode(payload.trim())
            .map_err(|e| invalid(format!("payload is not base64: {}", e)))?;
        Self::from_bytes(raw, last_valid_block_height)
    }

    pub fn encoding(&self) -> EncodingVariant {
        self.encoding
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn transaction(&self) -> &VersionedTransaction {
        &self.transaction
    }

    /// The bytes covered by signatures
    pub fn message(&self) -> Vec<u8> {
        self.transaction.message.serialize()
    }

    pub fn signature_count(&self) -> usize {
        self.transaction.signatures.len()
    }

    pub fn last_valid_block_height(&self) -> Option<u64> {
        self.last_valid_block_height
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.raw)
    }

    /// Fee payer (first static account key), base58
    pub fn fee_payer(&self) -> Option<String> {
        self.transaction
            .message
            .static_account_keys()
            .first()
            .map(ToString::to_string)
    }

    /// Wire bytes with `signature` written into slot `index`
    pub fn with_signature(&self, index: usize, signature: &[u8; SIGNATURE_LEN]) -> Result<Vec<u8>, AppError> {
        let mut transaction = self.transaction.clone();
        let slot = transaction.signatures.get_mut(index).ok_or_else(|| {
            invalid(format!(
                "signature slot {} out of range ({} slots)",
                index,
                self.signature_count()
            ))
        })?;
        *slot = SolanaSignature::from(*signature);
        serialize(&transaction)
    }
}

/// Wire bytes of a transaction
pub fn serialize(transaction: &VersionedTransaction) -> Result<Vec<u8>, AppError> {
    bincode::serialize(transaction).map_err(|e| invalid(format!("cannot encode transaction: {}", e)))
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::InvalidEnvelope(message.into())
}
