//! Local keypair signer.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use secrecy::{ExposeSecret, SecretString};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

use crate::domain::envelope::serialize;
use crate::domain::{
    ConfigError, EncodingVariant, SignedTransaction, SignerError, TransactionEnvelope, TransactionSigner,
};

/// Signs the message and fills the fee payer slot
pub struct KeypairSigner {
    keypair: Keypair,
    legacy_only: bool,
}

impl KeypairSigner {
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        Self::from_keypair(Keypair::new_from_array(signing_key.to_bytes()))
    }

    #[must_use]
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair,
            legacy_only: false,
        }
    }

    pub fn from_base58(secret: &SecretString) -> Result<Self, ConfigError> {
        Ok(Self::new(signing_key_from_base58(secret)?))
    }

    /// Model a wallet integration that cannot handle versioned transactions
    #[must_use]
    pub fn legacy_only(mut self) -> Self {
        self.legacy_only = true;
        self
    }

    pub fn public_key(&self) -> String {
        self.keypair.pubkey().to_string()
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn payer(&self) -> String {
        self.public_key()
    }

    fn supports(&self, encoding: EncodingVariant) -> bool {
        !self.legacy_only || encoding.is_legacy()
    }

    async fn sign(&self, envelope: &TransactionEnvelope) -> Result<SignedTransaction, SignerError> {
        if !self.supports(envelope.encoding()) {
            return Err(SignerError::UnsupportedEncoding(envelope.encoding()));
        }
        let payer = self.public_key();
        match envelope.fee_payer() {
            Some(fee_payer) if fee_payer == payer => {}
            Some(fee_payer) => {
                return Err(SignerError::Failed(format!(
                    "transaction fee payer {} does not match signer {}",
                    fee_payer, payer
                )));
            }
            None => return Err(SignerError::Failed("transaction has no fee payer".to_string())),
        }

        // fails when the message needs signers other than the fee payer
        let signed = VersionedTransaction::try_new(envelope.transaction().message.clone(), &[&self.keypair])
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        let wire = serialize(&signed).map_err(|e| SignerError::Failed(e.to_string()))?;
        let signature = signed
            .signatures
            .first()
            .copied()
            .ok_or_else(|| SignerError::Failed("signed transaction carries no signature".to_string()))?;
        debug!(encoding = %envelope.encoding(), payer = %payer, "Signed transaction");

        Ok(SignedTransaction {
            signature: signature.into(),
            wire,
        })
    }
}

/// Parse a base58-encoded private key: a 32-byte seed or a 64-byte keypair
pub fn signing_key_from_base58(secret: &SecretString) -> Result<SigningKey, ConfigError> {
    let key_bytes = bs58::decode(secret.expose_secret())
        .into_vec()
        .map_err(|e| ConfigError::invalid("SOLANA_PAYER_KEYPAIR", e.to_string()))?;

    match key_bytes.len() {
        32 => {
            let seed: [u8; 32] = key_bytes
                .as_slice()
                .try_into()
                .map_err(|_| ConfigError::invalid("SOLANA_PAYER_KEYPAIR", "invalid seed"))?;
            Ok(SigningKey::from_bytes(&seed))
        }
        64 => {
            let keypair: [u8; 64] = key_bytes
                .as_slice()
                .try_into()
                .map_err(|_| ConfigError::invalid("SOLANA_PAYER_KEYPAIR", "invalid keypair"))?;
            // checks that the public half matches the secret half
            SigningKey::from_keypair_bytes(&keypair)
                .map_err(|e| ConfigError::invalid("SOLANA_PAYER_KEYPAIR", e.to_string()))
        }
        n => Err(ConfigError::invalid(
            "SOLANA_PAYER_KEYPAIR",
            format!("Key must be 32 or 64 bytes, got {}", n),
        )),
    }
}
