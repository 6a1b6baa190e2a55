//! Signing and submission, with the degraded path for encodings the
//! signing integration cannot handle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::lifecycle::TradeLifecycle;
use crate::domain::{
    AppError, EncodingVariant, RpcError, Signature, SignerError, SimulatedSignature, TradeState,
    TransactionEnvelope, TransactionSigner,
};
use crate::infra::rpc::RpcClient;

pub const DEFAULT_SIMULATED_LATENCY: Duration = Duration::from_millis(1500);

/// How an envelope left the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Submitted(Signature),
    /// Submission failed after an attempt that may have been accepted;
    /// the signed transaction has to be watched before giving up on it
    InDoubt { signature: Signature, error: RpcError },
    /// Nothing reached the network
    Simulated {
        signature: SimulatedSignature,
        encoding: EncodingVariant,
    },
}

/// Dispatch failure, with the signature when signing got that far
#[derive(Debug)]
pub struct DispatchError {
    pub error: AppError,
    pub signature: Option<Signature>,
}

impl From<AppError> for DispatchError {
    fn from(error: AppError) -> Self {
        Self { error, signature: None }
    }
}

pub struct TransactionDispatcher {
    rpc: Arc<RpcClient>,
    simulated_latency: Duration,
    skip_preflight: bool,
}

impl TransactionDispatcher {
    #[must_use]
    pub fn new(rpc: Arc<RpcClient>, simulated_latency: Duration, skip_preflight: bool) -> Self {
        Self {
            rpc,
            simulated_latency,
            skip_preflight,
        }
    }

    /// Check the encoding, sign, and submit through the RPC stack.
    ///
    /// Advances `lifecycle` through `Signing` and `Submitted`, or into
    /// `DegradedSimulated` when the signer cannot handle the encoding.
    /// Errors leave the lifecycle where it was for the caller to fail.
    /// A submission that may have landed is `Submitted` and reported as
    /// [`Dispatch::InDoubt`].
    #[instrument(skip_all, fields(attempt_id = %lifecycle.attempt_id(), encoding = %envelope.encoding()))]
    pub async fn dispatch(
        &self,
        envelope: &TransactionEnvelope,
        signer: &dyn TransactionSigner,
        lifecycle: &mut TradeLifecycle,
    ) -> Result<Dispatch, DispatchError> {
        let encoding = envelope.encoding();
        if !signer.supports(encoding) {
            info!("Signer does not support this encoding, taking the simulated path");
            lifecycle.advance(TradeState::DegradedSimulated);
            return Ok(self.simulate(envelope, lifecycle).await);
        }

        lifecycle.advance(TradeState::Signing);
        let signed = match signer.sign(envelope).await {
            Ok(signed) => signed,
            Err(SignerError::UnsupportedEncoding(reported)) => {
                warn!(reported = %reported, "Signer refused the encoding while signing, taking the simulated path");
                lifecycle.advance(TradeState::DegradedSimulated);
                return Ok(self.simulate(envelope, lifecycle).await);
            }
            Err(e) => {
                warn!(error = %e, "Signing did not complete");
                return Err(AppError::from(e).into());
            }
        };

        let submission = self.rpc.submit_transaction(&signed.wire, self.skip_preflight).await;
        let signature = match submission.result {
            Ok(signature) => signature,
            Err(error) if submission.maybe_delivered => {
                warn!(
                    signature = %signed.signature,
                    error = %error,
                    "Submission failed but may have landed, watching the signed transaction"
                );
                lifecycle.advance(TradeState::Submitted);
                return Ok(Dispatch::InDoubt {
                    signature: signed.signature,
                    error,
                });
            }
            Err(error) => {
                return Err(DispatchError {
                    error: error.into(),
                    signature: Some(signed.signature),
                });
            }
        };
        if signature != signed.signature {
            warn!(
                expected = %signed.signature,
                returned = %signature,
                "Node returned a different signature than the one signed"
            );
        }
        lifecycle.advance(TradeState::Submitted);
        Ok(Dispatch::Submitted(signature))
    }

    async fn simulate(&self, envelope: &TransactionEnvelope, lifecycle: &TradeLifecycle) -> Dispatch {
        tokio::time::sleep(self.simulated_latency).await;
        let signature = SimulatedSignature::derive(envelope.raw(), lifecycle.attempt_id());
        info!(signature = %signature, "Simulated dispatch");
        Dispatch::Simulated {
            signature,
            encoding: envelope.encoding(),
        }
    }
}
