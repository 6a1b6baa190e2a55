//! Polls signature status until the commitment level is reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::domain::{ConfirmationOutcome, Signature, TxSignature};
use crate::infra::rpc::RpcClient;

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ConfirmationWatcher {
    rpc: Arc<RpcClient>,
    poll_interval: Duration,
}

impl ConfirmationWatcher {
    #[must_use]
    pub fn new(rpc: Arc<RpcClient>, poll_interval: Duration) -> Self {
        Self { rpc, poll_interval }
    }

    /// Simulated signatures return immediately without touching the network.
    /// `last_valid_block_height` lets polling stop early once the transaction
    /// can no longer land.
    pub async fn confirm(
        &self,
        signature: &TxSignature,
        timeout: Duration,
        last_valid_block_height: Option<u64>,
    ) -> ConfirmationOutcome {
        match signature {
            TxSignature::Simulated(simulated) => {
                debug!(signature = %simulated, "Simulated signature, nothing to confirm");
                ConfirmationOutcome::Simulated
            }
            TxSignature::Real(signature) => {
                self.confirm_signature(signature, timeout, last_valid_block_height)
                    .await
            }
        }
    }

    #[instrument(skip(self), fields(signature = %signature))]
    async fn confirm_signature(
        &self,
        signature: &Signature,
        timeout: Duration,
        last_valid_block_height: Option<u64>,
    ) -> ConfirmationOutcome {
        let deadline = Instant::now() + timeout;
        match timeout_at(deadline, self.poll(signature, last_valid_block_height)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Confirmation timed out");
                ConfirmationOutcome::TimedOut
            }
        }
    }

    async fn poll(&self, signature: &Signature, last_valid_block_height: Option<u64>) -> ConfirmationOutcome {
        let commitment = self.rpc.commitment();
        loop {
            // read the height before the status so a late landing is never
            // mistaken for expiry
            let expired = match last_valid_block_height {
                Some(limit) => match self.rpc.get_block_height().await {
                    Ok(height) => height > limit,
                    Err(e) => {
                        warn!(error = %e, "Block height check failed");
                        false
                    }
                },
                None => false,
            };

            match self.rpc.get_signature_statuses(&[signature.as_str()]).await {
                Ok(statuses) => match statuses.into_iter().next().flatten() {
                    Some(status) => {
                        if let Some(err) = status.err {
                            warn!(slot = status.slot, error = %err, "Transaction failed on-chain");
                            return ConfirmationOutcome::OnChainError(err.to_string());
                        }
                        if status.satisfies(commitment) {
                            info!(slot = status.slot, "Transaction confirmed");
                            return ConfirmationOutcome::Finalized { slot: status.slot };
                        }
                        debug!(status = ?status.confirmation_status, "Transaction seen, waiting for commitment");
                    }
                    None if expired => {
                        warn!(?last_valid_block_height, "Blockhash expired before the transaction landed");
                        return ConfirmationOutcome::BlockhashExpired;
                    }
                    None => debug!("Transaction not yet visible"),
                },
                Err(e) => warn!(error = %e, "Error checking transaction status"),
            }
            sleep(self.poll_interval).await;
        }
    }
}
