//! Waiting for submitted transactions to reach a confirmation depth

use std::{future::Future, time::Duration};

use alloy::primitives::TxHash;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use crate::{
    chain::{ChainClient, Receipt, ReceiptStatus},
    constants::{DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL},
    errors::DeployError,
};

/// The number of consecutive polls a transaction may be unknown to the node
/// before it is declared lost. Load-balanced endpoints can briefly miss a
/// transaction that another backend has already accepted.
const MAX_DROPPED_POLLS: usize = 3;

/// Polls the chain until transactions are buried deep enough
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationWaiter {
    /// How long to wait for a single transaction before giving up
    pub timeout: Duration,
    /// The delay between polls
    pub poll_interval: Duration,
}

impl Default for ConfirmationWaiter {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ConfirmationWaiter {
    /// Construct a waiter with the given deadline and poll interval
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self { timeout, poll_interval }
    }

    /// Wait until `tx_hash` has at least `min_confirmations` confirmations.
    ///
    /// The block including the transaction counts as its first confirmation.
    /// A receipt with a failed status is returned as
    /// [`DeployError::TransactionReverted`] as soon as it is seen. Every query
    /// of the chain is bounded by the deadline, so an unresponsive endpoint
    /// also ends in [`DeployError::ChainTimeout`].
    pub async fn await_confirmations<C: ChainClient>(
        &self,
        client: &C,
        tx_hash: TxHash,
        min_confirmations: u64,
    ) -> Result<Receipt, DeployError> {
        if min_confirmations == 0 {
            return Err(DeployError::Configuration(
                "confirmation depth must be at least 1".to_string(),
            ));
        }

        let start = Instant::now();
        let deadline = start + self.timeout;
        let timed_out = || DeployError::ChainTimeout { tx_hash, waited: start.elapsed() };
        let mut dropped_polls = 0;

        loop {
            match before(deadline, client.get_receipt(tx_hash)).await.ok_or_else(timed_out)?? {
                ReceiptStatus::Included(receipt) => {
                    dropped_polls = 0;
                    if !receipt.success {
                        let lookup = before(deadline, client.revert_reason(&receipt)).await;
                        let reason = match lookup {
                            Some(Ok(reason)) => reason,
                            Some(Err(e)) => {
                                warn!("could not fetch the revert reason of {tx_hash:#x}: {e}");
                                None
                            }
                            None => None,
                        };
                        return Err(DeployError::TransactionReverted { tx_hash, reason });
                    }

                    let head =
                        before(deadline, client.block_number()).await.ok_or_else(timed_out)??;
                    let confirmations = confirmations_at(head, receipt.block_number);
                    if confirmations >= min_confirmations {
                        debug!(
                            "{tx_hash:#x} confirmed in block {} ({confirmations} confirmations)",
                            receipt.block_number
                        );
                        return Ok(receipt);
                    }
                    debug!("{tx_hash:#x}: {confirmations}/{min_confirmations} confirmations");
                }
                ReceiptStatus::Pending => {
                    dropped_polls = 0;
                    debug!("{tx_hash:#x} pending");
                }
                ReceiptStatus::Dropped => {
                    dropped_polls += 1;
                    warn!("{tx_hash:#x} unknown to the node ({dropped_polls}/{MAX_DROPPED_POLLS})");
                    if dropped_polls >= MAX_DROPPED_POLLS {
                        return Err(DeployError::TransactionLost { tx_hash });
                    }
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(timed_out());
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Run `fut` to completion unless `deadline` passes first
async fn before<T>(deadline: Instant, fut: impl Future<Output = T>) -> Option<T> {
    timeout_at(deadline, fut).await.ok()
}

/// The confirmations of a transaction included in `block` when the head is `head`
fn confirmations_at(head: u64, block: u64) -> u64 {
    (head + 1).saturating_sub(block)
}
