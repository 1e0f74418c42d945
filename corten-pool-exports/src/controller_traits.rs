use crate::error::PoolResult;
use corten_models::abci::{ResponseCheckTx, ResponseDeliverTx};
use corten_models::block::Tx;
use corten_models::evidence::{Evidence, EvidenceList};
use corten_models::state::State;
use corten_models::vote::Vote;
use corten_models::Height;
use std::sync::Arc;

/// Synchronous admission filter run before the application sees a
/// transaction.
pub type PrecheckFn = Arc<dyn Fn(&Tx) -> bool + Send + Sync>;

/// Filter run over the application's check response before admission.
pub type PostcheckFn = Arc<dyn Fn(&Tx, &ResponseCheckTx) -> bool + Send + Sync>;

/// Handle on the transaction pool.
pub trait TxPoolController: Send + Sync {
    /// Validate and admit one transaction.
    fn check_tx(&self, tx: Tx) -> PoolResult<ResponseCheckTx>;

    /// Collect transactions for a proposal, descending by gas, bounded by
    /// total bytes and total gas.
    fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Tx>;

    /// Collect up to `count` transactions in queue order.
    fn reap_max_txs(&self, count: usize) -> Vec<Tx>;

    /// Remove committed transactions, expire by TTL, and optionally recheck
    /// the remainder after a block commits.
    fn update(
        &self,
        height: Height,
        committed_txs: &[Tx],
        responses: &[ResponseDeliverTx],
        precheck: Option<PrecheckFn>,
        postcheck: Option<PostcheckFn>,
    ) -> PoolResult<()>;

    /// Number of pooled transactions.
    fn size(&self) -> usize;

    /// Total pooled bytes.
    fn size_bytes(&self) -> u64;
}

/// Handle on the evidence pool.
pub trait EvidencePoolController: Send + Sync {
    /// Pending evidence oldest-first, bounded by total canonical bytes.
    /// Returns the evidence and the bytes used.
    fn pending_evidence(&self, max_bytes: i64) -> (Vec<Evidence>, i64);

    /// Verify and stage evidence received from a peer or a block.
    fn add_evidence(&self, evidence: Evidence) -> PoolResult<()>;

    /// Verify the evidence list of a proposed block.
    fn check_evidence(&self, list: &EvidenceList) -> PoolResult<()>;

    /// Advance to a new committed state: flush buffered conflicting votes,
    /// mark included evidence committed, and expire the rest.
    fn update(&self, state: &State, committed: &EvidenceList) -> PoolResult<()>;

    /// Stage a conflicting vote pair observed by a vote set. Turned into
    /// evidence at the next state update, when the offending height's
    /// context is known.
    fn report_conflicting_votes(&self, vote_a: Vote, vote_b: Vote);

    /// Number of pending evidence items.
    fn size(&self) -> usize;
}
