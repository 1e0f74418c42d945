use corten_models::abci::{
    CheckTxKind, RequestBeginBlock, RequestInfo, RequestInitChain, ResponseBeginBlock,
    ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseEndBlock, ResponseInfo,
    ResponseInitChain,
};
use corten_models::block::Tx;
use corten_models::Height;

/// The replicated application, driven through the request/response surface
/// of ABCI 0.35. Implementations are free to use interior mutability; the
/// executor serializes all calls, preserving block order for `deliver_tx`.
pub trait Application: Send + Sync {
    /// Query application identity and last committed height.
    fn info(&self, request: RequestInfo) -> ResponseInfo;

    /// Initialize a fresh chain from the genesis document.
    fn init_chain(&self, request: RequestInitChain) -> ResponseInitChain;

    /// Signal the start of a block's execution.
    fn begin_block(&self, request: RequestBeginBlock) -> ResponseBeginBlock;

    /// Execute one transaction. A non-OK code marks the transaction invalid
    /// but does not fail the block.
    fn deliver_tx(&self, tx: &Tx) -> ResponseDeliverTx;

    /// Signal the end of a block's execution, collecting validator and
    /// parameter updates.
    fn end_block(&self, height: Height) -> ResponseEndBlock;

    /// Commit the executed block, returning the new application hash and the
    /// retain height for pruning.
    fn commit(&self) -> ResponseCommit;

    /// Validate a transaction for mempool admission.
    fn check_tx(&self, tx: &Tx, kind: CheckTxKind) -> ResponseCheckTx;
}
