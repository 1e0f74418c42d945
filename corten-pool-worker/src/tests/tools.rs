//! Shared fixtures for the pool tests.

use corten_execution_exports::Application;
use corten_models::abci::{
    CheckTxKind, RequestBeginBlock, RequestInfo, RequestInitChain, ResponseBeginBlock,
    ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseEndBlock, ResponseInfo,
    ResponseInitChain, CODE_TYPE_OK,
};
use corten_models::block::Tx;
use corten_models::Height;
use std::sync::atomic::{AtomicBool, Ordering};

/// Application stub whose `check_tx` derives (sender, nonce, gas) from the
/// first three transaction bytes.
#[derive(Default)]
pub struct StubApp {
    /// When set, every check (including rechecks) fails.
    pub reject_all: AtomicBool,
}

impl StubApp {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build a transaction the stub understands.
pub fn stub_tx(sender: u8, nonce: u8, gas: u8) -> Tx {
    Tx(vec![sender, nonce, gas])
}

impl Application for StubApp {
    fn info(&self, _request: RequestInfo) -> ResponseInfo {
        ResponseInfo::default()
    }

    fn init_chain(&self, _request: RequestInitChain) -> ResponseInitChain {
        ResponseInitChain::default()
    }

    fn begin_block(&self, _request: RequestBeginBlock) -> ResponseBeginBlock {
        ResponseBeginBlock::default()
    }

    fn deliver_tx(&self, _tx: &Tx) -> ResponseDeliverTx {
        ResponseDeliverTx::default()
    }

    fn end_block(&self, _height: Height) -> ResponseEndBlock {
        ResponseEndBlock::default()
    }

    fn commit(&self) -> ResponseCommit {
        ResponseCommit::default()
    }

    fn check_tx(&self, tx: &Tx, _kind: CheckTxKind) -> ResponseCheckTx {
        if self.reject_all.load(Ordering::Relaxed) {
            return ResponseCheckTx {
                code: 1,
                ..Default::default()
            };
        }
        let bytes = tx.as_bytes();
        ResponseCheckTx {
            code: CODE_TYPE_OK,
            sender: format!("sender-{}", bytes.first().copied().unwrap_or(0)),
            nonce: bytes.get(1).copied().unwrap_or(0) as u64,
            gas_wanted: bytes.get(2).copied().unwrap_or(1) as i64,
            ..Default::default()
        }
    }
}
