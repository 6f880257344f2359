// vim: tw=80
//! Caller-visible logical commands

use divbuf::DivBufShared;
use thiserror::Error;

use crate::{
    command::CtxOp,
    geometry::LegacyAddr,
    types::*
};

/// A logical, possibly multi-address, asynchronous command.
///
/// Submission moves the context into the device; it comes back, annotated,
/// from [`Device::reap`](crate::device::Device::reap).  `status` and `result`
/// are written only when a constituent request fails, so they stay zero on
/// success.
#[derive(Debug, Default)]
pub struct CmdCtx {
    pub addrs: Vec<LegacyAddr>,
    /// One sector per address
    pub data: Option<DivBufShared>,
    /// One sector's worth of metadata per address
    pub meta: Option<DivBufShared>,
    /// Caller's cookie.  Never interpreted.
    pub private: u64,
    pub opcode: Option<CtxOp>,
    pub status: u64,
    pub result: u32,
}

impl CmdCtx {
    pub fn new(addrs: Vec<LegacyAddr>) -> Self {
        CmdCtx { addrs, ..Default::default() }
    }

    pub fn with_data(mut self, data: DivBufShared) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_meta(mut self, meta: DivBufShared) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_private(mut self, private: u64) -> Self {
        self.private = private;
        self
    }

    pub fn ret(&self) -> NvmRet {
        NvmRet::new(self.status, self.result)
    }

    /// Did any constituent request fail?
    pub fn is_err(&self) -> bool {
        self.ret().is_err()
    }
}

/// A logical command that could not be submitted, returned to its owner
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
    pub error: Error,
    pub ctx: CmdCtx,
}

impl Rejected {
    pub fn new(error: Error, ctx: CmdCtx) -> Self {
        Rejected { error, ctx }
    }
}

pub type SubmitResult = ::std::result::Result<(), Rejected>;

// LCOV_EXCL_STOP
