// vim: tw=80
//! Per-device I/O context shared by every device profile

use crate::{
    chunk::{self, ChunkReport, ChunkState},
    command::{Command, CtxOp},
    ctx::{CmdCtx, SubmitResult},
    geometry::{Geometry, NativeAddr},
    join::Join,
    transport::{ReqBody, Transport},
    types::*,
    util::*
};

/// An open device's geometry, transport, and in-flight asynchronous state
pub struct Port {
    pub(crate) geo: Geometry,
    pub(crate) io: Box<dyn Transport>,
    pub(crate) join: Join,
}

impl Port {
    pub fn new(geo: Geometry, io: Box<dyn Transport>) -> Self {
        Port { geo, io, join: Join::default() }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn read_sector(&mut self, addr: NativeAddr, data: &mut [u8],
                       meta: &mut [u8]) -> Result<()>
    {
        let cmd = Command::Read {
            addr: self.geo.to_device(addr),
            lba: FAKE_LBA
        };
        self.io.io_recv(&cmd, data, meta)?.check().map(drop)
    }

    pub fn write_sector(&mut self, addr: NativeAddr, data: &[u8], meta: &[u8])
        -> Result<()>
    {
        let cmd = Command::Write {
            addr: self.geo.to_device(addr),
            lba: FAKE_LBA
        };
        self.io.io_send(&cmd, data, meta)?.check().map(drop)
    }

    /// Physically reset one chunk
    pub fn reset(&mut self, addr: NativeAddr) -> Result<()> {
        let cmd = Command::ChunkReset {
            addr: self.geo.to_device(addr.with_sector(0)),
            kind: PHY_RESET
        };
        self.io.io_send(&cmd, &[], &[])?.check().map(drop)
    }

    /// Fetch a fresh chunk report for one LUN, or for the whole device
    pub fn report(&mut self, lun: Option<(u32, u32)>) -> Result<ChunkReport> {
        ChunkReport::fetch(&mut *self.io, &self.geo, lun)
    }

    /// Live state of one chunk
    pub fn chunk_state(&mut self, addr: NativeAddr) -> Result<ChunkState> {
        chunk::describe(&mut *self.io, &self.geo, addr).map(|d| d.state)
    }

    /// Live write pointer of one chunk
    pub fn write_pointer(&mut self, addr: NativeAddr) -> Result<u64> {
        chunk::describe(&mut *self.io, &self.geo, addr).map(|d| d.wp)
    }

    pub fn submit(&mut self, ctx: CmdCtx, op: CtxOp, bodies: Vec<ReqBody>)
        -> SubmitResult
    {
        self.join.submit(&mut *self.io, ctx, op, bodies)
    }

    /// Finish a logical command without any device request
    pub fn complete(&mut self, ctx: CmdCtx, op: CtxOp) {
        self.join.complete(ctx, op)
    }

    pub fn reap(&mut self, min: usize, max: usize) -> Result<Vec<CmdCtx>> {
        self.join.reap(&mut *self.io, min, max)
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("geo", &self.geo)
            .field("join", &self.join)
            .finish()
    }
}

// LCOV_EXCL_STOP
