// vim: tw=80
//! The capability surface of an open OCSSD

use crate::{
    bbt::{Bbt, BbtState},
    chunk::ChunkReport,
    ctx::{CmdCtx, SubmitResult},
    geometry::{Geometry, LegacyAddr},
    line::Line,
    port::Port,
    profile::{DeviceProfile, Profile, ProfileKind},
    transport::{Identify, Transport},
    types::*
};

/// An open device: its transport plus the profile recognized at open time.
///
/// Every operation takes legacy addresses and is routed to the profile.
/// Operations the profile lacks fail with [`Error::NotSupported`].
#[derive(Debug)]
pub struct Device {
    port: Port,
    profile: Profile,
}

impl Device {
    /// Identify the device and pick a profile from its model number
    pub fn open(mut io: Box<dyn Transport>) -> Result<Self> {
        let id = io.identify()?;
        let kind = ProfileKind::recognize(&id).ok_or_else(|| {
            tracing::warn!(model = %id.model, "unrecognized device model");
            Error::NoDevice
        })?;
        Self::attach(io, id, kind)
    }

    /// Open the device with a specific profile, whatever its model number
    pub fn open_as(mut io: Box<dyn Transport>, kind: ProfileKind)
        -> Result<Self>
    {
        let id = io.identify()?;
        Self::attach(io, id, kind)
    }

    fn attach(io: Box<dyn Transport>, id: Identify, kind: ProfileKind)
        -> Result<Self>
    {
        id.geometry.validate()?;
        let mut port = Port::new(id.geometry, io);
        let profile = kind.init(&mut port)?;
        tracing::info!(model = %id.model, profile = profile.name(), "opened");
        Ok(Device { port, profile })
    }

    pub fn geometry(&self) -> &Geometry {
        self.port.geometry()
    }

    /// Name of the recognized profile
    pub fn profile(&self) -> &'static str {
        self.profile.name()
    }

    #[tracing::instrument(skip(self, data, meta))]
    pub fn read(&mut self, addrs: &[LegacyAddr], data: &mut [u8],
                meta: &mut [u8]) -> Result<()>
    {
        self.profile.read(&mut self.port, addrs, data, meta)
    }

    #[tracing::instrument(skip(self, data, meta))]
    pub fn write(&mut self, addrs: &[LegacyAddr], data: &[u8], meta: &[u8])
        -> Result<()>
    {
        self.profile.write(&mut self.port, addrs, data, meta)
    }

    #[tracing::instrument(skip(self, data, meta))]
    pub fn protected_write(&mut self, addrs: &[LegacyAddr], data: &[u8],
                           meta: &[u8]) -> Result<()>
    {
        self.profile.protected_write(&mut self.port, addrs, data, meta)
    }

    #[tracing::instrument(skip(self))]
    pub fn erase(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.erase(&mut self.port, addrs)
    }

    /// Erase the superblocks named by `addrs`.  Each must be on channel 0,
    /// LUN 0, page 0.
    #[tracing::instrument(skip(self))]
    pub fn erase_sb(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.erase_sb(&mut self.port, addrs)
    }

    /// Start parity protection for each address's line, with the parity chunk
    /// on that address's LUN
    #[tracing::instrument(skip(self))]
    pub fn parity_init(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.parity_init(&mut self.port, addrs)
    }

    /// Complete every stripe of each address's line
    #[tracing::instrument(skip(self))]
    pub fn parity_out(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.parity_out(&mut self.port, addrs)
    }

    pub fn read_reserved(&mut self, nsectors: usize, data: &mut [u8])
        -> Result<()>
    {
        self.profile.read_reserved(&mut self.port, nsectors, data)
    }

    pub fn write_reserved(&mut self, nsectors: usize, data: &[u8])
        -> Result<()>
    {
        self.profile.write_reserved(&mut self.port, nsectors, data)
    }

    pub fn inject_read_failed(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.inject_read_failed(&mut self.port, addrs)
    }

    pub fn inject_write_failed(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.inject_write_failed(&mut self.port, addrs)
    }

    pub fn inject_erase_failed(&mut self, addrs: &[LegacyAddr]) -> Result<()> {
        self.profile.inject_erase_failed(&mut self.port, addrs)
    }

    pub fn error_injection_pending(&mut self) -> Result<bool> {
        self.profile.error_injection_pending(&mut self.port)
    }

    pub fn async_read(&mut self, ctx: CmdCtx) -> SubmitResult {
        self.profile.async_read(&mut self.port, ctx)
    }

    pub fn async_protected_write(&mut self, ctx: CmdCtx) -> SubmitResult {
        self.profile.async_protected_write(&mut self.port, ctx)
    }

    pub fn async_erase_sb(&mut self, ctx: CmdCtx) -> SubmitResult {
        self.profile.async_erase_sb(&mut self.port, ctx)
    }

    pub fn async_parity_init(&mut self, ctx: CmdCtx) -> SubmitResult {
        self.profile.async_parity_init(&mut self.port, ctx)
    }

    pub fn async_parity_out(&mut self, ctx: CmdCtx) -> SubmitResult {
        self.profile.async_parity_out(&mut self.port, ctx)
    }

    /// Collect up to `max` finished asynchronous commands, waiting for at
    /// least `min` device completions
    pub fn reap(&mut self, min: usize, max: usize) -> Result<Vec<CmdCtx>> {
        self.profile.reap(&mut self.port, min, max)
    }

    /// Chunk report for the LUN of `addr`, or for the whole device
    pub fn chunk_report(&mut self, addr: Option<LegacyAddr>)
        -> Result<ChunkReport>
    {
        let lun = addr.map(|a| (a.ch, a.lun));
        self.profile.chunk_report(&mut self.port, lun)
    }

    /// Bad-block table of the LUN of `addr`
    pub fn get_bbt(&mut self, addr: LegacyAddr) -> Result<Bbt> {
        self.profile.get_bbt(&mut self.port, addr.ch, addr.lun)
    }

    /// Overwrite the bad-block table entries of the chunks of `addrs`
    #[tracing::instrument(skip(self))]
    pub fn set_bbt(&mut self, addrs: &[LegacyAddr], state: BbtState)
        -> Result<()>
    {
        self.profile.set_bbt(&mut self.port, addrs, state)
    }

    /// The line through the chunk of `addr`.  A line already used by a parity
    /// operation is returned as cached.
    pub fn line(&mut self, addr: LegacyAddr) -> Result<Line> {
        self.port.geo.check_legacy(addr)?;
        let chunk = self.port.geo.to_native(addr).chunk;
        self.profile.line(&mut self.port, chunk)
    }

    /// Number of asynchronous commands not yet reaped
    pub fn inflight(&self) -> usize {
        self.port.join.inflight()
    }
}

// LCOV_EXCL_STOP
