// vim: tw=80
//! Device profiles
//!
//! Each supported device model implements some subset of [`DeviceProfile`].
//! The profile is chosen once, when the device is opened, and never changes.

use enum_dispatch::enum_dispatch;
use itertools::iproduct;

use crate::{
    bbt::{Bbt, BbtState},
    chunk::{ChunkReport, ChunkState},
    command::{Command, CtxOp},
    ctx::{CmdCtx, Rejected, SubmitResult},
    geometry::{Geometry, LegacyAddr, NativeAddr},
    line::Line,
    port::Port,
    transport::{Identify, ReqBody, ReqBuf},
    types::*,
    util::*
};

mod apple;
mod banana;

pub use self::apple::Apple;
pub use self::banana::Banana;

/// Every capability a device profile may offer.  Anything a profile doesn't
/// override is [`Error::NotSupported`].
#[enum_dispatch]
pub trait DeviceProfile {
    /// Human-readable name of the profile
    fn name(&self) -> &'static str;

    fn read(&mut self, _port: &mut Port, _addrs: &[LegacyAddr],
            _data: &mut [u8], _meta: &mut [u8]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    fn write(&mut self, _port: &mut Port, _addrs: &[LegacyAddr],
             _data: &[u8], _meta: &[u8]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// Write sectors of a line that is under parity protection
    fn protected_write(&mut self, _port: &mut Port, _addrs: &[LegacyAddr],
                       _data: &[u8], _meta: &[u8]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    fn erase(&mut self, _port: &mut Port, _addrs: &[LegacyAddr])
        -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// Erase every chunk sharing the chunk index of each address
    fn erase_sb(&mut self, _port: &mut Port, _addrs: &[LegacyAddr])
        -> Result<()>
    {
        Err(Error::NotSupported)
    }

    fn parity_init(&mut self, _port: &mut Port, _addrs: &[LegacyAddr])
        -> Result<()>
    {
        Err(Error::NotSupported)
    }

    fn parity_out(&mut self, _port: &mut Port, _addrs: &[LegacyAddr])
        -> Result<()>
    {
        Err(Error::NotSupported)
    }

    fn read_reserved(&mut self, _port: &mut Port, _nsectors: usize,
                     _data: &mut [u8]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    fn write_reserved(&mut self, _port: &mut Port, _nsectors: usize,
                      _data: &[u8]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// Make the next read of each sector fail as uncorrectable
    fn inject_read_failed(&mut self, _port: &mut Port, _addrs: &[LegacyAddr])
        -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// Make the next program of each address's die fail
    fn inject_write_failed(&mut self, _port: &mut Port,
                           _addrs: &[LegacyAddr]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// Make the next reset of each chunk fail
    fn inject_erase_failed(&mut self, _port: &mut Port,
                           _addrs: &[LegacyAddr]) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// Is an injected failure still waiting to trigger?
    fn error_injection_pending(&mut self, _port: &mut Port) -> Result<bool> {
        Err(Error::NotSupported)
    }

    fn async_read(&mut self, _port: &mut Port, ctx: CmdCtx) -> SubmitResult {
        Err(Rejected::new(Error::NotSupported, ctx))
    }

    fn async_protected_write(&mut self, _port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        Err(Rejected::new(Error::NotSupported, ctx))
    }

    fn async_erase_sb(&mut self, _port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        Err(Rejected::new(Error::NotSupported, ctx))
    }

    fn async_parity_init(&mut self, _port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        Err(Rejected::new(Error::NotSupported, ctx))
    }

    fn async_parity_out(&mut self, _port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        Err(Rejected::new(Error::NotSupported, ctx))
    }

    fn reap(&mut self, _port: &mut Port, _min: usize, _max: usize)
        -> Result<Vec<CmdCtx>>
    {
        Err(Error::NotSupported)
    }

    /// Chunk report for one LUN, or for the whole device
    fn chunk_report(&mut self, _port: &mut Port, _lun: Option<(u32, u32)>)
        -> Result<ChunkReport>
    {
        Err(Error::NotSupported)
    }

    fn get_bbt(&mut self, _port: &mut Port, _group: u32, _unit: u32)
        -> Result<Bbt>
    {
        Err(Error::NotSupported)
    }

    fn set_bbt(&mut self, _port: &mut Port, _addrs: &[LegacyAddr],
               _state: BbtState) -> Result<()>
    {
        Err(Error::NotSupported)
    }

    /// The line at one chunk index, as parity operations would use it
    fn line(&mut self, _port: &mut Port, _chunk: u32) -> Result<Line> {
        Err(Error::NotSupported)
    }
}

/// The profile of an open device
#[enum_dispatch(DeviceProfile)]
#[derive(Debug)]
pub enum Profile {
    Banana,
    Apple,
}

/// Models that have a profile
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProfileKind {
    Banana,
    Apple,
}

impl ProfileKind {
    /// Pick a profile from the model number in the identify data
    pub fn recognize(id: &Identify) -> Option<Self> {
        let model = id.model.trim().to_ascii_uppercase();
        if model.starts_with("BANANA") {
            Some(ProfileKind::Banana)
        } else if model.starts_with("APPLE") {
            Some(ProfileKind::Apple)
        } else {
            None
        }
    }

    /// Build the profile's in-memory state for a freshly opened device
    pub fn init(self, port: &mut Port) -> Result<Profile> {
        Ok(match self {
            ProfileKind::Banana => Banana::new(port)?.into(),
            ProfileKind::Apple => Apple::default().into(),
        })
    }
}

impl std::str::FromStr for ProfileKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "banana" => Ok(ProfileKind::Banana),
            "apple" => Ok(ProfileKind::Apple),
            _ => Err(Error::InvalidArgument)
        }
    }
}

/// Validate and translate a list of legacy addresses
fn natives(geo: &Geometry, addrs: &[LegacyAddr]) -> Result<Vec<NativeAddr>> {
    let mut v = Vec::new();
    v.try_reserve_exact(addrs.len())?;
    for a in addrs {
        geo.check_legacy(*a)?;
        v.push(geo.to_native(*a));
    }
    Ok(v)
}

/// Check that `len` bytes hold one `per` sized piece for each of `n` sectors
fn check_len(len: usize, n: usize, per: u32) -> Result<()> {
    if len < n * per as usize {
        Err(Error::InvalidArgument)
    } else {
        Ok(())
    }
}

/// One read per address.  `meta` may be empty.  Stops at the first failure.
fn read_sectors(port: &mut Port, addrs: &[LegacyAddr], data: &mut [u8],
                meta: &mut [u8]) -> Result<()>
{
    let nbytes = port.geo.nbytes as usize;
    let noob = port.geo.nbytes_oob as usize;
    check_len(data.len(), addrs.len(), port.geo.nbytes)?;
    if !meta.is_empty() {
        check_len(meta.len(), addrs.len(), port.geo.nbytes_oob)?;
    }
    for (i, addr) in natives(&port.geo, addrs)?.into_iter().enumerate() {
        let d = &mut data[i * nbytes..(i + 1) * nbytes];
        // An empty meta buffer stays empty
        let m = meta.get_mut(i * noob..(i + 1) * noob).unwrap_or_default();
        port.read_sector(addr, d, m)?;
    }
    Ok(())
}

/// One write per address.  `meta` may be empty.  Stops at the first failure.
fn write_sectors(port: &mut Port, addrs: &[LegacyAddr], data: &[u8],
                 meta: &[u8]) -> Result<()>
{
    let nbytes = port.geo.nbytes as usize;
    let noob = port.geo.nbytes_oob as usize;
    check_len(data.len(), addrs.len(), port.geo.nbytes)?;
    if !meta.is_empty() {
        check_len(meta.len(), addrs.len(), port.geo.nbytes_oob)?;
    }
    for (i, addr) in natives(&port.geo, addrs)?.into_iter().enumerate() {
        let d = &data[i * nbytes..(i + 1) * nbytes];
        let m = meta.get(i * noob..(i + 1) * noob).unwrap_or_default();
        port.write_sector(addr, d, m)?;
    }
    Ok(())
}

fn erase_chunks(port: &mut Port, addrs: &[LegacyAddr]) -> Result<()> {
    for addr in natives(&port.geo, addrs)? {
        port.reset(addr)?;
    }
    Ok(())
}

/// Validate a superblock address and return its chunk index
fn superblock(geo: &Geometry, addr: &LegacyAddr) -> Result<u32> {
    if addr.ch != 0 || addr.lun != 0 || addr.pg != 0 {
        return Err(Error::InvalidAddress);
    }
    geo.check_legacy(*addr)?;
    Ok(geo.to_native(*addr).chunk)
}

/// Every chunk at the superblock's index that should be reset.
///
/// `skip_bad` says whether a chunk is known bad without asking the device.
/// Chunks whose live state is FREE, OPEN, or OFFLINE are skipped too.
fn superblock_members<F>(port: &mut Port, chunk: u32, mut skip_bad: F)
    -> Result<Vec<NativeAddr>>
    where F: FnMut(NativeAddr) -> Result<bool>
{
    let geo = port.geo;
    let mut members = Vec::new();
    members.try_reserve_exact(geo.nlun_total())?;
    for (group, unit) in iproduct!(0..geo.npugrp, 0..geo.npunit) {
        let addr = NativeAddr::new(group, unit, chunk, 0);
        if skip_bad(addr)? {
            tracing::debug!(%addr, "skipping bad chunk");
            continue;
        }
        match port.chunk_state(addr)? {
            ChunkState::Free => {
                tracing::debug!(%addr, "skipping free chunk");
            }
            ChunkState::Offline => {
                tracing::debug!(%addr, "skipping offline chunk");
            }
            ChunkState::Open => {
                tracing::warn!(%addr, "skipping open chunk");
            }
            _ => members.push(addr)
        }
    }
    Ok(members)
}

/// Reset one batch of superblock members, stopping at the first failure
fn reset_all(port: &mut Port, members: &[NativeAddr]) -> Result<()> {
    for addr in members {
        port.reset(*addr)?;
    }
    Ok(())
}

fn reset_bodies(geo: &Geometry, members: &[NativeAddr])
    -> Result<Vec<ReqBody>>
{
    let mut bodies = Vec::new();
    bodies.try_reserve_exact(members.len())?;
    bodies.extend(members.iter().map(|m| ReqBody::bare(Command::ChunkReset {
        addr: geo.to_device(*m),
        kind: PHY_RESET
    })));
    Ok(bodies)
}

/// One read request per address of `ctx`, each filling one sector of its
/// buffers
fn read_bodies(geo: &Geometry, ctx: &CmdCtx) -> Result<Vec<ReqBody>> {
    let addrs = natives(geo, &ctx.addrs)?;
    let n = addrs.len();
    let mut data = ctx.data.as_ref()
        .ok_or(Error::InvalidArgument)?
        .try_mut()
        .map_err(|_| Error::InvalidArgument)?;
    check_len(data.len(), n, geo.nbytes)?;
    let mut meta = match ctx.meta.as_ref() {
        Some(dbs) => {
            let m = dbs.try_mut().map_err(|_| Error::InvalidArgument)?;
            check_len(m.len(), n, geo.nbytes_oob)?;
            Some(m)
        }
        None => None
    };
    let mut bodies = Vec::new();
    bodies.try_reserve_exact(n)?;
    for addr in addrs {
        let d = data.split_to(geo.nbytes as usize);
        let m = match meta.as_mut() {
            Some(m) => ReqBuf::In(m.split_to(geo.nbytes_oob as usize)),
            None => ReqBuf::None
        };
        bodies.push(ReqBody {
            cmd: Command::Read { addr: geo.to_device(addr), lba: FAKE_LBA },
            data: ReqBuf::In(d),
            meta: m
        });
    }
    Ok(bodies)
}

/// One write request per address of `ctx`, each sending one sector of its
/// buffers
fn write_bodies(geo: &Geometry, ctx: &CmdCtx) -> Result<Vec<ReqBody>> {
    let addrs = natives(geo, &ctx.addrs)?;
    let n = addrs.len();
    let nbytes = geo.nbytes as usize;
    let noob = geo.nbytes_oob as usize;
    let data = ctx.data.as_ref()
        .ok_or(Error::InvalidArgument)?
        .try_const()
        .map_err(|_| Error::InvalidArgument)?;
    check_len(data.len(), n, geo.nbytes)?;
    let meta = match ctx.meta.as_ref() {
        Some(dbs) => {
            let m = dbs.try_const().map_err(|_| Error::InvalidArgument)?;
            check_len(m.len(), n, geo.nbytes_oob)?;
            Some(m)
        }
        None => None
    };
    let mut bodies = Vec::new();
    bodies.try_reserve_exact(n)?;
    for (i, addr) in addrs.into_iter().enumerate() {
        let m = match meta.as_ref() {
            Some(m) => ReqBuf::Out(m.slice(i * noob, (i + 1) * noob)),
            None => ReqBuf::None
        };
        bodies.push(ReqBody {
            cmd: Command::Write { addr: geo.to_device(addr), lba: FAKE_LBA },
            data: ReqBuf::Out(data.slice(i * nbytes, (i + 1) * nbytes)),
            meta: m
        });
    }
    Ok(bodies)
}

/// Build a logical command's requests and submit them, returning the context
/// on any failure
fn submit_with<F>(port: &mut Port, ctx: CmdCtx, op: CtxOp, f: F)
    -> SubmitResult
    where F: FnOnce(&mut Port, &CmdCtx) -> Result<Vec<ReqBody>>
{
    match f(port, &ctx) {
        Ok(bodies) => port.submit(ctx, op, bodies),
        Err(e) => Err(Rejected::new(e, ctx))
    }
}

fn async_read(port: &mut Port, ctx: CmdCtx) -> SubmitResult {
    submit_with(port, ctx, CtxOp::Read,
                |port, ctx| read_bodies(&port.geo, ctx))
}

fn async_write(port: &mut Port, ctx: CmdCtx) -> SubmitResult {
    submit_with(port, ctx, CtxOp::Write,
                |port, ctx| write_bodies(&port.geo, ctx))
}

// LCOV_EXCL_STOP
