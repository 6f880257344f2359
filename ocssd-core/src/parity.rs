// vim: tw=80
//! Parity-protected lines
//!
//! The device computes parity itself, one stripe of [`OPT_WRITE_NSECTORS`]
//! sectors at a time, but only once it has been told which chunks form a line
//! and only for rows that every data chunk has written past.  This module
//! builds the chunk lists for the former and pads the data chunks for the
//! latter.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    bbt::BbtCache,
    command::Command,
    geometry::{DevAddr, Geometry, NativeAddr},
    line::{Line, LineCache},
    port::Port,
    transport::{ReqBody, ReqBuf},
    types::*,
    util::*
};

/// Bits of a device address recorded in a filler sector's metadata
const FILLER_META_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// A line divided into its parity chunk and its data chunks
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParitySplit {
    /// Position of the parity chunk within the line
    pub parity_idx: usize,
    pub parity: DevAddr,
    /// Every other member, in line order
    pub data: Vec<DevAddr>,
}

impl ParitySplit {
    /// The parity-init command for this split
    pub fn command(&self) -> Command {
        // nlb is zero-based
        let nlb = (self.data.len() - 1) as u16;
        Command::ParityInit { nlb, parity: self.parity }
    }
}

/// Designate the member on `target`'s LUN as the parity chunk
pub fn split(geo: &Geometry, line: &Line, target: NativeAddr)
    -> Result<ParitySplit>
{
    if line.len() < 2 {
        return Err(Error::InsufficientLine);
    }
    let parity_idx = line.position(target.group, target.unit)
        .ok_or(Error::InvalidAddress)?;
    let mut data = Vec::new();
    data.try_reserve_exact(line.len() - 1)?;
    data.extend(line.members.iter()
        .enumerate()
        .filter(|(i, _)| *i != parity_idx)
        .map(|(_, m)| geo.to_device(*m)));
    Ok(ParitySplit {
        parity_idx,
        parity: geo.to_device(line.members[parity_idx]),
        data
    })
}

/// Serialize a chunk list into a parity-init payload
pub fn encode_chunk_list(addrs: &[DevAddr]) -> Result<Vec<u8>> {
    if addrs.len() * 8 > PARITY_LIST_BYTES {
        return Err(Error::InvalidArgument);
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(PARITY_LIST_BYTES)?;
    buf.resize(PARITY_LIST_BYTES, 0u8);
    for (a, b) in addrs.iter().zip(buf.chunks_exact_mut(8)) {
        LittleEndian::write_u64(b, a.0);
    }
    Ok(buf)
}

/// Check that every data chunk has been written at least as far as the parity
/// chunk, and that the parity chunk sits on a stripe boundary.
pub fn check_alignment(parity_wp: u64, wps: &[u64]) -> Result<()> {
    if parity_wp % u64::from(OPT_WRITE_NSECTORS) != 0 ||
        wps.iter().any(|wp| *wp < parity_wp)
    {
        return Err(Error::MisalignedStripe);
    }
    Ok(())
}

/// One sector of filler to write
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fill {
    /// Position of the chunk within the line
    pub member: usize,
    pub sector: u32,
}

/// Compute the filler writes needed to complete every stripe of a line.
///
/// `wps` holds every member's write pointer, parity chunk included, and must
/// already have passed [`check_alignment`].  Stripe by stripe, each data chunk
/// that is less than one stripe ahead of the parity chunk gets padded to
/// exactly one stripe ahead.  Sectors beyond the chunk's capacity are never
/// included.
pub fn fill_plan(parity_idx: usize, wps: &[u64], nsectr: u32) -> Vec<Fill> {
    let stripe = u64::from(OPT_WRITE_NSECTORS);
    let nsectr = u64::from(nsectr);
    let mut wps = wps.to_vec();
    let mut plan = Vec::new();
    let Some(mut pwp) = wps.get(parity_idx).copied() else {
        return plan;
    };
    while pwp < nsectr {
        for (member, wp) in wps.iter_mut().enumerate() {
            if member == parity_idx {
                continue;
            }
            let lead = wp.saturating_sub(pwp);
            let mut j = 0;
            while j + lead < stripe {
                let sector = *wp + j;
                if sector < nsectr {
                    plan.push(Fill { member, sector: sector as u32 });
                }
                j += 1;
            }
            *wp += j;
        }
        pwp += stripe;
    }
    plan
}

/// Fill a sector with an audit pattern identifying where it was written.
///
/// The data holds the legacy coordinates of `addr` followed by two ones, all
/// as little-endian `u64`s.  `meta`, if not empty, starts with the low 48 bits
/// of the device address.
pub fn filler(geo: &Geometry, addr: NativeAddr, data: &mut [u8],
              meta: &mut [u8])
{
    let l = geo.to_legacy(addr);
    let fields = [
        u64::from(l.ch), u64::from(l.lun), u64::from(l.pl), u64::from(l.blk),
        u64::from(l.pg), u64::from(l.sec), 1, 1
    ];
    data.fill(0);
    for (b, v) in data.chunks_exact_mut(8).zip(fields.iter()) {
        LittleEndian::write_u64(b, *v);
    }
    if !meta.is_empty() {
        meta.fill(0);
        let dev = (geo.to_device(addr).0 & FILLER_META_MASK).to_le_bytes();
        let n = meta.len().min(dev.len());
        meta[..n].copy_from_slice(&dev[..n]);
    }
}

/// Write pointers of every member of a line, read fresh from the device
fn write_pointers(port: &mut Port, line: &Line) -> Result<Vec<u64>> {
    let mut wps = Vec::new();
    wps.try_reserve_exact(line.len())?;
    for m in line.members.iter() {
        wps.push(port.write_pointer(*m)?);
    }
    Ok(wps)
}

/// Build the line at `target`'s chunk index fresh from the bad-block tables,
/// and the parity-init command and payload that protect it
pub fn init_command(port: &Port, bbt: &BbtCache, target: NativeAddr)
    -> Result<(Line, Command, Vec<u8>)>
{
    let line = Line::build(&port.geo, bbt, target.chunk)?;
    let split = split(&port.geo, &line, target)?;
    let payload = encode_chunk_list(&split.data)?;
    tracing::debug!(chunk = target.chunk, parity = %split.parity,
        ndata = split.data.len(), "parity init");
    Ok((line, split.command(), payload))
}

/// Start parity protection for the line at `target`'s chunk index, with the
/// parity chunk on `target`'s LUN.  On success the line is cached.
pub fn init(port: &mut Port, bbt: &BbtCache, lines: &mut LineCache,
            target: NativeAddr) -> Result<()>
{
    let (line, cmd, payload) = init_command(port, bbt, target)?;
    port.io.io_send(&cmd, &payload, &[])?.check()?;
    lines.set(line);
    Ok(())
}

/// Validate the line's write pointers and return every filler sector needed to
/// complete its stripes
pub fn out_plan(port: &mut Port, bbt: &BbtCache, lines: &mut LineCache,
                target: NativeAddr) -> Result<Vec<NativeAddr>>
{
    let line = lines.get_or_build(&port.geo, bbt, target.chunk)?.clone();
    let parity_idx = line.position(target.group, target.unit)
        .ok_or(Error::InvalidAddress)?;
    let wps = write_pointers(port, &line)?;
    let parity_wp = wps[parity_idx];
    if let Err(e) = check_alignment(parity_wp, &wps) {
        tracing::warn!(chunk = line.chunk, parity_wp, ?wps,
            "write pointers are not stripe aligned");
        return Err(e);
    }
    let plan = fill_plan(parity_idx, &wps, port.geo.nsectr);
    let mut addrs = Vec::new();
    addrs.try_reserve_exact(plan.len())?;
    addrs.extend(plan.iter()
        .map(|f| line.members[f.member].with_sector(f.sector)));
    Ok(addrs)
}

/// Pad every data chunk of the line so that each stripe up to the chunk's
/// capacity is complete
pub fn out(port: &mut Port, bbt: &BbtCache, lines: &mut LineCache,
           target: NativeAddr) -> Result<()>
{
    let addrs = out_plan(port, bbt, lines, target)?;
    tracing::debug!(chunk = target.chunk, nfill = addrs.len(), "parity out");
    let mut data = Vec::new();
    data.try_reserve_exact(port.geo.nbytes as usize)?;
    data.resize(port.geo.nbytes as usize, 0u8);
    for addr in addrs {
        filler(&port.geo, addr, &mut data, &mut []);
        port.write_sector(addr, &data, &[])?;
    }
    Ok(())
}

/// One filler write per sector of `addrs`, each with its own payload
pub fn fill_requests(geo: &Geometry, addrs: &[NativeAddr])
    -> Result<Vec<ReqBody>>
{
    let mut bodies = Vec::new();
    bodies.try_reserve_exact(addrs.len())?;
    for addr in addrs {
        let mut data = Vec::new();
        data.try_reserve_exact(geo.nbytes as usize)?;
        data.resize(geo.nbytes as usize, 0u8);
        filler(geo, *addr, &mut data, &mut []);
        bodies.push(ReqBody {
            cmd: Command::Write { addr: geo.to_device(*addr), lba: FAKE_LBA },
            data: ReqBuf::Owned(data),
            meta: ReqBuf::None
        });
    }
    Ok(bodies)
}

// LCOV_EXCL_STOP
