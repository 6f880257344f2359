// vim: tw=80
//! Chunk-information reports

use byteorder::{ByteOrder, LittleEndian};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::{
    command::Command,
    geometry::{CHUNK_DESCR_BYTES, Geometry, NativeAddr},
    transport::Transport,
    types::*,
    util::*
};

const DESCR_BYTES: usize = CHUNK_DESCR_BYTES as usize;

/// State of one chunk, as reported by the device
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, IntoPrimitive, PartialEq)]
#[repr(u8)]
pub enum ChunkState {
    Free = 1,
    Closed = 2,
    Open = 4,
    Offline = 8,
    #[num_enum(catch_all)]
    Other(u8),
}

/// One entry of the chunk-information log page
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkDescriptor {
    pub state: ChunkState,
    pub ctype: u8,
    /// Wear-level index
    pub wli: u8,
    pub slba: u64,
    /// Capacity in sectors
    pub cnlb: u64,
    /// Write pointer
    pub wp: u64,
}

impl ChunkDescriptor {
    pub fn decode(buf: &[u8]) -> Self {
        ChunkDescriptor {
            state: ChunkState::from(buf[0]),
            ctype: buf[1],
            wli: buf[2],
            slba: LittleEndian::read_u64(&buf[8..16]),
            cnlb: LittleEndian::read_u64(&buf[16..24]),
            wp: LittleEndian::read_u64(&buf[24..32]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..DESCR_BYTES].fill(0);
        buf[0] = self.state.into();
        buf[1] = self.ctype;
        buf[2] = self.wli;
        LittleEndian::write_u64(&mut buf[8..16], self.slba);
        LittleEndian::write_u64(&mut buf[16..24], self.cnlb);
        LittleEndian::write_u64(&mut buf[24..32], self.wp);
    }
}

/// An ordered set of chunk descriptors, indexed by chunk number within the
/// reported range
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkReport {
    pub descrs: Vec<ChunkDescriptor>,
}

impl ChunkReport {
    /// Read a fresh report for one LUN, or for the whole device if `lun` is
    /// `None`.
    ///
    /// The log page is read one page at a time.  Any failed page fails the
    /// whole report.
    pub fn fetch(io: &mut dyn Transport, geo: &Geometry,
                 lun: Option<(u32, u32)>) -> Result<Self>
    {
        let (lpo, ndescr) = match lun {
            Some((group, unit)) => {
                if group >= geo.npugrp || unit >= geo.npunit {
                    return Err(Error::InvalidAddress);
                }
                let first = NativeAddr::new(group, unit, 0, 0);
                (geo.lpo(first), geo.nchunk as usize)
            }
            None => (0, geo.nchunk_total())
        };
        let nbytes = ndescr * DESCR_BYTES;
        let mut buf = Vec::new();
        buf.try_reserve_exact(nbytes)?;
        buf.resize(nbytes, 0u8);
        for (i, page) in buf.chunks_mut(REPORT_PAGE_BYTES).enumerate() {
            let cmd = Command::ChunkInfo {
                lpo: lpo + (i * REPORT_PAGE_BYTES) as u64,
                count: (page.len() / DESCR_BYTES) as u32
            };
            io.admin_recv(&cmd, page)?.check()?;
        }
        let mut descrs = Vec::new();
        descrs.try_reserve_exact(ndescr)?;
        descrs.extend(buf.chunks_exact(DESCR_BYTES)
            .map(ChunkDescriptor::decode));
        Ok(ChunkReport { descrs })
    }

    pub fn len(&self) -> usize {
        self.descrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descrs.is_empty()
    }

    pub fn get(&self, chunk: u32) -> Option<&ChunkDescriptor> {
        self.descrs.get(chunk as usize)
    }

    /// Indices of every OFFLINE chunk in the report
    pub fn offline(&self) -> impl Iterator<Item=u32> + '_ {
        self.descrs.iter()
            .enumerate()
            .filter(|(_, d)| d.state == ChunkState::Offline)
            .map(|(i, _)| i as u32)
    }
}

/// Fetch a fresh report for `addr`'s LUN and return its chunk's descriptor
pub fn describe(io: &mut dyn Transport, geo: &Geometry, addr: NativeAddr)
    -> Result<ChunkDescriptor>
{
    let report = ChunkReport::fetch(io, geo, Some((addr.group, addr.unit)))?;
    report.get(addr.chunk)
        .copied()
        .ok_or(Error::InvalidAddress)
}

// LCOV_EXCL_STOP
