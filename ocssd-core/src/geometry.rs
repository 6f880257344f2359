// vim: tw=80
//! Address translation between the legacy and native OCSSD geometries
//!
//! Callers speak the legacy, channel/LUN/plane/block/page/sector dialect.  The
//! hardware speaks group/unit/chunk/sector, and accepts only a packed linear
//! device address on the wire.  Everything here is pure arithmetic over the
//! geometry constants; range checking is done only where explicitly asked for.

use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::{
    types::*,
    util::*
};

/// Size of one descriptor in the chunk-information log page
pub const CHUNK_DESCR_BYTES: u64 = 32;

/// An address in the legacy geometry
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
         PartialOrd, Serialize)]
pub struct LegacyAddr {
    pub ch: u32,
    pub lun: u32,
    pub pl: u32,
    pub blk: u32,
    pub pg: u32,
    pub sec: u32,
}

impl LegacyAddr {
    pub const fn new(ch: u32, lun: u32, pl: u32, blk: u32, pg: u32, sec: u32)
        -> Self
    {
        LegacyAddr { ch, lun, pl, blk, pg, sec }
    }

    /// Address of block `blk` on plane 0, page 0, sector 0 of a LUN
    pub const fn block(ch: u32, lun: u32, blk: u32) -> Self {
        LegacyAddr { ch, lun, pl: 0, blk, pg: 0, sec: 0 }
    }
}

impl fmt::Display for LegacyAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ch={} lun={} pl={} blk={} pg={} sec={}",
            self.ch, self.lun, self.pl, self.blk, self.pg, self.sec)
    }
}

/// An address in the native geometry
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
         PartialOrd, Serialize)]
pub struct NativeAddr {
    pub group: u32,
    pub unit: u32,
    pub chunk: u32,
    pub sector: u32,
}

impl NativeAddr {
    pub const fn new(group: u32, unit: u32, chunk: u32, sector: u32) -> Self {
        NativeAddr { group, unit, chunk, sector }
    }

    /// The same chunk, at a different sector
    pub const fn with_sector(self, sector: u32) -> Self {
        NativeAddr { sector, ..self }
    }
}

impl fmt::Display for NativeAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "grp={} pu={} chunk={} sectr={}",
            self.group, self.unit, self.chunk, self.sector)
    }
}

/// Either kind of address.  Used where both dialects are accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Addr {
    Legacy(LegacyAddr),
    Native(NativeAddr),
}

impl From<LegacyAddr> for Addr {
    fn from(a: LegacyAddr) -> Self {
        Addr::Legacy(a)
    }
}

impl From<NativeAddr> for Addr {
    fn from(a: NativeAddr) -> Self {
        Addr::Native(a)
    }
}

/// A linear device address, as it appears on the wire
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
         PartialOrd, Serialize)]
pub struct DevAddr(pub u64);

impl From<DevAddr> for u64 {
    fn from(a: DevAddr) -> u64 {
        a.0
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Number of bits needed to hold every value in `0..n`
fn nbits(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        u32::BITS - (n - 1).leading_zeros()
    }
}

fn mask(len: u32) -> u64 {
    (1u64 << len) - 1
}

/// Bit layout of a [`DevAddr`].  The sector occupies the lowest bits, followed
/// by the chunk, the unit, and the group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddrFormat {
    pub sector_len: u32,
    pub chunk_len: u32,
    pub unit_len: u32,
    pub group_len: u32,
}

impl AddrFormat {
    fn chunk_off(&self) -> u32 {
        self.sector_len
    }

    fn unit_off(&self) -> u32 {
        self.chunk_off() + self.chunk_len
    }

    fn group_off(&self) -> u32 {
        self.unit_off() + self.unit_len
    }

    pub fn pack(&self, a: NativeAddr) -> DevAddr {
        DevAddr(
            (u64::from(a.group) << self.group_off()) |
            (u64::from(a.unit) << self.unit_off()) |
            (u64::from(a.chunk) << self.chunk_off()) |
            u64::from(a.sector)
        )
    }

    pub fn unpack(&self, d: DevAddr) -> NativeAddr {
        let d = d.0;
        NativeAddr {
            group: ((d >> self.group_off()) & mask(self.group_len)) as u32,
            unit: ((d >> self.unit_off()) & mask(self.unit_len)) as u32,
            chunk: ((d >> self.chunk_off()) & mask(self.chunk_len)) as u32,
            sector: (d & mask(self.sector_len)) as u32,
        }
    }
}

/// Immutable device geometry, as read at open time.
///
/// The native counts are authoritative.  The legacy view is derived from them:
/// channels are groups, LUNs are units, each LUN's chunks are split evenly
/// among `nplanes` planes, and each chunk's sectors are split into pages of
/// `nsectors` sectors.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Geometry {
    /// Parallel unit groups
    pub npugrp: u32,
    /// Parallel units per group
    pub npunit: u32,
    /// Chunks per parallel unit
    pub nchunk: u32,
    /// Sectors per chunk
    pub nsectr: u32,
    /// Bytes per sector
    pub nbytes: u32,
    /// Bytes of out-of-band metadata per sector
    pub nbytes_oob: u32,
    /// Legacy planes per LUN
    pub nplanes: u32,
    /// Legacy sectors per page
    pub nsectors: u32,
}

impl Geometry {
    pub fn new(npugrp: u32, npunit: u32, nchunk: u32, nsectr: u32, nbytes: u32,
               nbytes_oob: u32) -> Self
    {
        Geometry {
            npugrp,
            npunit,
            nchunk,
            nsectr,
            nbytes,
            nbytes_oob,
            nplanes: 1,
            nsectors: OPT_WRITE_NSECTORS,
        }
    }

    /// Change the number of legacy sectors per page
    pub fn with_sectors_per_page(mut self, nsectors: u32) -> Self {
        self.nsectors = nsectors;
        self
    }

    /// Change the number of legacy planes per LUN
    pub fn with_planes(mut self, nplanes: u32) -> Self {
        self.nplanes = nplanes;
        self
    }

    /// Check that the geometry is internally consistent
    pub fn validate(&self) -> Result<()> {
        let counts = [self.npugrp, self.npunit, self.nchunk, self.nsectr,
                      self.nbytes, self.nplanes, self.nsectors];
        if counts.iter().any(|c| *c == 0) ||
            self.nchunk % self.nplanes != 0 ||
            self.nsectr % self.nsectors != 0
        {
            return Err(Error::InvalidArgument);
        }
        // Every field's shift must stay inside a u64
        let f = self.format();
        let end = f.group_off() + f.group_len;
        if f.group_off() >= u64::BITS || end > u64::BITS {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    pub fn nchannels(&self) -> u32 {
        self.npugrp
    }

    pub fn nluns(&self) -> u32 {
        self.npunit
    }

    /// Legacy blocks per plane
    pub fn nblocks(&self) -> u32 {
        self.nchunk / self.nplanes
    }

    /// Legacy pages per block
    pub fn npages(&self) -> u32 {
        self.nsectr / self.nsectors
    }

    /// Total number of parallel units
    pub fn nlun_total(&self) -> usize {
        self.npugrp as usize * self.npunit as usize
    }

    /// Total number of chunks on the device
    pub fn nchunk_total(&self) -> usize {
        self.nlun_total() * self.nchunk as usize
    }

    /// Bytes held by one full chunk
    pub fn chunk_nbytes(&self) -> u64 {
        u64::from(self.nsectr) * u64::from(self.nbytes)
    }

    /// Bit layout of this device's linear addresses
    pub fn format(&self) -> AddrFormat {
        AddrFormat {
            sector_len: nbits(self.nsectr),
            chunk_len: nbits(self.nchunk),
            unit_len: nbits(self.npunit),
            group_len: nbits(self.npugrp),
        }
    }

    /// Translate a legacy address into the native geometry
    pub fn to_native(&self, a: LegacyAddr) -> NativeAddr {
        NativeAddr {
            group: a.ch,
            unit: a.lun,
            chunk: self.nblocks() * a.pl + a.blk,
            sector: self.nsectors * a.pg + a.sec,
        }
    }

    /// Translate a native address back into the legacy geometry.
    pub fn to_legacy(&self, a: NativeAddr) -> LegacyAddr {
        let nblocks = self.nblocks();
        LegacyAddr {
            ch: a.group,
            lun: a.unit,
            pl: a.chunk / nblocks,
            blk: a.chunk % nblocks,
            pg: a.sector / self.nsectors,
            sec: a.sector % self.nsectors,
        }
    }

    /// Pack an address of either dialect into a linear device address
    pub fn to_device<A: Into<Addr>>(&self, a: A) -> DevAddr {
        let native = match a.into() {
            Addr::Legacy(l) => self.to_native(l),
            Addr::Native(n) => n
        };
        self.format().pack(native)
    }

    /// Unpack a linear device address
    pub fn from_device(&self, d: DevAddr) -> NativeAddr {
        self.format().unpack(d)
    }

    /// Check that a native address lies within the geometry
    pub fn check(&self, a: NativeAddr) -> Result<()> {
        if a.group >= self.npugrp || a.unit >= self.npunit ||
            a.chunk >= self.nchunk || a.sector >= self.nsectr
        {
            Err(Error::InvalidAddress)
        } else {
            Ok(())
        }
    }

    /// Check that a legacy address lies within the geometry
    pub fn check_legacy(&self, a: LegacyAddr) -> Result<()> {
        if a.pl >= self.nplanes || a.blk >= self.nblocks() ||
            a.pg >= self.npages() || a.sec >= self.nsectors
        {
            return Err(Error::InvalidAddress);
        }
        self.check(self.to_native(a))
    }

    /// Index of a parallel unit in group-major order
    pub fn lun_index(&self, group: u32, unit: u32) -> usize {
        group as usize * self.npunit as usize + unit as usize
    }

    /// Byte offset of a chunk's descriptor in the chunk-information log page
    pub fn lpo(&self, a: NativeAddr) -> u64 {
        let lun = self.lun_index(a.group, a.unit) as u64;
        (lun * u64::from(self.nchunk) + u64::from(a.chunk)) * CHUNK_DESCR_BYTES
    }
}

// LCOV_EXCL_STOP
