// vim: tw=80
//! Emulated bad-block tables
//!
//! The device keeps no bad-block table of its own.  We derive one per LUN from
//! chunk reports, and let callers override individual entries.  Cached badness
//! is a lower bound: every read of a table reconciles it against a fresh
//! report, adding newly offline chunks but never clearing old ones.

use itertools::iproduct;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    chunk::ChunkReport,
    geometry::{Geometry, NativeAddr},
    transport::Transport,
    types::*
};

/// State of one entry in a bad-block table
#[derive(Clone, Copy, Debug, Default, Eq, IntoPrimitive, PartialEq,
         TryFromPrimitive)]
#[repr(u8)]
pub enum BbtState {
    #[default]
    Free = 0,
    /// Factory bad, or found offline by the device
    Bad = 1,
    /// Grown bad
    GrownBad = 2,
    /// Reserved by the device
    DevReserved = 4,
    /// Reserved by the host
    HostReserved = 8,
}

impl TryFrom<u16> for BbtState {
    type Error = Error;

    fn try_from(v: u16) -> Result<Self> {
        u8::try_from(v).ok()
            .and_then(|b| BbtState::try_from(b).ok())
            .ok_or(Error::InvalidArgument)
    }
}

/// Bad-block table for one LUN
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bbt {
    blks: Vec<BbtState>,
}

impl Bbt {
    /// A table of `nchunk` free entries
    pub fn new(nchunk: usize) -> Result<Self> {
        let mut blks = Vec::new();
        blks.try_reserve_exact(nchunk)?;
        blks.resize(nchunk, BbtState::Free);
        Ok(Bbt { blks })
    }

    /// Build a table from a LUN's chunk report.  OFFLINE chunks are bad;
    /// everything else is free.
    pub fn from_report(report: &ChunkReport) -> Result<Self> {
        let mut bbt = Bbt::new(report.len())?;
        for chunk in report.offline() {
            bbt.blks[chunk as usize] = BbtState::Bad;
        }
        Ok(bbt)
    }

    /// Mark every chunk that `report` says is OFFLINE as bad.  Entries are
    /// never cleared.  Returns the chunks that were not already marked.
    pub fn merge_offline(&mut self, report: &ChunkReport) -> Vec<u32> {
        let mut fresh = Vec::new();
        for chunk in report.offline() {
            if let Some(e) = self.blks.get_mut(chunk as usize) {
                if *e == BbtState::Free {
                    *e = BbtState::Bad;
                    fresh.push(chunk);
                }
            }
        }
        fresh
    }

    pub fn get(&self, chunk: u32) -> Option<BbtState> {
        self.blks.get(chunk as usize).copied()
    }

    /// Overwrite one entry
    pub fn set(&mut self, chunk: u32, state: BbtState) -> Result<()> {
        let e = self.blks.get_mut(chunk as usize)
            .ok_or(Error::InvalidAddress)?;
        *e = state;
        Ok(())
    }

    /// Is the chunk unusable for any reason?
    pub fn is_bad(&self, chunk: u32) -> Result<bool> {
        self.get(chunk)
            .map(|s| s != BbtState::Free)
            .ok_or(Error::InvalidAddress)
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.blks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=BbtState> + '_ {
        self.blks.iter().copied()
    }

    fn count(&self, state: BbtState) -> usize {
        self.blks.iter().filter(|s| **s == state).count()
    }

    /// Number of factory-bad or device-offlined entries
    pub fn nbad(&self) -> usize {
        self.count(BbtState::Bad)
    }

    pub fn ngrown(&self) -> usize {
        self.count(BbtState::GrownBad)
    }

    pub fn ndev_reserved(&self) -> usize {
        self.count(BbtState::DevReserved)
    }

    pub fn nhost_reserved(&self) -> usize {
        self.count(BbtState::HostReserved)
    }
}

/// One [`Bbt`] per LUN, owned by the device context
#[derive(Clone, Debug)]
pub struct BbtCache {
    tables: Vec<Bbt>,
    npunit: u32,
}

impl BbtCache {
    /// Build every LUN's table from an initial chunk report.  A report that
    /// can't be read fails with [`Error::NoMemory`].
    pub fn init(io: &mut dyn Transport, geo: &Geometry) -> Result<Self> {
        let mut tables = Vec::new();
        tables.try_reserve_exact(geo.nlun_total())?;
        for (group, unit) in iproduct!(0..geo.npugrp, 0..geo.npunit) {
            let report = ChunkReport::fetch(io, geo, Some((group, unit)))
                .map_err(|e| {
                    tracing::warn!(group, unit, error = %e,
                        "initial chunk report failed");
                    Error::NoMemory
                })?;
            let bbt = Bbt::from_report(&report)?;
            if bbt.nbad() > 0 {
                tracing::debug!(group, unit, nbad = bbt.nbad(),
                    "LUN has offline chunks");
            }
            tables.push(bbt);
        }
        Ok(BbtCache { tables, npunit: geo.npunit })
    }

    fn index(&self, group: u32, unit: u32) -> Result<usize> {
        if unit >= self.npunit {
            return Err(Error::InvalidAddress);
        }
        let i = group as usize * self.npunit as usize + unit as usize;
        if i >= self.tables.len() {
            return Err(Error::InvalidAddress);
        }
        Ok(i)
    }

    /// Reconcile one LUN's table against a fresh report and return a copy
    pub fn get(&mut self, io: &mut dyn Transport, geo: &Geometry, group: u32,
               unit: u32) -> Result<Bbt>
    {
        let i = self.index(group, unit)?;
        let report = ChunkReport::fetch(io, geo, Some((group, unit)))?;
        let bbt = &mut self.tables[i];
        for chunk in bbt.merge_offline(&report) {
            tracing::warn!(group, unit, chunk, "chunk went offline");
        }
        Ok(bbt.clone())
    }

    /// Look at the cached table without consulting the device
    pub fn cached(&self, group: u32, unit: u32) -> Result<&Bbt> {
        let i = self.index(group, unit)?;
        Ok(&self.tables[i])
    }

    pub fn set(&mut self, group: u32, unit: u32, chunk: u32, state: BbtState)
        -> Result<()>
    {
        let i = self.index(group, unit)?;
        self.tables[i].set(chunk, state)
    }

    /// Is this chunk marked bad in the cache?
    pub fn is_bad(&self, addr: NativeAddr) -> Result<bool> {
        self.cached(addr.group, addr.unit)?.is_bad(addr.chunk)
    }
}

// LCOV_EXCL_STOP
