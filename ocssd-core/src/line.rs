// vim: tw=80
//! Lines: the chunks that share one chunk index across every LUN
//!
//! The device can't tell us which chunks it considers striped together, so a
//! line is always reconstructed from the bad-block tables.

use std::collections::BTreeMap;

use itertools::iproduct;

use crate::{
    bbt::BbtCache,
    geometry::{Geometry, NativeAddr},
    types::*
};

/// Every healthy chunk at one chunk index, in group-major order
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Line {
    pub chunk: u32,
    pub members: Vec<NativeAddr>,
}

impl Line {
    /// Scan every LUN, unit varying fastest, and collect the healthy chunks
    pub fn build(geo: &Geometry, bbt: &BbtCache, chunk: u32) -> Result<Self> {
        let mut members = Vec::new();
        members.try_reserve_exact(geo.nlun_total())?;
        for (group, unit) in iproduct!(0..geo.npugrp, 0..geo.npunit) {
            let addr = NativeAddr::new(group, unit, chunk, 0);
            if bbt.is_bad(addr)? {
                tracing::debug!(%addr, "excluding bad chunk from line");
                continue;
            }
            members.push(addr);
        }
        for addr in members.iter() {
            geo.check(*addr)?;
        }
        Ok(Line { chunk, members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Index of the member on the given LUN, if it has one
    pub fn position(&self, group: u32, unit: u32) -> Option<usize> {
        self.members.iter()
            .position(|m| m.group == group && m.unit == unit)
    }

    /// Raw capacity of the line, parity included
    pub fn nbytes(&self, geo: &Geometry) -> u64 {
        self.members.len() as u64 * geo.chunk_nbytes()
    }
}

/// At most one line per chunk index
#[derive(Debug, Default)]
pub struct LineCache {
    lines: BTreeMap<u32, Line>,
}

impl LineCache {
    pub fn get(&self, chunk: u32) -> Option<&Line> {
        self.lines.get(&chunk)
    }

    /// Cache `line`, returning whatever it displaced
    pub fn set(&mut self, line: Line) -> Option<Line> {
        self.lines.insert(line.chunk, line)
    }

    /// Return the cached line, or build and cache a fresh one
    pub fn get_or_build(&mut self, geo: &Geometry, bbt: &BbtCache, chunk: u32)
        -> Result<&Line>
    {
        if !self.lines.contains_key(&chunk) {
            let line = Line::build(geo, bbt, chunk)?;
            self.lines.insert(chunk, line);
        }
        self.lines.get(&chunk).ok_or(Error::InvalidAddress)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// LCOV_EXCL_STOP
