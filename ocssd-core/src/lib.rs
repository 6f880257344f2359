// vim: tw=80
//! Address translation and command orchestration for Open-Channel SSDs
//!
//! Callers address the device with legacy (channel, LUN, plane, block, page,
//! sector) coordinates.  A [`device::Device`] translates them into the device's
//! native (group, unit, chunk, sector) addresses, tracks bad blocks, groups
//! same-index chunks into parity lines, and fans each logical command out into
//! per-chunk device requests.

// I suppose I should probably fix this some day, but I just don't like the look
// of e.g. "Bbt" as opposed to "BBT".
#![allow(clippy::upper_case_acronyms)]

pub mod bbt;
pub mod chunk;
pub mod command;
pub mod ctx;
pub mod device;
pub mod geometry;
pub mod join;
pub mod line;
pub mod parity;
pub mod port;
pub mod profile;
pub mod sim;
pub mod transport;
pub mod types;
pub mod util;

pub use crate::types::*;
pub use crate::util::*;
