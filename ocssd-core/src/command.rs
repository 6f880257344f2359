// vim: tw=80
//! Raw device commands
//!
//! These describe what to send; the [`Transport`](crate::transport::Transport)
//! owns the NVMe wire encoding.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::geometry::DevAddr;

/// Kinds of failure that the device can be asked to inject
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum InjectKind {
    /// The next read of the sector fails as uncorrectable
    ReadUncorrectable = 0,
    /// The next program of the die fails, without reading back
    ProgramFailure = 1,
    /// The next reset of the chunk fails
    EraseFailure = 2,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Vector read of one sector
    Read { addr: DevAddr, lba: u64 },
    /// Vector write of one sector
    Write { addr: DevAddr, lba: u64 },
    /// Reset one chunk
    ChunkReset { addr: DevAddr, kind: u8 },
    /// Start a parity-protected line.  `nlb` is the zero-based number of data
    /// chunks, whose addresses travel in the data payload.
    ParityInit { nlb: u16, parity: DevAddr },
    /// Read `count` descriptors of the chunk-information log page, starting
    /// `lpo` bytes in
    ChunkInfo { lpo: u64, count: u32 },
    /// Arm a failure.  `die` applies it to the whole die rather than only to
    /// `addr`.
    ErrorInjection { kind: InjectKind, die: bool, addr: DevAddr },
    /// Ask whether an armed failure has yet to trigger
    ErrorInjectionPending,
    /// Read the reserved system area
    ReadSys,
    /// Write the reserved system area
    WriteSys,
}

impl Command {
    /// Whether the command belongs on the admin queue rather than an I/O
    /// queue
    pub fn is_admin(&self) -> bool {
        matches!(self,
            Command::ChunkInfo { .. } |
            Command::ErrorInjection { .. } |
            Command::ErrorInjectionPending |
            Command::ReadSys |
            Command::WriteSys)
    }
}

/// Opcode recorded on a logical command when it is submitted
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum CtxOp {
    Erase = 0x90,
    Write = 0x91,
    Read = 0x92,
    ParityInit = 0xA0,
    ParityOut = 0xA4,
}

// LCOV_EXCL_STOP
