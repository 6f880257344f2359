// vim: tw=80
//! Common constants and utility functions used throughout ocssd-core

/// The device's optimal write unit, in sectors.  128 KiB of 4 KiB sectors.
///
/// This is also the stripe granularity of the device's internal parity: a row
/// of a line is protected once every data chunk has been written past it.
pub const OPT_WRITE_NSECTORS: u32 = 32;

/// Reserved-area reads and writes always transfer exactly this many sectors.
pub const SYS_RW_NSECTORS: usize = 8;

/// Size of one chunk-information log page transfer.
pub const REPORT_PAGE_BYTES: usize = 4096;

/// Size of the chunk-address list sent with a parity-init command.
pub const PARITY_LIST_BYTES: usize = 4096;

/// LBA field carried by every vector read and write.  The device ignores it
/// and uses the physical address instead.
pub const FAKE_LBA: u64 = 0x1234;

/// Reset kind for a physical chunk reset
pub const PHY_RESET: u8 = 0;
