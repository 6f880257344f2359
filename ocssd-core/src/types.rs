// vim: tw=80
//! Common type definitions used throughout ocssd-core

use divbuf::{DivBuf, DivBufMut};
use std::collections::TryReserveError;
use thiserror::Error;

/// Our `IoVec`.  Reference-counted, so a request can hold a slice of a
/// caller's buffer while the caller's logical command is in flight.
pub type IoVec = DivBuf;

/// Mutable version of `IoVec`.  Uniquely owned.
pub type IoVecMut = DivBufMut;

/// ocssd-core's error type
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("Cannot allocate memory")]
    NoMemory,
    #[error("Address is outside of the device geometry")]
    InvalidAddress,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("Operation not supported by this device profile")]
    NotSupported,
    #[error("Line has fewer than two usable chunks")]
    InsufficientLine,
    #[error("Write pointers are not aligned to the parity stripe")]
    MisalignedStripe,
    #[error("Transport failure (status {status:#x}, result {result:#x})")]
    TransportFailure {
        status: u64,
        result: u32
    },
    #[error("No device profile recognizes this device")]
    NoDevice,
}

impl From<TryReserveError> for Error {
    fn from(_e: TryReserveError) -> Self {
        Error::NoMemory
    }
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        match e {
            Error::NoMemory => libc::ENOMEM,
            Error::InvalidAddress => libc::EINVAL,
            Error::InvalidArgument => libc::EINVAL,
            Error::NotSupported => libc::EOPNOTSUPP,
            Error::InsufficientLine => libc::EIO,
            Error::MisalignedStripe => libc::EIO,
            Error::TransportFailure{..} => libc::EIO,
            Error::NoDevice => libc::ENODEV,
        }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Completion status of one passthrough command, exactly as the device
/// reported it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NvmRet {
    pub status: u64,
    pub result: u32,
}

impl NvmRet {
    pub const fn new(status: u64, result: u32) -> Self {
        NvmRet { status, result }
    }

    pub fn is_err(&self) -> bool {
        self.status != 0
    }

    /// Convert an error status into [`Error::TransportFailure`]
    pub fn check(self) -> Result<NvmRet> {
        if self.is_err() {
            Err(Error::TransportFailure {
                status: self.status,
                result: self.result
            })
        } else {
            Ok(self)
        }
    }
}

// LCOV_EXCL_STOP
