// vim: tw=80
//! The seam between this crate and the NVMe passthrough transport

#[cfg(test)] use mockall::automock;

use crate::{
    command::Command,
    geometry::Geometry,
    types::*
};

/// Identification data read from the device at open time
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identify {
    /// Model number, as reported by the controller
    pub model: String,
    pub geometry: Geometry,
}

/// Buffer attached to one asynchronous device request
#[derive(Debug, Default)]
pub enum ReqBuf {
    #[default]
    None,
    /// Receives data from the device
    In(IoVecMut),
    /// Sends a slice of a caller's buffer to the device
    Out(IoVec),
    /// Sends a payload built internally, such as filler or a chunk list
    Owned(Vec<u8>),
}

impl ReqBuf {
    pub fn len(&self) -> usize {
        match self {
            ReqBuf::None => 0,
            ReqBuf::In(b) => b.len(),
            ReqBuf::Out(b) => b.len(),
            ReqBuf::Owned(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The body of one device request: everything but the tag
#[derive(Debug)]
pub struct ReqBody {
    pub cmd: Command,
    pub data: ReqBuf,
    pub meta: ReqBuf,
}

impl ReqBody {
    /// A request with no data transfer
    pub fn bare(cmd: Command) -> Self {
        ReqBody { cmd, data: ReqBuf::None, meta: ReqBuf::None }
    }
}

/// One asynchronous device request
#[derive(Debug)]
pub struct Request {
    /// Opaque to the transport; returned in the matching [`Completion`]
    pub tag: u64,
    pub cmd: Command,
    pub data: ReqBuf,
    pub meta: ReqBuf,
}

/// Completion of one asynchronous device request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Completion {
    pub tag: u64,
    pub ret: NvmRet,
}

/// An NVMe passthrough transport.
///
/// Synchronous methods block until the device completes the command.  They
/// return `Err` only if the command could not be issued at all; device errors
/// are reported through the status in [`NvmRet`].  An empty `meta` buffer
/// means no metadata transfer.
#[cfg_attr(test, automock)]
pub trait Transport {
    /// Read the device's identification data
    fn identify(&mut self) -> Result<Identify>;

    /// Admin command transferring data from the device
    fn admin_recv(&mut self, cmd: &Command, data: &mut [u8]) -> Result<NvmRet>;

    /// Admin command transferring data to the device
    fn admin_send(&mut self, cmd: &Command, data: &[u8]) -> Result<NvmRet>;

    /// I/O command transferring data from the device
    fn io_recv(&mut self, cmd: &Command, data: &mut [u8], meta: &mut [u8])
        -> Result<NvmRet>;

    /// I/O command transferring data to the device
    fn io_send(&mut self, cmd: &Command, data: &[u8], meta: &[u8])
        -> Result<NvmRet>;

    /// Queue a batch of requests.  Either all of them are queued or none are.
    fn submit(&mut self, reqs: Vec<Request>) -> Result<()>;

    /// Drain between `min` and `max` completions.  May block until `min` have
    /// arrived; never blocks when `min` is 0.
    fn get_completions(&mut self, min: usize, max: usize)
        -> Result<Vec<Completion>>;
}
