// vim: tw=80
//! An in-memory Open-Channel SSD
//!
//! `SimDevice` implements [`Transport`] by interpreting each [`Command`]
//! against a model of the device's chunks.  It enforces sequential writes
//! through each chunk's write pointer, validates parity-init chunk lists, and
//! arms injected failures.  Asynchronous requests execute when submitted; their
//! completions queue up until drained.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError}
};

use byteorder::{ByteOrder, LittleEndian};
use serde_derive::{Deserialize, Serialize};

use crate::{
    chunk::{ChunkDescriptor, ChunkState},
    command::{Command, InjectKind},
    geometry::{CHUNK_DESCR_BYTES, DevAddr, Geometry, NativeAddr},
    transport::{Completion, Identify, ReqBuf, Request, Transport},
    types::*,
    util::*
};

/// Completion status codes returned by the simulated device
pub mod status {
    pub const SUCCESS: u64 = 0;
    pub const INVALID_OPCODE: u64 = 0x1;
    pub const INVALID_FIELD: u64 = 0x2;
    pub const WRITE_FAULT: u64 = 0x280;
    pub const UNRECOVERED_READ: u64 = 0x281;
    pub const OFFLINE_CHUNK: u64 = 0x2C0;
    pub const INVALID_RESET: u64 = 0x2C1;
    pub const OUT_OF_ORDER: u64 = 0x2F2;
    /// Returned by the pending-injection query when a failure is still armed
    pub const INJECTION_PENDING: u64 = 0x1;
}

const fn ret(status: u64) -> NvmRet {
    NvmRet::new(status, 0)
}

/// A chunk, identified without a sector
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChunkId {
    pub group: u32,
    pub unit: u32,
    pub chunk: u32,
}

impl From<ChunkId> for NativeAddr {
    fn from(c: ChunkId) -> Self {
        NativeAddr::new(c.group, c.unit, c.chunk, 0)
    }
}

/// A chunk that starts out partially or fully written
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Written {
    #[serde(flatten)]
    pub chunk: ChunkId,
    /// Initial write pointer
    pub sectors: u64,
}

/// Geometry section of a [`SimConfig`]
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SimGeometry {
    pub groups: u32,
    pub units: u32,
    pub chunks: u32,
    pub sectors: u32,
    pub sector_bytes: u32,
    #[serde(default)]
    pub meta_bytes: u32,
    #[serde(default)]
    pub sectors_per_page: Option<u32>,
    #[serde(default)]
    pub planes: Option<u32>,
}

impl From<SimGeometry> for Geometry {
    fn from(g: SimGeometry) -> Self {
        let mut geo = Geometry::new(g.groups, g.units, g.chunks, g.sectors,
                                    g.sector_bytes, g.meta_bytes);
        if let Some(nsectors) = g.sectors_per_page {
            geo = geo.with_sectors_per_page(nsectors);
        }
        if let Some(nplanes) = g.planes {
            geo = geo.with_planes(nplanes);
        }
        geo
    }
}

/// Description of a simulated device, usually read from YAML
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SimConfig {
    /// Model number reported by identify
    pub model: String,
    pub geometry: SimGeometry,
    /// Chunks that start out OFFLINE
    #[serde(default)]
    pub offline: Vec<ChunkId>,
    /// Chunks that start out with data
    #[serde(default)]
    pub written: Vec<Written>,
}

impl SimConfig {
    pub fn from_yaml(s: &str) -> std::result::Result<Self, serde_yaml_ng::Error>
    {
        serde_yaml_ng::from_str(s)
    }

    /// Build the device described by this configuration
    pub fn build(&self) -> Result<SimDevice> {
        let geo = Geometry::from(self.geometry);
        geo.validate()?;
        let sim = SimDevice::new(&self.model, geo);
        for c in self.offline.iter() {
            sim.set_offline((*c).into())?;
        }
        for w in self.written.iter() {
            sim.set_write_pointer(w.chunk.into(), w.sectors)?;
        }
        Ok(sim)
    }
}

#[derive(Clone, Debug)]
struct SimChunk {
    state: ChunkState,
    wp: u64,
    wli: u8,
    /// Data and metadata of every written sector
    sectors: BTreeMap<u32, (Vec<u8>, Vec<u8>)>,
}

impl Default for SimChunk {
    fn default() -> Self {
        SimChunk {
            state: ChunkState::Free,
            wp: 0,
            wli: 0,
            sectors: BTreeMap::new()
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Injection {
    kind: InjectKind,
    die: bool,
    addr: NativeAddr,
}

impl Injection {
    fn hits(&self, kind: InjectKind, addr: NativeAddr) -> bool {
        if self.kind != kind ||
            self.addr.group != addr.group ||
            self.addr.unit != addr.unit
        {
            return false;
        }
        self.die || match kind {
            InjectKind::ReadUncorrectable => self.addr == addr,
            _ => self.addr.chunk == addr.chunk
        }
    }
}

/// A parity line accepted by the simulated device
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimParityLine {
    pub parity: DevAddr,
    pub data: Vec<DevAddr>,
}

#[derive(Debug)]
struct Inner {
    model: String,
    geo: Geometry,
    chunks: Vec<SimChunk>,
    reserved: Vec<u8>,
    injections: Vec<Injection>,
    parity: BTreeMap<u32, SimParityLine>,
    completions: VecDeque<Completion>,
    log: Vec<Command>,
    fail_submit: Option<Error>,
}

impl Inner {
    fn chunk_index(&self, a: NativeAddr) -> usize {
        self.geo.lun_index(a.group, a.unit) * self.geo.nchunk as usize +
            a.chunk as usize
    }

    /// Decode a device address, rejecting anything outside the geometry
    fn native(&self, d: DevAddr) -> Option<NativeAddr> {
        let n = self.geo.from_device(d);
        (self.geo.check(n).is_ok() && self.geo.to_device(n) == d).then_some(n)
    }

    fn take_injection(&mut self, kind: InjectKind, addr: NativeAddr) -> bool {
        match self.injections.iter().position(|i| i.hits(kind, addr)) {
            Some(i) => {
                self.injections.remove(i);
                true
            }
            None => false
        }
    }

    fn descriptor(&self, i: usize) -> ChunkDescriptor {
        let c = &self.chunks[i];
        let nchunk = self.geo.nchunk as usize;
        let lun = i / nchunk;
        let a = NativeAddr::new(
            (lun / self.geo.npunit as usize) as u32,
            (lun % self.geo.npunit as usize) as u32,
            (i % nchunk) as u32,
            0
        );
        ChunkDescriptor {
            state: c.state,
            ctype: 1,
            wli: c.wli,
            slba: self.geo.to_device(a).0,
            cnlb: u64::from(self.geo.nsectr),
            wp: c.wp
        }
    }

    fn read(&mut self, addr: DevAddr, data: &mut [u8], meta: &mut [u8])
        -> NvmRet
    {
        let Some(n) = self.native(addr) else {
            return ret(status::INVALID_FIELD);
        };
        if data.len() != self.geo.nbytes as usize {
            return ret(status::INVALID_FIELD);
        }
        let i = self.chunk_index(n);
        if self.chunks[i].state == ChunkState::Offline {
            return ret(status::OFFLINE_CHUNK);
        }
        if self.take_injection(InjectKind::ReadUncorrectable, n) {
            return ret(status::UNRECOVERED_READ);
        }
        data.fill(0);
        meta.fill(0);
        if let Some((d, m)) = self.chunks[i].sectors.get(&n.sector) {
            data.copy_from_slice(d);
            let len = meta.len().min(m.len());
            meta[..len].copy_from_slice(&m[..len]);
        }
        ret(status::SUCCESS)
    }

    fn write(&mut self, addr: DevAddr, data: &[u8], meta: &[u8]) -> NvmRet {
        let Some(n) = self.native(addr) else {
            return ret(status::INVALID_FIELD);
        };
        if data.len() != self.geo.nbytes as usize {
            return ret(status::INVALID_FIELD);
        }
        let i = self.chunk_index(n);
        if self.chunks[i].state == ChunkState::Offline {
            return ret(status::OFFLINE_CHUNK);
        }
        if self.take_injection(InjectKind::ProgramFailure, n) {
            self.chunks[i].state = ChunkState::Offline;
            return ret(status::WRITE_FAULT);
        }
        let nsectr = u64::from(self.geo.nsectr);
        let chunk = &mut self.chunks[i];
        if u64::from(n.sector) != chunk.wp {
            tracing::debug!(%n, wp = chunk.wp, "out of order write");
            return ret(status::OUT_OF_ORDER);
        }
        chunk.sectors.insert(n.sector, (data.to_vec(), meta.to_vec()));
        chunk.wp += 1;
        chunk.state = if chunk.wp == nsectr {
            ChunkState::Closed
        } else {
            ChunkState::Open
        };
        ret(status::SUCCESS)
    }

    fn reset(&mut self, addr: DevAddr) -> NvmRet {
        let Some(n) = self.native(addr) else {
            return ret(status::INVALID_FIELD);
        };
        let i = self.chunk_index(n);
        match self.chunks[i].state {
            ChunkState::Offline => return ret(status::OFFLINE_CHUNK),
            ChunkState::Free => return ret(status::INVALID_RESET),
            _ => ()
        }
        if self.take_injection(InjectKind::EraseFailure, n) {
            self.chunks[i].state = ChunkState::Offline;
            return ret(status::OFFLINE_CHUNK);
        }
        let chunk = &mut self.chunks[i];
        chunk.state = ChunkState::Free;
        chunk.wp = 0;
        chunk.wli = chunk.wli.wrapping_add(1);
        chunk.sectors.clear();
        ret(status::SUCCESS)
    }

    fn chunk_info(&self, lpo: u64, count: u32, data: &mut [u8]) -> NvmRet {
        let first = (lpo / CHUNK_DESCR_BYTES) as usize;
        let count = count as usize;
        if lpo % CHUNK_DESCR_BYTES != 0 ||
            first + count > self.chunks.len() ||
            data.len() < count * CHUNK_DESCR_BYTES as usize
        {
            return ret(status::INVALID_FIELD);
        }
        for (i, d) in data.chunks_exact_mut(CHUNK_DESCR_BYTES as usize)
            .take(count)
            .enumerate()
        {
            self.descriptor(first + i).encode(d);
        }
        ret(status::SUCCESS)
    }

    fn parity_init(&mut self, nlb: u16, parity: DevAddr, payload: &[u8])
        -> NvmRet
    {
        let n = usize::from(nlb) + 1;
        let Some(p) = self.native(parity) else {
            return ret(status::INVALID_FIELD);
        };
        if payload.len() < n * 8 {
            return ret(status::INVALID_FIELD);
        }
        let data = payload.chunks_exact(8)
            .take(n)
            .map(|b| DevAddr(LittleEndian::read_u64(b)))
            .collect::<Vec<_>>();
        let mut luns = BTreeSet::new();
        luns.insert((p.group, p.unit));
        for d in data.iter() {
            let Some(x) = self.native(*d) else {
                return ret(status::INVALID_FIELD);
            };
            // One chunk per LUN, all at the parity chunk's index
            if x.chunk != p.chunk || x.sector != 0 ||
                !luns.insert((x.group, x.unit))
            {
                return ret(status::INVALID_FIELD);
            }
            if self.chunks[self.chunk_index(x)].state == ChunkState::Offline {
                return ret(status::OFFLINE_CHUNK);
            }
        }
        self.parity.insert(p.chunk, SimParityLine { parity, data });
        ret(status::SUCCESS)
    }

    fn inject(&mut self, kind: InjectKind, die: bool, addr: DevAddr) -> NvmRet
    {
        let Some(addr) = self.native(addr) else {
            return ret(status::INVALID_FIELD);
        };
        self.injections.push(Injection { kind, die, addr });
        ret(status::SUCCESS)
    }

    /// Execute a command that transfers data from the device
    fn exec_recv(&mut self, cmd: &Command, data: &mut [u8], meta: &mut [u8])
        -> NvmRet
    {
        self.log.push(cmd.clone());
        match cmd {
            Command::Read { addr, .. } => self.read(*addr, data, meta),
            Command::ChunkInfo { lpo, count } =>
                self.chunk_info(*lpo, *count, data),
            Command::ErrorInjectionPending => {
                if self.injections.is_empty() {
                    ret(status::SUCCESS)
                } else {
                    ret(status::INJECTION_PENDING)
                }
            }
            Command::ReadSys => {
                if data.len() != self.reserved.len() {
                    return ret(status::INVALID_FIELD);
                }
                data.copy_from_slice(&self.reserved);
                ret(status::SUCCESS)
            }
            _ => ret(status::INVALID_OPCODE)
        }
    }

    /// Execute a command that transfers data to the device, if any
    fn exec_send(&mut self, cmd: &Command, data: &[u8], meta: &[u8]) -> NvmRet
    {
        self.log.push(cmd.clone());
        match cmd {
            Command::Write { addr, .. } => self.write(*addr, data, meta),
            Command::ChunkReset { addr, .. } => self.reset(*addr),
            Command::ParityInit { nlb, parity } =>
                self.parity_init(*nlb, *parity, data),
            Command::ErrorInjection { kind, die, addr } =>
                self.inject(*kind, *die, *addr),
            Command::WriteSys => {
                if data.len() != self.reserved.len() {
                    return ret(status::INVALID_FIELD);
                }
                self.reserved.copy_from_slice(data);
                ret(status::SUCCESS)
            }
            _ => ret(status::INVALID_OPCODE)
        }
    }

    /// A command arrived on a queue that doesn't accept its opcode.  It is
    /// logged but not executed.
    fn wrong_queue(&mut self, cmd: &Command) -> NvmRet {
        tracing::debug!(?cmd, "command sent on the wrong queue");
        self.log.push(cmd.clone());
        ret(status::INVALID_OPCODE)
    }

    fn exec_request(&mut self, req: Request) -> Completion {
        let Request { tag, cmd, mut data, mut meta } = req;
        if cmd.is_admin() {
            return Completion { tag, ret: self.wrong_queue(&cmd) };
        }
        let ret = match (&cmd, &mut data, &mut meta) {
            (Command::Read { .. } | Command::ChunkInfo { .. } |
             Command::ErrorInjectionPending | Command::ReadSys, d, m) => {
                match (in_slice(d), in_slice(m)) {
                    (Some(d), Some(m)) => self.exec_recv(&cmd, d, m),
                    _ => ret(status::INVALID_FIELD)
                }
            }
            (_, d, m) => {
                match (out_slice(d), out_slice(m)) {
                    (Some(d), Some(m)) => self.exec_send(&cmd, d, m),
                    _ => ret(status::INVALID_FIELD)
                }
            }
        };
        Completion { tag, ret }
    }
}

fn in_slice(b: &mut ReqBuf) -> Option<&mut [u8]> {
    match b {
        ReqBuf::None => Some(Default::default()),
        ReqBuf::In(dbm) => Some(&mut dbm[..]),
        _ => None
    }
}

fn out_slice(b: &ReqBuf) -> Option<&[u8]> {
    match b {
        ReqBuf::None => Some(&[]),
        ReqBuf::Out(db) => Some(&db[..]),
        ReqBuf::Owned(v) => Some(&v[..]),
        ReqBuf::In(_) => None
    }
}

/// Handle to a simulated device.  Clones share the same device, so a test can
/// keep one to inspect the device while another is owned by a
/// [`Device`](crate::device::Device).
#[derive(Clone, Debug)]
pub struct SimDevice(Arc<Mutex<Inner>>);

impl SimDevice {
    /// A device with every chunk free
    pub fn new(model: &str, geo: Geometry) -> Self {
        let chunks = vec![SimChunk::default(); geo.nchunk_total()];
        let reserved = vec![0u8; SYS_RW_NSECTORS * geo.nbytes as usize];
        SimDevice(Arc::new(Mutex::new(Inner {
            model: model.to_owned(),
            geo,
            chunks,
            reserved,
            injections: Vec::new(),
            parity: BTreeMap::new(),
            completions: VecDeque::new(),
            log: Vec::new(),
            fail_submit: None,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn geometry(&self) -> Geometry {
        self.lock().geo
    }

    /// Take a chunk offline, as though it had worn out
    pub fn set_offline(&self, addr: NativeAddr) -> Result<()> {
        let mut inner = self.lock();
        inner.geo.check(addr)?;
        let i = inner.chunk_index(addr);
        inner.chunks[i].state = ChunkState::Offline;
        Ok(())
    }

    /// Pretend that the first `wp` sectors of a chunk have been written with
    /// zeros
    pub fn set_write_pointer(&self, addr: NativeAddr, wp: u64) -> Result<()> {
        let mut inner = self.lock();
        inner.geo.check(addr)?;
        let nsectr = u64::from(inner.geo.nsectr);
        if wp > nsectr {
            return Err(Error::InvalidArgument);
        }
        let nbytes = inner.geo.nbytes as usize;
        let i = inner.chunk_index(addr);
        let chunk = &mut inner.chunks[i];
        chunk.sectors = (0..wp as u32)
            .map(|s| (s, (vec![0u8; nbytes], Vec::new())))
            .collect();
        chunk.wp = wp;
        chunk.state = match wp {
            0 => ChunkState::Free,
            wp if wp == nsectr => ChunkState::Closed,
            _ => ChunkState::Open
        };
        Ok(())
    }

    /// Live descriptor of one chunk
    pub fn chunk(&self, addr: NativeAddr) -> Option<ChunkDescriptor> {
        let inner = self.lock();
        inner.geo.check(addr).ok()?;
        Some(inner.descriptor(inner.chunk_index(addr)))
    }

    /// Contents of one written sector
    pub fn sector(&self, addr: NativeAddr) -> Option<Vec<u8>> {
        let inner = self.lock();
        inner.geo.check(addr).ok()?;
        inner.chunks[inner.chunk_index(addr)]
            .sectors
            .get(&addr.sector)
            .map(|(d, _)| d.clone())
    }

    /// The parity line most recently initialized at a chunk index
    pub fn parity_line(&self, chunk: u32) -> Option<SimParityLine> {
        self.lock().parity.get(&chunk).cloned()
    }

    /// Every command executed so far, oldest first
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    /// Make the next call to [`Transport::submit`] fail with `e`
    pub fn fail_next_submit(&self, e: Error) {
        self.lock().fail_submit = Some(e);
    }

    /// Completions not yet drained
    pub fn pending_completions(&self) -> usize {
        self.lock().completions.len()
    }
}

impl Transport for SimDevice {
    fn identify(&mut self) -> Result<Identify> {
        let inner = self.lock();
        Ok(Identify { model: inner.model.clone(), geometry: inner.geo })
    }

    fn admin_recv(&mut self, cmd: &Command, data: &mut [u8]) -> Result<NvmRet>
    {
        let mut inner = self.lock();
        if !cmd.is_admin() {
            return Ok(inner.wrong_queue(cmd));
        }
        Ok(inner.exec_recv(cmd, data, &mut []))
    }

    fn admin_send(&mut self, cmd: &Command, data: &[u8]) -> Result<NvmRet> {
        let mut inner = self.lock();
        if !cmd.is_admin() {
            return Ok(inner.wrong_queue(cmd));
        }
        Ok(inner.exec_send(cmd, data, &[]))
    }

    fn io_recv(&mut self, cmd: &Command, data: &mut [u8], meta: &mut [u8])
        -> Result<NvmRet>
    {
        let mut inner = self.lock();
        if cmd.is_admin() {
            return Ok(inner.wrong_queue(cmd));
        }
        Ok(inner.exec_recv(cmd, data, meta))
    }

    fn io_send(&mut self, cmd: &Command, data: &[u8], meta: &[u8])
        -> Result<NvmRet>
    {
        let mut inner = self.lock();
        if cmd.is_admin() {
            return Ok(inner.wrong_queue(cmd));
        }
        Ok(inner.exec_send(cmd, data, meta))
    }

    fn submit(&mut self, reqs: Vec<Request>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(e) = inner.fail_submit.take() {
            return Err(e);
        }
        for req in reqs {
            let c = inner.exec_request(req);
            inner.completions.push_back(c);
        }
        Ok(())
    }

    fn get_completions(&mut self, _min: usize, max: usize)
        -> Result<Vec<Completion>>
    {
        let mut inner = self.lock();
        let n = max.min(inner.completions.len());
        Ok(inner.completions.drain(..n).collect())
    }
}

// LCOV_EXCL_STOP
