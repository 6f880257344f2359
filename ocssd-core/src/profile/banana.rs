// vim: tw=80
//! The Banana profile: full capability set, with emulated bad-block tables and
//! parity-protected lines

use crate::{
    bbt::BbtCache,
    command::InjectKind,
    line::LineCache,
    parity
};
use super::*;

#[derive(Debug)]
pub struct Banana {
    bbt: BbtCache,
    lines: LineCache,
}

impl Banana {
    /// Build the bad-block tables from a report of every LUN
    pub fn new(port: &mut Port) -> Result<Self> {
        let bbt = BbtCache::init(&mut *port.io, &port.geo)?;
        Ok(Banana { bbt, lines: LineCache::default() })
    }

    /// Chunks of one superblock that need resetting
    fn sb_members(&self, port: &mut Port, addr: &LegacyAddr)
        -> Result<Vec<NativeAddr>>
    {
        let chunk = superblock(&port.geo, addr)?;
        superblock_members(port, chunk, |a| self.bbt.is_bad(a))
    }

    fn inject(&mut self, port: &mut Port, addrs: &[LegacyAddr],
              kind: InjectKind) -> Result<()>
    {
        let die = kind == InjectKind::ProgramFailure;
        for addr in natives(&port.geo, addrs)? {
            let cmd = Command::ErrorInjection {
                kind,
                die,
                addr: port.geo.to_device(addr)
            };
            port.io.admin_send(&cmd, &[])?.check()?;
        }
        Ok(())
    }

    fn parity_init_bodies(&mut self, port: &mut Port, ctx: &CmdCtx)
        -> Result<Vec<ReqBody>>
    {
        let [addr] = ctx.addrs.as_slice() else {
            tracing::debug!(naddrs = ctx.addrs.len(),
                "parity init takes exactly one address");
            return Err(Error::InvalidArgument);
        };
        port.geo.check_legacy(*addr)?;
        let target = port.geo.to_native(*addr);
        let (line, cmd, payload) =
            parity::init_command(port, &self.bbt, target)?;
        let mut bodies = Vec::new();
        bodies.try_reserve_exact(1)?;
        bodies.push(ReqBody {
            cmd,
            data: ReqBuf::Owned(payload),
            meta: ReqBuf::None
        });
        // Cached before submission, whether or not submission succeeds
        self.lines.set(line);
        Ok(bodies)
    }

    fn parity_out_plan(&mut self, port: &mut Port, ctx: &CmdCtx)
        -> Result<Vec<NativeAddr>>
    {
        let mut plan = Vec::new();
        for target in natives(&port.geo, &ctx.addrs)? {
            let fills = parity::out_plan(port, &self.bbt, &mut self.lines,
                                         target)?;
            plan.try_reserve(fills.len())?;
            plan.extend(fills);
        }
        Ok(plan)
    }

    fn reserved_len(port: &Port, nsectors: usize, len: usize)
        -> Result<usize>
    {
        if nsectors != SYS_RW_NSECTORS {
            tracing::debug!(nsectors, "reserved area needs exactly 8 sectors");
            return Err(Error::InvalidArgument);
        }
        let nbytes = SYS_RW_NSECTORS * port.geo.nbytes as usize;
        if len < nbytes {
            return Err(Error::InvalidArgument);
        }
        Ok(nbytes)
    }
}

impl DeviceProfile for Banana {
    fn name(&self) -> &'static str {
        "banana"
    }

    fn read(&mut self, port: &mut Port, addrs: &[LegacyAddr],
            data: &mut [u8], meta: &mut [u8]) -> Result<()>
    {
        read_sectors(port, addrs, data, meta)
    }

    fn write(&mut self, port: &mut Port, addrs: &[LegacyAddr], data: &[u8],
             meta: &[u8]) -> Result<()>
    {
        write_sectors(port, addrs, data, meta)
    }

    fn protected_write(&mut self, port: &mut Port, addrs: &[LegacyAddr],
                       data: &[u8], meta: &[u8]) -> Result<()>
    {
        write_sectors(port, addrs, data, meta)
    }

    fn erase(&mut self, port: &mut Port, addrs: &[LegacyAddr]) -> Result<()> {
        erase_chunks(port, addrs)
    }

    fn erase_sb(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        for addr in addrs {
            let members = self.sb_members(port, addr)?;
            reset_all(port, &members)?;
        }
        Ok(())
    }

    fn parity_init(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        for target in natives(&port.geo, addrs)? {
            parity::init(port, &self.bbt, &mut self.lines, target)?;
        }
        Ok(())
    }

    fn parity_out(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        for target in natives(&port.geo, addrs)? {
            parity::out(port, &self.bbt, &mut self.lines, target)?;
        }
        Ok(())
    }

    fn read_reserved(&mut self, port: &mut Port, nsectors: usize,
                     data: &mut [u8]) -> Result<()>
    {
        let nbytes = Self::reserved_len(port, nsectors, data.len())?;
        port.io.admin_recv(&Command::ReadSys, &mut data[..nbytes])?.check()?;
        Ok(())
    }

    fn write_reserved(&mut self, port: &mut Port, nsectors: usize,
                      data: &[u8]) -> Result<()>
    {
        let nbytes = Self::reserved_len(port, nsectors, data.len())?;
        port.io.admin_send(&Command::WriteSys, &data[..nbytes])?.check()?;
        Ok(())
    }

    fn inject_read_failed(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        self.inject(port, addrs, InjectKind::ReadUncorrectable)
    }

    fn inject_write_failed(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        self.inject(port, addrs, InjectKind::ProgramFailure)
    }

    fn inject_erase_failed(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        self.inject(port, addrs, InjectKind::EraseFailure)
    }

    fn error_injection_pending(&mut self, port: &mut Port) -> Result<bool> {
        let ret = port.io.admin_recv(&Command::ErrorInjectionPending,
                                     &mut [])?;
        match ret.status {
            0 => Ok(false),
            1 => Ok(true),
            _ => ret.check().map(|_| false)
        }
    }

    fn async_read(&mut self, port: &mut Port, ctx: CmdCtx) -> SubmitResult {
        super::async_read(port, ctx)
    }

    fn async_protected_write(&mut self, port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        async_write(port, ctx)
    }

    fn async_erase_sb(&mut self, port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        submit_with(port, ctx, CtxOp::Erase, |port, ctx| {
            if ctx.addrs.len() != 1 {
                tracing::debug!(naddrs = ctx.addrs.len(),
                    "only one superblock may be erased at a time");
                return Err(Error::InvalidArgument);
            }
            let members = self.sb_members(port, &ctx.addrs[0])?;
            if members.is_empty() {
                return Err(Error::InvalidArgument);
            }
            reset_bodies(&port.geo, &members)
        })
    }

    fn async_parity_init(&mut self, port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        submit_with(port, ctx, CtxOp::ParityInit,
                    |port, ctx| self.parity_init_bodies(port, ctx))
    }

    fn async_parity_out(&mut self, port: &mut Port, ctx: CmdCtx)
        -> SubmitResult
    {
        let plan = match self.parity_out_plan(port, &ctx) {
            Ok(plan) => plan,
            Err(e) => return Err(Rejected::new(e, ctx))
        };
        if plan.is_empty() {
            tracing::debug!("every stripe is already complete");
            port.complete(ctx, CtxOp::ParityOut);
            return Ok(());
        }
        match parity::fill_requests(&port.geo, &plan) {
            Ok(bodies) => port.submit(ctx, CtxOp::ParityOut, bodies),
            Err(e) => Err(Rejected::new(e, ctx))
        }
    }

    fn reap(&mut self, port: &mut Port, min: usize, max: usize)
        -> Result<Vec<CmdCtx>>
    {
        port.reap(min, max)
    }

    fn chunk_report(&mut self, port: &mut Port, lun: Option<(u32, u32)>)
        -> Result<ChunkReport>
    {
        port.report(lun)
    }

    fn get_bbt(&mut self, port: &mut Port, group: u32, unit: u32)
        -> Result<Bbt>
    {
        self.bbt.get(&mut *port.io, &port.geo, group, unit)
    }

    fn set_bbt(&mut self, port: &mut Port, addrs: &[LegacyAddr],
               state: BbtState) -> Result<()>
    {
        for addr in addrs {
            if addr.pl != 0 {
                return Err(Error::InvalidAddress);
            }
            port.geo.check_legacy(*addr)?;
            let n = port.geo.to_native(*addr);
            self.bbt.set(n.group, n.unit, n.chunk, state)?;
        }
        Ok(())
    }
    fn line(&mut self, port: &mut Port, chunk: u32) -> Result<Line> {
        self.lines.get_or_build(&port.geo, &self.bbt, chunk).cloned()
    }
}

// LCOV_EXCL_STOP
