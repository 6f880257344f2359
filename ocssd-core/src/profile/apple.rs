// vim: tw=80
//! The Apple profile
//!
//! Apple devices manage their own bad blocks and don't support parity lines.
//! Superblock erases reset every chunk of the superblock, whatever its state.

use super::*;

#[derive(Debug, Default)]
pub struct Apple {}

impl Apple {
    /// Every chunk of each superblock, across all LUNs
    fn sb_members(geo: &Geometry, addrs: &[LegacyAddr])
        -> Result<Vec<NativeAddr>>
    {
        let mut members = Vec::new();
        members.try_reserve_exact(addrs.len() * geo.nlun_total())?;
        for addr in addrs {
            let chunk = superblock(geo, addr)?;
            members.extend(iproduct!(0..geo.npugrp, 0..geo.npunit)
                .map(|(group, unit)| NativeAddr::new(group, unit, chunk, 0)));
        }
        Ok(members)
    }
}

impl DeviceProfile for Apple {
    fn name(&self) -> &'static str {
        "apple"
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

    fn erase(&mut self, port: &mut Port, addrs: &[LegacyAddr]) -> Result<()> {
        erase_chunks(port, addrs)
    }

    fn erase_sb(&mut self, port: &mut Port, addrs: &[LegacyAddr])
        -> Result<()>
    {
        let members = Self::sb_members(&port.geo, addrs)?;
        reset_all(port, &members)
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
            let members = Self::sb_members(&port.geo, &ctx.addrs)?;
            reset_bodies(&port.geo, &members)
        })
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

    /// The device hides its bad blocks, so every chunk looks good
    fn get_bbt(&mut self, port: &mut Port, group: u32, unit: u32)
        -> Result<Bbt>
    {
        if group >= port.geo.npugrp || unit >= port.geo.npunit {
            return Err(Error::InvalidAddress);
        }
        Bbt::new(port.geo.nchunk as usize)
    }
}

// LCOV_EXCL_STOP
