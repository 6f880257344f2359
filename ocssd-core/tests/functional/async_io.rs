// vim: tw=80
//! Asynchronous submission and reaping
use divbuf::DivBufShared;
use ocssd_core::{
    Error,
    chunk::ChunkState,
    command::CtxOp,
    ctx::CmdCtx,
    geometry::LegacyAddr,
    sim::status,
};
use pretty_assertions::assert_eq;

use super::*;

const ADDRS: [LegacyAddr; 3] = [
    LegacyAddr::new(0, 0, 0, 1, 0, 0),
    LegacyAddr::new(0, 1, 0, 1, 0, 0),
    LegacyAddr::new(1, 0, 0, 1, 0, 0),
];

fn pattern() -> Vec<u8> {
    (0..3 * 4096).map(|i| (i / 4096 + 1) as u8 ^ (i % 251) as u8).collect()
}

#[test]
fn reap_idle() {
    let (_sim, mut dev) = open("BANANA", geo());
    assert!(dev.reap(0, 8).unwrap().is_empty());
}

/// A three-address read comes back exactly once, after all three sectors
#[test_log::test]
fn read_back() {
    let (_sim, mut dev) = open("BANANA", geo());
    let wbuf = pattern();
    dev.write(&ADDRS, &wbuf, &[]).unwrap();

    let ctx = CmdCtx::new(ADDRS.to_vec())
        .with_data(DivBufShared::from(vec![0u8; 3 * 4096]))
        .with_meta(DivBufShared::from(vec![0xffu8; 3 * 16]))
        .with_private(0xdead);
    dev.async_read(ctx).unwrap();
    assert_eq!(dev.inflight(), 1);

    let mut done = dev.reap(1, 8).unwrap();
    assert_eq!(done.len(), 1);
    assert!(dev.reap(0, 8).unwrap().is_empty());
    assert_eq!(dev.inflight(), 0);

    let ctx = done.pop().unwrap();
    assert_eq!(ctx.opcode, Some(CtxOp::Read));
    assert_eq!(ctx.private, 0xdead);
    assert!(!ctx.is_err());
    let rbuf = ctx.data.as_ref().unwrap().try_const().unwrap();
    assert_eq!(&rbuf[..], &wbuf[..]);
    let meta = ctx.meta.as_ref().unwrap().try_const().unwrap();
    assert!(meta.iter().all(|b| *b == 0));
}

/// Each logical command is delivered on its own when max is one
#[test]
fn one_at_a_time() {
    let (_sim, mut dev) = open("BANANA", geo());
    dev.write(&ADDRS, &pattern(), &[]).unwrap();
    for private in 0..2 {
        let ctx = CmdCtx::new(ADDRS[1..].to_vec())
            .with_data(DivBufShared::from(vec![0u8; 2 * 4096]))
            .with_private(private);
        dev.async_read(ctx).unwrap();
    }
    assert_eq!(dev.inflight(), 2);
    let first = dev.reap(0, 1).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].private, 0);
    let second = dev.reap(0, 0).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].private, 1);
    assert_eq!(dev.inflight(), 0);
}

/// One failed sector fails the whole logical command, which is still
/// delivered once
#[test_log::test]
fn partial_failure() {
    let (sim, mut dev) = open("BANANA", geo());
    sim.set_offline(NativeAddr::new(0, 1, 1, 0)).unwrap();
    let ctx = CmdCtx::new(ADDRS.to_vec())
        .with_data(DivBufShared::from(vec![0u8; 3 * 4096]));
    dev.async_read(ctx).unwrap();
    let done = dev.reap(1, 8).unwrap();
    assert_eq!(done.len(), 1);
    assert!(done[0].is_err());
    assert_eq!(done[0].status, status::OFFLINE_CHUNK);
    assert!(dev.reap(0, 8).unwrap().is_empty());
}

/// A transport that refuses the batch gets nothing, and the caller gets its
/// context back
#[test]
fn submit_failure() {
    let (sim, mut dev) = open("BANANA", geo());
    sim.fail_next_submit(Error::NoMemory);
    let ctx = CmdCtx::new(ADDRS.to_vec())
        .with_data(DivBufShared::from(pattern()))
        .with_private(3);
    let rejected = dev.async_protected_write(ctx).unwrap_err();
    assert_eq!(rejected.error, Error::NoMemory);
    assert_eq!(rejected.ctx.addrs, ADDRS.to_vec());
    assert_eq!(rejected.ctx.private, 3);
    assert!(rejected.ctx.opcode.is_none());
    assert_eq!(dev.inflight(), 0);
    assert_eq!(sim.pending_completions(), 0);
    assert_eq!(sim.chunk(NativeAddr::new(0, 0, 1, 0)).unwrap().wp, 0);
}

#[test]
fn short_buffer() {
    let (_sim, mut dev) = open("BANANA", geo());
    let ctx = CmdCtx::new(ADDRS.to_vec())
        .with_data(DivBufShared::from(vec![0u8; 4096]));
    let rejected = dev.async_read(ctx).unwrap_err();
    assert_eq!(rejected.error, Error::InvalidArgument);
}

#[test_log::test]
fn protected_write() {
    let (sim, mut dev) = open("BANANA", geo());
    let wbuf = pattern();
    let ctx = CmdCtx::new(ADDRS.to_vec())
        .with_data(DivBufShared::from(wbuf.clone()));
    dev.async_protected_write(ctx).unwrap();
    let done = dev.reap(1, 1).unwrap();
    assert_eq!(done[0].opcode, Some(CtxOp::Write));
    assert!(!done[0].is_err());
    let s = sim.sector(NativeAddr::new(1, 0, 1, 0)).unwrap();
    assert_eq!(&s[..], &wbuf[2 * 4096..]);
}

mod erase_sb {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Closed chunks are reset.  Offline ones are left alone.
    #[test_log::test]
    fn banana() {
        let (sim, mut dev) = open("BANANA", geo());
        for (group, unit) in [(0, 0), (0, 1), (1, 1)] {
            sim.set_write_pointer(NativeAddr::new(group, unit, 5, 0), 64)
                .unwrap();
        }
        sim.set_offline(NativeAddr::new(1, 0, 5, 0)).unwrap();
        let ctx = CmdCtx::new(vec![LegacyAddr::block(0, 0, 5)]);
        dev.async_erase_sb(ctx).unwrap();
        let done = dev.reap(1, 1).unwrap();
        assert_eq!(done[0].opcode, Some(CtxOp::Erase));
        assert!(!done[0].is_err());
        for (group, unit) in [(0, 0), (0, 1), (1, 1)] {
            let d = sim.chunk(NativeAddr::new(group, unit, 5, 0)).unwrap();
            assert_eq!(d.state, ChunkState::Free);
        }
        let d = sim.chunk(NativeAddr::new(1, 0, 5, 0)).unwrap();
        assert_eq!(d.state, ChunkState::Offline);
    }

    #[test]
    fn two_superblocks() {
        let (_sim, mut dev) = open("BANANA", geo());
        let ctx = CmdCtx::new(vec![
            LegacyAddr::block(0, 0, 5),
            LegacyAddr::block(0, 0, 6),
        ]);
        let rejected = dev.async_erase_sb(ctx).unwrap_err();
        assert_eq!(rejected.error, Error::InvalidArgument);
        assert_eq!(rejected.ctx.addrs.len(), 2);
    }

    /// Apple resets every chunk, so resetting a free one fails at the device
    #[test]
    fn apple_free_chunk() {
        let (sim, mut dev) = open("APPLE", geo());
        for (group, unit) in [(0, 0), (0, 1), (1, 0)] {
            sim.set_write_pointer(NativeAddr::new(group, unit, 2, 0), 64)
                .unwrap();
        }
        let ctx = CmdCtx::new(vec![LegacyAddr::block(0, 0, 2)]);
        dev.async_erase_sb(ctx).unwrap();
        let done = dev.reap(1, 1).unwrap();
        assert_eq!(done[0].status, status::INVALID_RESET);
        let d = sim.chunk(NativeAddr::new(1, 0, 2, 0)).unwrap();
        assert_eq!(d.state, ChunkState::Free);
    }
}
