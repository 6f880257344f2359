// vim: tw=80
//! Synchronous operations through the dispatch façade
use ocssd_core::{
    Error,
    chunk::ChunkState,
    command::Command,
    geometry::LegacyAddr,
    profile::ProfileKind,
    sim::status,
};
use pretty_assertions::assert_eq;

use super::*;

#[test]
fn open_unknown_model() {
    let sim = SimDevice::new("DURIAN", geo());
    let r = Device::open(Box::new(sim.clone()));
    assert_eq!(r.err(), Some(Error::NoDevice));
    // Opening explicitly works regardless of the model
    let dev = Device::open_as(Box::new(sim), ProfileKind::Apple).unwrap();
    assert_eq!(dev.profile(), "apple");
}

/// Banana reads a report of every LUN at open time
#[test]
fn open_banana() {
    let (sim, dev) = open("BANANA OCSSD", geo());
    assert_eq!(dev.profile(), "banana");
    assert_eq!(dev.geometry(), &geo());
    let nreports = sim.commands()
        .iter()
        .filter(|c| matches!(c, Command::ChunkInfo{..}))
        .count();
    assert_eq!(nreports, 4);
}

/// Erasing (ch=1, lun=0, blk=3) resets exactly native chunk (1, 0, 3)
#[test_log::test]
fn erase_end_to_end() {
    let geo = geo();
    let (sim, mut dev) = open("BANANA", geo);
    let native = NativeAddr::new(1, 0, 3, 0);
    sim.set_write_pointer(native, 20).unwrap();
    sim.clear_commands();

    dev.erase(&[LegacyAddr::new(1, 0, 0, 3, 0, 0)]).unwrap();

    assert_eq!(sim.commands(), vec![Command::ChunkReset {
        addr: geo.to_device(native),
        kind: 0
    }]);
    assert_eq!(sim.chunk(native).unwrap().state, ChunkState::Free);
}

#[test_log::test]
fn write_then_read() {
    let (_sim, mut dev) = open("BANANA", geo());
    let addrs = [
        LegacyAddr::new(1, 1, 0, 6, 0, 0),
        LegacyAddr::new(1, 1, 0, 6, 1, 0),
    ];
    let wbuf = (0..2 * 4096).map(|i| (i % 256) as u8).collect::<Vec<_>>();
    let wmeta = vec![0x5au8; 2 * 16];
    dev.write(&addrs, &wbuf, &wmeta).unwrap();
    let mut rbuf = vec![0u8; 2 * 4096];
    let mut rmeta = vec![0u8; 2 * 16];
    dev.read(&addrs, &mut rbuf, &mut rmeta).unwrap();
    assert_eq!(rbuf, wbuf);
    assert_eq!(rmeta, wmeta);
}

/// The device rejects a write that skips ahead of the write pointer
#[test]
fn write_out_of_order() {
    let (sim, mut dev) = open("APPLE", geo());
    let r = dev.write(&[LegacyAddr::new(0, 0, 0, 0, 3, 0)], &[0; 4096], &[]);
    assert_eq!(r, Err(Error::TransportFailure {
        status: status::OUT_OF_ORDER,
        result: 0
    }));
    assert_eq!(sim.chunk(NativeAddr::default()).unwrap().wp, 0);
}

#[test]
fn out_of_range() {
    let (_sim, mut dev) = open("BANANA", geo());
    let r = dev.erase(&[LegacyAddr::block(0, 2, 0)]);
    assert_eq!(r, Err(Error::InvalidAddress));
}

mod erase_sb {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Only CLOSED chunks are reset
    #[test_log::test]
    fn banana() {
        let (sim, mut dev) = open_with_offline("BANANA", geo(), &[
            NativeAddr::new(0, 1, 4, 0)
        ]);
        sim.set_write_pointer(NativeAddr::new(0, 0, 4, 0), 64).unwrap();
        sim.set_write_pointer(NativeAddr::new(1, 0, 4, 0), 17).unwrap();
        sim.clear_commands();

        dev.erase_sb(&[LegacyAddr::block(0, 0, 4)]).unwrap();

        let resets = sim.commands()
            .into_iter()
            .filter(|c| matches!(c, Command::ChunkReset{..}))
            .collect::<Vec<_>>();
        assert_eq!(resets, vec![Command::ChunkReset {
            addr: geo().to_device(NativeAddr::new(0, 0, 4, 0)),
            kind: 0
        }]);
        let open = sim.chunk(NativeAddr::new(1, 0, 4, 0)).unwrap();
        assert_eq!(open.state, ChunkState::Open);
        assert_eq!(open.wp, 17);
    }

    #[test]
    fn not_a_superblock() {
        let (_sim, mut dev) = open("BANANA", geo());
        let r = dev.erase_sb(&[LegacyAddr::block(1, 0, 4)]);
        assert_eq!(r, Err(Error::InvalidAddress));
    }
}

mod reserved {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip() {
        let (_sim, mut dev) = open("BANANA", geo());
        let wbuf = vec![0x77u8; 8 * 4096];
        dev.write_reserved(8, &wbuf).unwrap();
        let mut rbuf = vec![0u8; 8 * 4096];
        dev.read_reserved(8, &mut rbuf).unwrap();
        assert_eq!(rbuf, wbuf);
    }

    #[test]
    fn wrong_size() {
        let (_sim, mut dev) = open("BANANA", geo());
        let mut buf = vec![0u8; 8 * 4096];
        assert_eq!(dev.read_reserved(4, &mut buf), Err(Error::InvalidArgument));
        assert_eq!(dev.write_reserved(8, &buf[..4096]),
                   Err(Error::InvalidArgument));
    }

    #[test]
    fn apple() {
        let (_sim, mut dev) = open("APPLE", geo());
        let mut buf = vec![0u8; 8 * 4096];
        assert_eq!(dev.read_reserved(8, &mut buf), Err(Error::NotSupported));
    }
}

mod inject {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn read_failed() {
        let (_sim, mut dev) = open("BANANA", geo());
        let addr = [LegacyAddr::new(0, 1, 0, 2, 0, 0)];
        dev.write(&addr, &[1; 4096], &[]).unwrap();
        dev.inject_read_failed(&addr).unwrap();
        assert_eq!(dev.error_injection_pending(), Ok(true));
        let mut buf = vec![0u8; 4096];
        assert_eq!(dev.read(&addr, &mut buf, &mut []),
            Err(Error::TransportFailure {
                status: status::UNRECOVERED_READ,
                result: 0
            }));
        assert_eq!(dev.error_injection_pending(), Ok(false));
        dev.read(&addr, &mut buf, &mut []).unwrap();
        assert_eq!(buf, vec![1u8; 4096]);
    }

    /// A program failure hits any chunk on the die, and the chunk goes bad
    #[test_log::test]
    fn write_failed() {
        let (sim, mut dev) = open("BANANA", geo());
        dev.inject_write_failed(&[LegacyAddr::block(1, 1, 0)]).unwrap();
        let r = dev.write(&[LegacyAddr::block(1, 1, 5)], &[2; 4096], &[]);
        assert_eq!(r, Err(Error::TransportFailure {
            status: status::WRITE_FAULT,
            result: 0
        }));
        let bbt = dev.get_bbt(LegacyAddr::block(1, 1, 0)).unwrap();
        assert!(bbt.is_bad(5).unwrap());
        assert_eq!(sim.chunk(NativeAddr::new(1, 1, 5, 0)).unwrap().state,
                   ChunkState::Offline);
    }

    #[test]
    fn erase_failed() {
        let (sim, mut dev) = open("BANANA", geo());
        let addr = [LegacyAddr::block(0, 0, 7)];
        sim.set_write_pointer(NativeAddr::new(0, 0, 7, 0), 64).unwrap();
        dev.inject_erase_failed(&addr).unwrap();
        assert_eq!(dev.erase(&addr), Err(Error::TransportFailure {
            status: status::OFFLINE_CHUNK,
            result: 0
        }));
    }

    #[test]
    fn apple() {
        let (_sim, mut dev) = open("APPLE", geo());
        assert_eq!(dev.error_injection_pending(), Err(Error::NotSupported));
    }
}

mod chunk_report {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_lun() {
        let (sim, mut dev) = open("APPLE", geo());
        sim.set_write_pointer(NativeAddr::new(1, 1, 6, 0), 12).unwrap();
        let report = dev.chunk_report(Some(LegacyAddr::block(1, 1, 0)))
            .unwrap();
        assert_eq!(report.len(), 8);
        let d = report.get(6).unwrap();
        assert_eq!(d.state, ChunkState::Open);
        assert_eq!(d.wp, 12);
        assert_eq!(d.cnlb, 64);
        assert_eq!(d.slba, geo().to_device(NativeAddr::new(1, 1, 6, 0)).0);
    }

    /// The whole device spans more than one log page
    #[test]
    fn whole_device() {
        let geo = Geometry::new(2, 4, 40, 64, 4096, 0)
            .with_sectors_per_page(1);
        let (_sim, mut dev) = open_with_offline("BANANA", geo, &[
            NativeAddr::new(1, 3, 39, 0)
        ]);
        let report = dev.chunk_report(None).unwrap();
        assert_eq!(report.len(), 320);
        assert_eq!(report.offline().collect::<Vec<_>>(), vec![319]);
    }
}
