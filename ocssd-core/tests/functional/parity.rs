// vim: tw=80
use byteorder::{ByteOrder, LittleEndian};
use ocssd_core::{
    Error,
    chunk::ChunkState,
    command::{Command, CtxOp},
    ctx::CmdCtx,
    geometry::LegacyAddr,
};
use pretty_assertions::assert_eq;

use super::*;

mod init {
    use super::*;
    use pretty_assertions::assert_eq;

    /// The target's LUN becomes the parity chunk, and every other member is
    /// listed in line order
    #[test_log::test]
    fn excludes_target() {
        let geo = geo();
        let (sim, mut dev) = open("BANANA", geo);
        dev.parity_init(&[LegacyAddr::block(1, 0, 4)]).unwrap();
        let line = sim.parity_line(4).unwrap();
        assert_eq!(line.parity, geo.to_device(NativeAddr::new(1, 0, 4, 0)));
        assert_eq!(line.data, vec![
            geo.to_device(NativeAddr::new(0, 0, 4, 0)),
            geo.to_device(NativeAddr::new(0, 1, 4, 0)),
            geo.to_device(NativeAddr::new(1, 1, 4, 0)),
        ]);
    }

    /// Only one healthy chunk is left at the index
    #[test_log::test]
    fn insufficient() {
        let geo = Geometry::new(1, 2, 8, 64, 4096, 0).with_sectors_per_page(1);
        let (sim, mut dev) = open_with_offline("BANANA", geo, &[
            NativeAddr::new(0, 1, 4, 0)
        ]);
        let r = dev.parity_init(&[LegacyAddr::block(0, 0, 4)]);
        assert_eq!(r, Err(Error::InsufficientLine));
        assert!(sim.parity_line(4).is_none());
    }

    /// The target's own chunk is bad, so it can't hold parity
    #[test]
    fn target_is_bad() {
        let (sim, mut dev) = open_with_offline("BANANA", geo(), &[
            NativeAddr::new(1, 1, 4, 0)
        ]);
        let r = dev.parity_init(&[LegacyAddr::block(1, 1, 4)]);
        assert_eq!(r, Err(Error::InvalidAddress));
        assert!(sim.parity_line(4).is_none());
    }

    /// Several lines at once, stopping at the first failure
    #[test]
    fn multiple() {
        let (sim, mut dev) = open_with_offline("BANANA", geo(), &[
            NativeAddr::new(0, 0, 5, 0)
        ]);
        let r = dev.parity_init(&[
            LegacyAddr::block(0, 0, 1),
            LegacyAddr::block(0, 0, 5),
            LegacyAddr::block(0, 0, 2),
        ]);
        assert_eq!(r, Err(Error::InvalidAddress));
        assert!(sim.parity_line(1).is_some());
        assert!(sim.parity_line(5).is_none());
        assert!(sim.parity_line(2).is_none());
    }

    /// One line per asynchronous command
    #[test_log::test]
    fn async_one_line() {
        let geo = geo();
        let (sim, mut dev) = open("BANANA", geo);
        let ctx = CmdCtx::new(vec![LegacyAddr::block(0, 1, 3)])
            .with_private(9);
        dev.async_parity_init(ctx).unwrap();
        let done = dev.reap(1, 4).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].opcode, Some(CtxOp::ParityInit));
        assert_eq!(done[0].private, 9);
        assert!(!done[0].is_err());
        let line = sim.parity_line(3).unwrap();
        assert_eq!(line.parity, geo.to_device(NativeAddr::new(0, 1, 3, 0)));
        assert_eq!(line.data.len(), 3);
    }

    #[test]
    fn async_two_addresses() {
        let (sim, mut dev) = open("BANANA", geo());
        sim.clear_commands();
        let ctx = CmdCtx::new(vec![
            LegacyAddr::block(0, 1, 3),
            LegacyAddr::block(1, 0, 6),
        ]);
        let rejected = dev.async_parity_init(ctx).unwrap_err();
        assert_eq!(rejected.error, Error::InvalidArgument);
        assert_eq!(dev.inflight(), 0);
        assert!(sim.commands().is_empty());
        assert!(sim.parity_line(3).is_none());
        assert!(sim.parity_line(6).is_none());
    }

    mod queue {
        use std::sync::{Arc, Mutex};

        use ocssd_core::{
            NvmRet,
            Result,
            transport::{Completion, Identify, Request, Transport},
        };

        use super::*;

        use pretty_assertions::assert_eq;

        type Queues = Arc<Mutex<Vec<(&'static str, Command)>>>;

        /// Forwards to a [`SimDevice`], remembering which queue carried each
        /// command
        struct QueueSpy {
            sim: SimDevice,
            queues: Queues,
        }

        impl QueueSpy {
            fn record(&self, queue: &'static str, cmd: &Command) {
                self.queues.lock().unwrap().push((queue, cmd.clone()));
            }
        }

        impl Transport for QueueSpy {
            fn identify(&mut self) -> Result<Identify> {
                self.sim.identify()
            }

            fn admin_recv(&mut self, cmd: &Command, data: &mut [u8])
                -> Result<NvmRet>
            {
                self.record("admin", cmd);
                self.sim.admin_recv(cmd, data)
            }

            fn admin_send(&mut self, cmd: &Command, data: &[u8])
                -> Result<NvmRet>
            {
                self.record("admin", cmd);
                self.sim.admin_send(cmd, data)
            }

            fn io_recv(&mut self, cmd: &Command, data: &mut [u8],
                       meta: &mut [u8]) -> Result<NvmRet>
            {
                self.record("io", cmd);
                self.sim.io_recv(cmd, data, meta)
            }

            fn io_send(&mut self, cmd: &Command, data: &[u8], meta: &[u8])
                -> Result<NvmRet>
            {
                self.record("io", cmd);
                self.sim.io_send(cmd, data, meta)
            }

            fn submit(&mut self, reqs: Vec<Request>) -> Result<()> {
                for r in reqs.iter() {
                    self.record("io", &r.cmd);
                }
                self.sim.submit(reqs)
            }

            fn get_completions(&mut self, min: usize, max: usize)
                -> Result<Vec<Completion>>
            {
                self.sim.get_completions(min, max)
            }
        }

        fn open_spied() -> (SimDevice, Queues, Device) {
            let sim = SimDevice::new("BANANA", geo());
            let queues = Queues::default();
            let spy = QueueSpy { sim: sim.clone(), queues: queues.clone() };
            let dev = Device::open(Box::new(spy)).unwrap();
            (sim, queues, dev)
        }

        fn parity_queues(queues: &Queues) -> Vec<&'static str> {
            queues.lock()
                .unwrap()
                .iter()
                .filter(|(_, c)| matches!(c, Command::ParityInit{..}))
                .map(|(q, _)| *q)
                .collect()
        }

        #[test]
        fn sync() {
            let (sim, queues, mut dev) = open_spied();
            dev.parity_init(&[LegacyAddr::block(1, 0, 4)]).unwrap();
            assert_eq!(parity_queues(&queues), vec!["io"]);
            assert!(sim.parity_line(4).is_some());
        }

        #[test]
        fn asynchronous() {
            let (sim, queues, mut dev) = open_spied();
            let ctx = CmdCtx::new(vec![LegacyAddr::block(1, 0, 4)]);
            dev.async_parity_init(ctx).unwrap();
            assert!(!dev.reap(1, 1).unwrap()[0].is_err());
            assert_eq!(parity_queues(&queues), vec!["io"]);
            assert!(sim.parity_line(4).is_some());
        }

        /// Only the bad-block table reads go to the admin queue
        #[test]
        fn admin_traffic() {
            let (_sim, queues, mut dev) = open_spied();
            dev.parity_init(&[LegacyAddr::block(0, 0, 2)]).unwrap();
            assert!(queues.lock()
                .unwrap()
                .iter()
                .filter(|(q, _)| *q == "admin")
                .all(|(_, c)| matches!(c, Command::ChunkInfo{..})));
        }
    }
}

mod out {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Fill every data chunk of line 2 to capacity.  The parity chunk is on
    /// LUN (0, 0).
    #[test_log::test]
    fn pads_every_stripe() {
        let geo = geo();
        let (sim, mut dev) = open("BANANA", geo);
        let target = LegacyAddr::block(0, 0, 2);
        dev.parity_init(&[target]).unwrap();
        sim.set_write_pointer(NativeAddr::new(0, 1, 2, 0), 40).unwrap();
        sim.set_write_pointer(NativeAddr::new(1, 0, 2, 0), 32).unwrap();
        sim.set_write_pointer(NativeAddr::new(1, 1, 2, 0), 10).unwrap();
        sim.clear_commands();

        dev.parity_out(&[target]).unwrap();

        let nwrites = sim.commands()
            .iter()
            .filter(|c| matches!(c, Command::Write{..}))
            .count();
        assert_eq!(nwrites, 22 + 24 + 32 + 32);
        for (group, unit) in [(0, 1), (1, 0), (1, 1)] {
            let d = sim.chunk(NativeAddr::new(group, unit, 2, 0)).unwrap();
            assert_eq!(d.state, ChunkState::Closed);
            assert_eq!(d.wp, 64);
        }
        let parity = sim.chunk(NativeAddr::new(0, 0, 2, 0)).unwrap();
        assert_eq!(parity.state, ChunkState::Free);

        // Filler sectors identify their own legacy address
        let data = sim.sector(NativeAddr::new(1, 1, 2, 10)).unwrap();
        let mut fields = [0u64; 8];
        LittleEndian::read_u64_into(&data[..64], &mut fields);
        assert_eq!(fields, [1, 1, 0, 2, 10, 0, 1, 1]);

        // A second call has nothing left to do
        sim.clear_commands();
        dev.parity_out(&[target]).unwrap();
        assert!(!sim.commands()
            .iter()
            .any(|c| matches!(c, Command::Write{..})));
    }

    /// The parity chunk is not on a stripe boundary.  Nothing gets written.
    #[test_log::test]
    fn misaligned() {
        let (sim, mut dev) = open("BANANA", geo());
        let target = LegacyAddr::block(0, 0, 2);
        dev.parity_init(&[target]).unwrap();
        sim.set_write_pointer(NativeAddr::new(0, 0, 2, 0), 10).unwrap();
        for (group, unit) in [(0, 1), (1, 0), (1, 1)] {
            sim.set_write_pointer(NativeAddr::new(group, unit, 2, 0), 16)
                .unwrap();
        }
        sim.clear_commands();
        assert_eq!(dev.parity_out(&[target]), Err(Error::MisalignedStripe));
        assert!(sim.commands()
            .iter()
            .all(|c| matches!(c, Command::ChunkInfo{..})));
    }

    /// A data chunk lags behind the parity chunk
    #[test]
    fn lagging_data_chunk() {
        let (sim, mut dev) = open("BANANA", geo());
        let target = LegacyAddr::block(0, 0, 2);
        sim.set_write_pointer(NativeAddr::new(0, 0, 2, 0), 32).unwrap();
        sim.set_write_pointer(NativeAddr::new(0, 1, 2, 0), 40).unwrap();
        sim.set_write_pointer(NativeAddr::new(1, 0, 2, 0), 32).unwrap();
        sim.set_write_pointer(NativeAddr::new(1, 1, 2, 0), 31).unwrap();
        assert_eq!(dev.parity_out(&[target]), Err(Error::MisalignedStripe));
    }

    /// The asynchronous form submits the whole plan as one logical command
    #[test_log::test]
    fn async_fill() {
        let (sim, mut dev) = open("BANANA", geo());
        let target = LegacyAddr::block(1, 1, 7);
        dev.parity_init(&[target]).unwrap();
        for (group, unit) in [(0, 0), (0, 1), (1, 0)] {
            sim.set_write_pointer(NativeAddr::new(group, unit, 7, 0), 48)
                .unwrap();
        }
        let ctx = CmdCtx::new(vec![target]).with_private(7);
        dev.async_parity_out(ctx).unwrap();
        assert_eq!(dev.inflight(), 1);
        let done = dev.reap(1, 4).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].opcode, Some(CtxOp::ParityOut));
        assert_eq!(done[0].private, 7);
        assert!(!done[0].is_err());
        assert_eq!(sim.chunk(NativeAddr::new(1, 0, 7, 0)).unwrap().wp, 64);
        assert_eq!(dev.inflight(), 0);
    }

    /// With every stripe already complete, the command finishes without
    /// touching the device
    #[test]
    fn async_nothing_to_do() {
        let (sim, mut dev) = open("BANANA", geo());
        let target = LegacyAddr::block(0, 1, 3);
        for (group, unit) in [(0, 0), (1, 0), (1, 1)] {
            sim.set_write_pointer(NativeAddr::new(group, unit, 3, 0), 64)
                .unwrap();
        }
        sim.clear_commands();
        dev.async_parity_out(CmdCtx::new(vec![target])).unwrap();
        assert_eq!(sim.pending_completions(), 0);
        assert!(!sim.commands()
            .iter()
            .any(|c| matches!(c, Command::Write{..})));
        let done = dev.reap(0, 1).unwrap();
        assert_eq!(done[0].opcode, Some(CtxOp::ParityOut));
    }
}
