// vim: tw=80
use std::{
    fs,
    io,
    path::PathBuf,
    process::exit,
};

use clap::{crate_version, Parser};
use ocssd_core::{
    SYS_RW_NSECTORS,
    bbt::BbtState,
    command::Command,
    device::Device,
    geometry::{LegacyAddr, NativeAddr},
    profile::ProfileKind,
    sim::{SimConfig, SimDevice},
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] serde_yaml_ng::Error),
    #[error("{0}")]
    Device(#[from] ocssd_core::Error),
}

type Result<T> = std::result::Result<T, CliError>;

#[derive(Parser, Clone, Debug)]
/// Print the device geometry in both address dialects
struct ShowGeometry {}

impl ShowGeometry {
    fn main(self, dev: &Device) -> Result<()> {
        let g = dev.geometry();
        let mut table = tabular::Table::new("{:<}  {:>}");
        let rows = [
            ("groups", g.npugrp),
            ("units per group", g.npunit),
            ("chunks per unit", g.nchunk),
            ("sectors per chunk", g.nsectr),
            ("sector bytes", g.nbytes),
            ("metadata bytes", g.nbytes_oob),
            ("planes", g.nplanes),
            ("blocks per plane", g.nblocks()),
            ("pages per block", g.npages()),
            ("sectors per page", g.nsectors),
        ];
        for (name, value) in rows {
            table.add_row(tabular::Row::new()
                .with_cell(name)
                .with_cell(value));
        }
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Translate a legacy address into native and device addresses
struct Translate {
    ch:  u32,
    lun: u32,
    pl:  u32,
    blk: u32,
    pg:  u32,
    sec: u32,
}

impl Translate {
    fn main(self, dev: &Device) -> Result<()> {
        let geo = dev.geometry();
        let legacy = LegacyAddr::new(self.ch, self.lun, self.pl, self.blk,
                                     self.pg, self.sec);
        geo.check_legacy(legacy)?;
        let native = geo.to_native(legacy);
        println!("legacy  {legacy}");
        println!("native  {native}");
        println!("device  {}", geo.to_device(native));
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Print the chunk report of one LUN, or of the whole device
struct Report {
    #[clap(long, requires = "lun")]
    ch:  Option<u32>,
    #[clap(long, requires = "ch")]
    lun: Option<u32>,
}

impl Report {
    fn main(self, dev: &mut Device) -> Result<()> {
        let geo = *dev.geometry();
        let (addr, base) = match (self.ch, self.lun) {
            (Some(ch), Some(lun)) => {
                let base = geo.lun_index(ch, lun) * geo.nchunk as usize;
                (Some(LegacyAddr::block(ch, lun, 0)), base)
            }
            _ => (None, 0)
        };
        let report = dev.chunk_report(addr)?;
        let mut table = tabular::Table::new(
            "{:>}  {:>}  {:>}  {:<}  {:>}  {:>}");
        table.add_row(tabular::Row::new()
            .with_cell("GRP")
            .with_cell("PU")
            .with_cell("CHUNK")
            .with_cell("STATE")
            .with_cell("WP")
            .with_cell("WLI"));
        let nchunk = geo.nchunk as usize;
        for (i, d) in report.descrs.iter().enumerate() {
            let lun = (base + i) / nchunk;
            table.add_row(tabular::Row::new()
                .with_cell(lun / geo.npunit as usize)
                .with_cell(lun % geo.npunit as usize)
                .with_cell((base + i) % nchunk)
                .with_cell(format!("{:?}", d.state))
                .with_cell(d.wp)
                .with_cell(d.wli));
        }
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Show, or override, the bad-block table of one LUN
struct Bbt {
    #[clap(long, default_value_t = 0)]
    ch:    u32,
    #[clap(long, default_value_t = 0)]
    lun:   u32,
    /// Override the entries of these blocks before printing
    #[clap(long, value_delimiter = ',')]
    mark:  Vec<u32>,
    /// New state of the marked blocks: 0 (free), 1 (bad), 2 (grown bad),
    /// 4 (device reserved) or 8 (host reserved)
    #[clap(long, default_value_t = 1)]
    state: u16,
}

impl Bbt {
    fn main(self, dev: &mut Device) -> Result<()> {
        if !self.mark.is_empty() {
            let state = BbtState::try_from(self.state)?;
            let addrs = self.mark.iter()
                .map(|blk| LegacyAddr::block(self.ch, self.lun, *blk))
                .collect::<Vec<_>>();
            dev.set_bbt(&addrs, state)?;
        }
        let bbt = dev.get_bbt(LegacyAddr::block(self.ch, self.lun, 0))?;
        println!("bad {}  grown {}  device reserved {}  host reserved {}",
            bbt.nbad(), bbt.ngrown(), bbt.ndev_reserved(),
            bbt.nhost_reserved());
        let mut table = tabular::Table::new("{:>}  {:<}");
        for (chunk, state) in bbt.iter().enumerate() {
            if state != BbtState::Free {
                table.add_row(tabular::Row::new()
                    .with_cell(chunk)
                    .with_cell(format!("{state:?}")));
            }
        }
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Show which chunks make up the line at one block index
struct ShowLine {
    blk: u32,
}

impl ShowLine {
    fn main(self, dev: &mut Device) -> Result<()> {
        let geo = *dev.geometry();
        let line = dev.line(LegacyAddr::block(0, 0, self.blk))?;
        for m in line.members.iter() {
            println!("{}  {}", geo.to_device(*m), geo.to_legacy(*m));
        }
        println!("{} members, {} bytes", line.len(), line.nbytes(&geo));
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Erase every closed chunk of one superblock
struct EraseSb {
    blk: u32,
}

impl EraseSb {
    fn main(self, dev: &mut Device, sim: &SimDevice) -> Result<()> {
        let geo = *dev.geometry();
        sim.clear_commands();
        dev.erase_sb(&[LegacyAddr::block(0, 0, self.blk)])?;
        let mut n = 0;
        for cmd in sim.commands() {
            if let Command::ChunkReset { addr, .. } = cmd {
                println!("reset {}", geo.from_device(addr));
                n += 1;
            }
        }
        println!("{n} chunks reset");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Put a line under parity protection and pad its stripes
struct Parity {
    /// Channel of the parity chunk
    #[clap(long, default_value_t = 0)]
    ch:        u32,
    /// LUN of the parity chunk
    #[clap(long, default_value_t = 0)]
    lun:       u32,
    /// Don't pad the line after initializing it
    #[clap(long)]
    init_only: bool,
    blk:       u32,
}

impl Parity {
    fn main(self, dev: &mut Device, sim: &SimDevice) -> Result<()> {
        let geo = *dev.geometry();
        let target = LegacyAddr::block(self.ch, self.lun, self.blk);
        dev.parity_init(&[target])?;
        let NativeAddr { chunk, .. } = geo.to_native(target);
        if let Some(line) = sim.parity_line(chunk) {
            println!("parity  {}", geo.from_device(line.parity));
            for d in line.data {
                println!("data    {}", geo.from_device(d));
            }
        }
        if !self.init_only {
            sim.clear_commands();
            dev.parity_out(&[target])?;
            let n = sim.commands()
                .iter()
                .filter(|c| matches!(c, Command::Write { .. }))
                .count();
            println!("{n} filler sectors written");
        }
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Dump the reserved system area, optionally filling it first
struct Reserved {
    /// Fill the whole area with this byte before reading it
    #[clap(long)]
    fill: Option<u8>,
    /// Number of bytes to dump
    #[clap(long, default_value_t = 64)]
    len:  usize,
}

impl Reserved {
    fn main(self, dev: &mut Device) -> Result<()> {
        let nbytes = SYS_RW_NSECTORS * dev.geometry().nbytes as usize;
        if let Some(b) = self.fill {
            dev.write_reserved(SYS_RW_NSECTORS, &vec![b; nbytes])?;
        }
        let mut buf = vec![0u8; nbytes];
        dev.read_reserved(SYS_RW_NSECTORS, &mut buf)?;
        for line in hexdump::hexdump_iter(&buf[..self.len.min(nbytes)]) {
            println!("{}", &*line);
        }
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
enum SubCommand {
    Geometry(ShowGeometry),
    Translate(Translate),
    Report(Report),
    Bbt(Bbt),
    Line(ShowLine),
    EraseSb(EraseSb),
    Parity(Parity),
    Reserved(Reserved),
}

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
/// Exercise an Open-Channel SSD through a simulated device
struct Cli {
    /// YAML description of the simulated device
    #[clap(short, long)]
    config:  PathBuf,
    /// Open the device with this profile instead of recognizing its model
    #[clap(long)]
    profile: Option<ProfileKind>,
    #[clap(subcommand)]
    cmd:     SubCommand,
}

impl Cli {
    fn open(&self) -> Result<(SimDevice, Device)> {
        let yaml = fs::read_to_string(&self.config)?;
        let sim = SimConfig::from_yaml(&yaml)?.build()?;
        let io = Box::new(sim.clone());
        let dev = match self.profile {
            Some(kind) => Device::open_as(io, kind)?,
            None => Device::open(io)?
        };
        Ok((sim, dev))
    }

    fn main(self) -> Result<()> {
        let (sim, mut dev) = self.open()?;
        match self.cmd {
            SubCommand::Geometry(geometry) => geometry.main(&dev),
            SubCommand::Translate(translate) => translate.main(&dev),
            SubCommand::Report(report) => report.main(&mut dev),
            SubCommand::Bbt(bbt) => bbt.main(&mut dev),
            SubCommand::Line(line) => line.main(&mut dev),
            SubCommand::EraseSb(erase_sb) => erase_sb.main(&mut dev, &sim),
            SubCommand::Parity(parity) => parity.main(&mut dev, &sim),
            SubCommand::Reserved(reserved) => reserved.main(&mut dev),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    let cli: Cli = Cli::parse();
    if let Err(e) = cli.main() {
        eprintln!("Error: {e}");
        exit(1);
    }
}
