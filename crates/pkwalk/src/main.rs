use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::fs;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::sync::Arc;

use pagekit::{
    Architecture, Engine, EntryKind, Level, LevelMask, PagingGeometry, PhysMemFile,
    PhysicalAddress, Pid, ResolvedEntrySet, RiscvVariant, SoftwareAddressSpace,
    StaticProcessTable, VirtualAddress,
};

mod logger;

use logger::StderrLogger;

/// The memory image has a single address space, registered under this pid.
const PID: Pid = 0;

#[derive(Parser)]
#[command(name = "pkwalk")]
#[command(about = "Resolve and edit page-table entries in a physical memory file")]
struct Args {
    /// Physical memory file, e.g. /dev/mem or a raw memory dump
    #[arg(short, long)]
    memory: PathBuf,

    /// Paging architecture of the memory image
    #[arg(short, long, value_enum)]
    arch: ArchArg,

    /// Paging root as stored in CR3, TTBR0_EL1 or satp
    #[arg(short, long, value_parser = parse_number)]
    root: u64,

    /// Named paging layout; defaults to the architecture's common layout
    #[arg(short, long, value_enum)]
    geometry: Option<GeometryArg>,

    /// Paging control register (CR4, TCR_EL1 or satp) to derive the layout from
    #[arg(long, value_parser = parse_number, conflicts_with = "geometry")]
    control: Option<u64>,

    /// Increase log output; repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every level of the walk for an address
    Resolve {
        #[arg(value_parser = parse_number)]
        vaddr: u64,
    },
    /// Set one bit in the selected levels of an address's entries
    SetBit {
        #[arg(value_parser = parse_number)]
        vaddr: u64,
        bit: u32,
        #[arg(short, long, value_enum, value_delimiter = ',', default_value = "pte")]
        levels: Vec<LevelArg>,
    },
    /// Clear one bit in the selected levels of an address's entries
    ClearBit {
        #[arg(value_parser = parse_number)]
        vaddr: u64,
        bit: u32,
        #[arg(short, long, value_enum, value_delimiter = ',', default_value = "pte")]
        levels: Vec<LevelArg>,
    },
    /// Point the last-level entry of an address at another frame
    SetPfn {
        #[arg(value_parser = parse_number)]
        vaddr: u64,
        #[arg(value_parser = parse_number)]
        pfn: u64,
    },
    /// Dump one physical page
    ReadPage {
        #[arg(value_parser = parse_number)]
        pfn: u64,

        /// Write the raw page here instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Command {
    fn writes(&self) -> bool {
        matches!(
            self,
            Command::SetBit { .. } | Command::ClearBit { .. } | Command::SetPfn { .. }
        )
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ArchArg {
    #[value(name = "x86_64")]
    X86_64,
    Aarch64,
    Riscv64,
    /// RISC-V with T-Head C9xx memory-type bits
    Thead,
}

impl From<ArchArg> for Architecture {
    fn from(arch: ArchArg) -> Self {
        match arch {
            ArchArg::X86_64 => Architecture::X86_64,
            ArchArg::Aarch64 => Architecture::Aarch64,
            ArchArg::Riscv64 => Architecture::Riscv64(RiscvVariant::Standard),
            ArchArg::Thead => Architecture::Riscv64(RiscvVariant::THeadC9xx),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GeometryArg {
    #[value(name = "4level")]
    FourLevel,
    #[value(name = "5level")]
    FiveLevel,
    #[value(name = "arm-4k-39")]
    Arm4k39,
    #[value(name = "arm-4k-48")]
    Arm4k48,
    #[value(name = "arm-16k")]
    Arm16k,
    #[value(name = "arm-64k")]
    Arm64k,
    Sv39,
    Sv48,
    Sv57,
}

impl From<GeometryArg> for PagingGeometry {
    fn from(geometry: GeometryArg) -> Self {
        match geometry {
            GeometryArg::FourLevel => PagingGeometry::x86_64_4level(),
            GeometryArg::FiveLevel => PagingGeometry::x86_64_5level(),
            GeometryArg::Arm4k39 => PagingGeometry::aarch64_4k_39bit(),
            GeometryArg::Arm4k48 => PagingGeometry::aarch64_4k_48bit(),
            GeometryArg::Arm16k => PagingGeometry::aarch64_16k(),
            GeometryArg::Arm64k => PagingGeometry::aarch64_64k(),
            GeometryArg::Sv39 => PagingGeometry::sv39(),
            GeometryArg::Sv48 => PagingGeometry::sv48(),
            GeometryArg::Sv57 => PagingGeometry::sv57(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Pgd,
    P4d,
    Pud,
    Pmd,
    Pte,
    All,
}

fn level_mask(levels: &[LevelArg]) -> LevelMask {
    levels.iter().fold(LevelMask::empty(), |mask, level| {
        mask | match level {
            LevelArg::Pgd => LevelMask::PGD,
            LevelArg::P4d => LevelMask::P4D,
            LevelArg::Pud => LevelMask::PUD,
            LevelArg::Pmd => LevelMask::PMD,
            LevelArg::Pte => LevelMask::PTE,
            LevelArg::All => LevelMask::all(),
        }
    })
}

/// Parses a decimal number or a `0x`-prefixed hexadecimal one.
fn parse_number(value: &str) -> Result<u64, ParseIntError> {
    match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.parse::<u64>(),
    }
}

fn geometry(args: &Args) -> Result<PagingGeometry, pagekit::Error> {
    let arch = Architecture::from(args.arch);
    if let Some(geometry) = args.geometry {
        return Ok(geometry.into());
    }
    let Some(control) = args.control else {
        return Ok(match arch {
            Architecture::X86_64 => PagingGeometry::x86_64_4level(),
            Architecture::Aarch64 => PagingGeometry::aarch64_4k_48bit(),
            Architecture::Riscv64(_) => PagingGeometry::sv39(),
        });
    };
    match arch {
        Architecture::X86_64 => PagingGeometry::from_x86_64_cr4(control),
        Architecture::Aarch64 => PagingGeometry::from_aarch64_tcr(control),
        Architecture::Riscv64(_) => PagingGeometry::from_riscv_satp(control),
    }
}

type Walker = Engine<StaticProcessTable<SoftwareAddressSpace>, PhysMemFile>;

fn open(args: &Args) -> Result<Walker, Box<dyn Error>> {
    let memory = PhysMemFile::open(&args.memory, args.command.writes())
        .map_err(|e| format!("Failed to open {}: {}", args.memory.display(), e))?;

    let processes = StaticProcessTable::new();
    let root = PhysicalAddress::new(args.root);
    processes.insert(PID, Arc::new(SoftwareAddressSpace::new(root)));

    Ok(Engine::new(args.arch.into(), geometry(args)?, processes, memory)?)
}

fn print_entries(engine: &Walker, entries: &ResolvedEntrySet) {
    let arch = engine.architecture();
    let leaf = engine.geometry().leaf_level();
    println!("{} in pid {}", entries.vaddr(), entries.pid());

    for level in engine.geometry().present_levels() {
        let Some(raw) = entries.entry(level) else {
            println!("  {level}: -");
            continue;
        };
        let kind = if level == leaf {
            EntryKind::Page
        } else {
            EntryKind::Directory
        };
        let entry = arch.decode(raw, kind);
        if !entry.present {
            println!("  {level}: {raw:#018x} not present");
            continue;
        }
        println!(
            "  {level}: {raw:#018x} pfn={:#x}{}{} {:?}",
            entry.pfn,
            if entry.is_huge(kind) { " huge" } else { "" },
            entry
                .memory_type
                .map(|mt| format!(" mt={mt}"))
                .unwrap_or_default(),
            entry.permissions
        );
    }
}

fn print_written(written: LevelMask) {
    let names: Vec<String> = Level::ALL
        .into_iter()
        .filter(|level| written.has(*level))
        .map(|level| level.to_string())
        .collect();
    if names.is_empty() {
        println!("no level written");
    } else {
        println!("wrote {}", names.join(", "));
    }
}

fn hex_dump(base: u64, page: &[u8]) {
    for (row, chunk) in page.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:#012x}: {}", base + row as u64 * 16, bytes.join(" "));
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let engine = open(&args)?;

    match args.command {
        Command::Resolve { vaddr } => {
            let entries = engine.resolve(VirtualAddress::new(vaddr), PID)?;
            print_entries(&engine, &entries);
        }
        Command::SetBit { vaddr, bit, levels } => {
            let written =
                engine.set_bit(VirtualAddress::new(vaddr), PID, level_mask(&levels), bit)?;
            print_written(written);
        }
        Command::ClearBit { vaddr, bit, levels } => {
            let written =
                engine.clear_bit(VirtualAddress::new(vaddr), PID, level_mask(&levels), bit)?;
            print_written(written);
        }
        Command::SetPfn { vaddr, pfn } => {
            if !engine.pte_set_pfn(VirtualAddress::new(vaddr), PID, pfn)? {
                return Err(format!("{vaddr:#x} has no last-level entry").into());
            }
            println!("{vaddr:#x} now maps pfn {pfn:#x}");
        }
        Command::ReadPage { pfn, output } => {
            let mut page = vec![0; engine.page_size() as usize];
            engine.read_physical_page(pfn, &mut page)?;
            match output {
                Some(path) => fs::write(path, &page)?,
                None => hex_dump(pfn * engine.page_size(), &page),
            }
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    StderrLogger::install(args.verbose)?;
    run(args)
}
