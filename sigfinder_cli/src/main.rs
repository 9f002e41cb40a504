use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use prettytable::{format, row, Cell, Row, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sigfinder::scanner::Pattern;
use sigfinder::{
    enumerate_regions, load_signatures, walk_regions, LocationTable, MemoryImage, ProcessMemory,
    SigFinder, Signature,
};

#[derive(Parser)]
#[command(name = "sigfinder", about = "Find signatures in the memory of a 32-bit process")]
enum Commands {
    Scan(CommandScan),
    Regions(CommandRegions),
    Pattern(CommandPattern),
}

/// Where 32-bit executables are usually mapped
const DEFAULT_BASE: u32 = 0x40_0000;

fn parse_maybe_hex(s: &str) -> Result<u32> {
    Ok(s.strip_prefix("0x")
        .map(|s| u32::from_str_radix(s, 16))
        .unwrap_or_else(|| s.parse())?)
}

#[derive(clap::Args)]
struct SourceArgs {
    /// A process ID to attach to
    #[arg(long, conflicts_with = "image", required_unless_present = "image")]
    pid: Option<u32>,

    /// A raw memory dump to scan instead of a live process
    #[arg(long)]
    image: Option<PathBuf>,

    /// Address the memory dump was taken from [default: 0x400000]
    #[arg(long, requires = "image", value_parser(|s: &str| parse_maybe_hex(s)))]
    base: Option<u32>,
}

impl SourceArgs {
    fn open(&self) -> Result<Box<dyn ProcessMemory>> {
        if let Some(path) = &self.image {
            let image = MemoryImage::from_file(path, self.base.unwrap_or(DEFAULT_BASE))
                .with_context(|| format!("failed to load memory dump {}", path.display()))?;
            return Ok(Box::new(image));
        }
        let pid = self.pid.context("either --pid or --image is required")?;
        open_process(pid)
    }
}

#[cfg(any(windows, target_os = "linux"))]
fn open_process(pid: u32) -> Result<Box<dyn ProcessMemory>> {
    sigfinder::process::open_process(pid).with_context(|| format!("failed to open process {pid}"))
}

#[cfg(not(any(windows, target_os = "linux")))]
fn open_process(_pid: u32) -> Result<Box<dyn ProcessMemory>> {
    anyhow::bail!("attaching to processes is not supported on this platform")
}

#[derive(Parser)]
struct CommandScan {
    /// A path to a JSON signature file
    #[arg(short, long)]
    signatures: PathBuf,

    #[command(flatten)]
    source: SourceArgs,

    /// Print the resolved locations as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct CommandRegions {
    #[command(flatten)]
    source: SourceArgs,

    /// Include regions that would not be scanned
    #[arg(short, long)]
    all: bool,
}

#[derive(Parser)]
struct CommandPattern {
    /// Patterns to compile (can be specified multiple times)
    #[arg(required = true)]
    patterns: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("sigfinder=info".parse()?))
        .init();

    match Commands::parse() {
        Commands::Scan(command) => scan(command),
        Commands::Regions(command) => regions(command),
        Commands::Pattern(command) => pattern(command),
    }
}

fn scan(command: CommandScan) -> Result<()> {
    let signatures = load_signatures(&command.signatures).with_context(|| {
        format!(
            "failed to load signatures from {}",
            command.signatures.display()
        )
    })?;
    info!("loaded {} signatures", signatures.len());

    let finder = SigFinder::with_source(Arc::from(command.source.open()?));
    let summary = finder
        .load_offsets(signatures.clone())?
        .wait()
        .context("resolution pass failed")?;

    let locations = finder.locations();
    if command.json {
        println!("{}", serde_json::to_string_pretty(&locations)?);
        return Ok(());
    }

    print_locations(&signatures, &locations);
    println!(
        "{} resolved, {} not found, {} invalid, {}/{} regions read in {:.2?}",
        summary.resolved.to_string().green(),
        summary.missing.to_string().yellow(),
        summary.invalid.to_string().red(),
        summary.regions_read,
        summary.regions,
        summary.elapsed
    );
    Ok(())
}

fn print_locations(signatures: &[Signature], locations: &LocationTable) {
    let mut table = Table::new();
    table.set_titles(row!["key", "pattern", "type", "offset", "address"]);
    for sig in signatures {
        let address = match locations.get(&sig.key) {
            Some(0) => "not found".yellow().to_string(),
            Some(address) => format!("{address:#010x}").green().to_string(),
            None => "invalid".red().to_string(),
        };
        table.add_row(Row::new(vec![
            Cell::new(&sig.key),
            Cell::new(&sig.pattern),
            Cell::new(&sig.result_type.to_string()),
            Cell::new(&sig.offset.to_string()),
            Cell::new(&address),
        ]));
    }
    table.printstd();
}

fn regions(command: CommandRegions) -> Result<()> {
    let source = command.source.open()?;
    let regions = if command.all {
        walk_regions(source.as_ref())
    } else {
        enumerate_regions(source.as_ref())
    };

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row!["base", "end", "size", "state", "protect", "scan"]);
    let mut total = 0u64;
    for region in &regions {
        let scannable = region.is_scannable();
        if scannable {
            total += region.size as u64;
        }
        let end = region
            .end()
            .map(|end| format!("{end:#010x}"))
            .unwrap_or_else(|| "end".to_string());
        table.add_row(Row::new(vec![
            Cell::new(&format!("{:#010x}", region.base_address)),
            Cell::new(&end),
            Cell::new(&format!("{:#x}", region.size)),
            Cell::new(&format!("{:?}", region.state)),
            Cell::new(&format!("{:?}", region.protect)),
            Cell::new(&if scannable {
                "yes".green().to_string()
            } else {
                "no".normal().to_string()
            }),
        ]));
    }
    table.printstd();
    println!("{} regions, {:#x} scannable bytes", regions.len(), total);
    Ok(())
}

fn pattern(command: CommandPattern) -> Result<()> {
    let mut table = Table::new();
    table.set_titles(row!["pattern", "length", "first wildcard", "matcher"]);
    for s in &command.patterns {
        let row = match Pattern::new(s) {
            Ok(pattern) => Row::new(vec![
                Cell::new(&pattern.to_string()),
                Cell::new(&pattern.len().to_string()),
                Cell::new(
                    &pattern
                        .first_wildcard()
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::new(if pattern.has_wildcards() {
                    "bndm"
                } else {
                    "horspool"
                }),
            ]),
            Err(err) => Row::new(vec![
                Cell::new(s),
                Cell::new(&err.to_string().red().to_string()),
            ]),
        };
        table.add_row(row);
    }
    table.printstd();
    Ok(())
}
