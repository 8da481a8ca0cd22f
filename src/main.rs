// Tue Jan 13 2026 - Alex

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use smkm_offset_generator::{
    config::Config,
    finders::{CombinedResults, StDataMgrFinder, StoreField},
    memory::{load_x86_binary, MemoryReader},
    output::OutputManager,
    symbol::SymbolResolver,
    ui::{Banner, ProgressManager},
    utils::LoggingUtils,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author = "Alex")]
#[command(version)]
#[command(about = "Store manager (ST_STORE) structure offset generator for 32-bit Windows", long_about = None)]
struct Args {
    /// 32-bit PE image containing the store manager (e.g. rdyboost.sys).
    #[arg(short, long)]
    binary: PathBuf,

    /// Symbol map: JSON object or `ADDRESS NAME` lines.
    #[arg(short, long)]
    symbols: Option<PathBuf>,

    /// Addresses in the symbol map are relative to the image base.
    #[arg(long)]
    symbols_rva: bool,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    text_output: Option<PathBuf>,

    #[arg(long)]
    markdown_output: Option<PathBuf>,

    #[arg(long)]
    max_instructions: Option<usize>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long)]
    no_progress: bool,

    #[arg(long)]
    no_banner: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "[!]".red(), e);
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    config = config.with_target_binary(args.binary.clone());
    if let Some(map) = &args.symbols {
        let rva = args.symbols_rva || config.symbols_are_rva;
        config = config.with_symbol_map(map.clone(), rva);
    }
    if let Some(output) = &args.output {
        config = config.with_output_file(output.clone());
    }
    if args.text_output.is_some() {
        config.text_output_file = args.text_output.clone();
    }
    if args.markdown_output.is_some() {
        config.markdown_output_file = args.markdown_output.clone();
    }
    if let Some(max) = args.max_instructions {
        config = config.with_max_instructions(max);
    }
    if args.symbols_rva {
        config.symbols_are_rva = true;
    }
    if args.verbose > 0 {
        config = config.with_verbosity(args.verbose);
    }
    if args.no_progress {
        config.enable_progress_bars = false;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    if !args.no_banner {
        Banner::default().print();
    }

    let config = build_config(&args)?;
    smkm_offset_generator::utils::logging::init_from_env(LoggingUtils::level_from_verbosity(config.verbosity));

    let start_time = Instant::now();

    println!("{} Loading binary: {}", "[*]".blue(), args.binary.display());
    let binary = load_x86_binary(&args.binary).context("loading binary")?;
    println!(
        "{} Image base {}, {} section(s)",
        "[+]".green(),
        binary.image_base(),
        binary.sections().len()
    );
    config
        .validate_against_image(&binary.image_range())
        .map_err(anyhow::Error::msg)
        .context("emulation layout")?;

    let mut symbols = SymbolResolver::new();
    let from_image = symbols.load_from_binary(&binary);
    println!("{} {} symbol(s) from exports and imports", "[+]".green(), from_image);

    if let Some(map) = &config.symbol_map {
        let count = symbols
            .load_map_file(map, binary.image_base(), config.symbols_are_rva)
            .with_context(|| format!("loading symbol map {}", map.display()))?;
        println!("{} {} symbol(s) from {}", "[+]".green(), count, map.display());
    } else {
        println!(
            "{} No symbol map given; probes need the decorated ST_STORE names",
            "[!]".yellow()
        );
    }
    println!();

    let binary_name = args.binary.display().to_string();
    let reader: Arc<dyn MemoryReader> = Arc::new(binary);
    let finder = StDataMgrFinder::new(reader, Arc::new(symbols), config.clone());

    println!("{} Probing {} fields of {}...", "[*]".blue(), StoreField::ALL.len(), finder.structure_name());
    let progress = ProgressManager::new()
        .with_enabled(config.enable_progress_bars)
        .create(StoreField::ALL.len() as u64, "Probing...");

    let mut results = CombinedResults::new().with_binary(&binary_name);
    for result in finder.find_all_with(|r| {
        progress.set_message(r.field_name.clone());
        progress.inc(1);
    }) {
        results.add_structure_offset(result);
    }
    progress.finish_with_message("Complete!");
    println!();

    StDataMgrFinder::log_dump(&results.structure_offsets);

    print_results_summary(&results);

    for (format, path, outcome) in OutputManager::from_config(&config).save_all(&results) {
        match outcome {
            Ok(()) => println!("{} {} report saved to: {}", "[+]".green(), format, path.display()),
            Err(e) => eprintln!("{} Failed to save {} report: {}", "[!]".red(), format, e),
        }
    }

    let elapsed = start_time.elapsed();
    println!();
    println!("{}", "=".repeat(50).cyan());
    println!("{} Probing complete in {:.2}s", "[+]".green(), elapsed.as_secs_f64());
    println!(
        "{} Offsets found: {}/{} ({} assumed)",
        "[+]".green(),
        results.found_count(),
        results.total_count(),
        results.assumed_count()
    );

    Ok(())
}

fn print_results_summary(results: &CombinedResults) {
    println!("{}", "Results Summary".cyan().bold());
    println!("{}", "-".repeat(40).cyan());

    for result in &results.structure_offsets {
        let offset = match result.offset {
            Some(o) => format!("0x{:x}", o).green(),
            None => "missing".red(),
        };
        println!(
            "  {:<40} {:<10} {}",
            result.qualified_name().cyan(),
            offset,
            format!("[{}]", result.method).dimmed()
        );
    }
    println!();
}
