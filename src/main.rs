//! Promptgrid - run AI prompt spreadsheets from the command line

mod config;

use anyhow::{Context, Result, bail};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use promptgrid_core::{
    CellRef, Document, Evaluator, InMemoryCellStore, IntervalScheduler, RunState, parse_cell_ref,
};

use config::ProviderKind;

fn print_usage() {
    eprintln!("Usage: promptgrid [OPTIONS] FILE");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  FILE                       Workbook file (.json), created if missing");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --set <CELL=PROMPT>    Set a cell's prompt before running (can be repeated)");
    eprintln!("  -r, --run <CELL>           Run a cell, e.g. B1 or Sheet2!B1 (can be repeated)");
    eprintln!("      --check                Report circular references");
    eprintln!("      --show                 Print cell outputs when done");
    eprintln!("      --watch                Keep running interval cells until Ctrl-C");
    eprintln!("      --provider <KIND>      Generation provider: http or echo");
    eprintln!("      --config <FILE>        Load settings from this config.toml");
    eprintln!("      --no-save              Don't write changes back to FILE");
    eprintln!("  -h, --help                 Print help");
}

#[derive(Default)]
struct Args {
    file: Option<PathBuf>,
    set: Vec<(String, String)>,
    run: Vec<String>,
    check: bool,
    show: bool,
    watch: bool,
    provider: Option<ProviderKind>,
    config: Option<PathBuf>,
    no_save: bool,
}

fn next_value(args: &[String], i: &mut usize, what: &str) -> String {
    *i += 1;
    if *i >= args.len() {
        eprintln!("Error: {} requires a value", what);
        std::process::exit(1);
    }
    args[*i].clone()
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-s" | "--set" => {
                let value = next_value(&args, &mut i, "--set");
                let Some((cell, prompt)) = value.split_once('=') else {
                    eprintln!("Error: --set expects CELL=PROMPT, got '{}'", value);
                    std::process::exit(1);
                };
                parsed.set.push((cell.to_string(), prompt.to_string()));
            }
            "-r" | "--run" => parsed.run.push(next_value(&args, &mut i, "--run")),
            "--check" => parsed.check = true,
            "--show" => parsed.show = true,
            "--watch" => parsed.watch = true,
            "--no-save" => parsed.no_save = true,
            "--provider" => {
                let value = next_value(&args, &mut i, "--provider");
                match value.parse() {
                    Ok(kind) => parsed.provider = Some(kind),
                    Err(err) => {
                        eprintln!("Error: {}", err);
                        std::process::exit(1);
                    }
                }
            }
            "--config" => {
                parsed.config = Some(PathBuf::from(next_value(&args, &mut i, "--config")))
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
            _ => {
                if parsed.file.is_none() {
                    parsed.file = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: Unexpected argument: {}", args[i]);
                    print_usage();
                    std::process::exit(1);
                }
            }
        }
        i += 1;
    }
    parsed
}

fn init_tracing(level: &str) {
    let fallback = match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "error" => "error",
        _ => "warn",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Split `Sheet!A1` (or bare `A1`, meaning the first sheet).
fn resolve_target(doc: &Document, target: &str) -> Result<(String, CellRef)> {
    let (sheet_name, cell_id) = match target.split_once('!') {
        Some((sheet, cell)) => (sheet.to_string(), cell),
        None => {
            let sheet = doc.first_sheet().context("workbook has no sheets")?;
            (sheet.name, target)
        }
    };
    doc.sheet(&sheet_name)?;
    Ok((sheet_name, parse_cell_ref(cell_id)?))
}

fn report_cycles(doc: &Document) -> Result<()> {
    let mut found = false;
    for sheet in doc.workbook.sheets() {
        for cycle in doc.find_cycles(&sheet.name)? {
            let path: Vec<String> = cycle.iter().map(|c| c.to_string()).collect();
            println!("{}: {}", sheet.name, path.join(" -> "));
            found = true;
        }
    }
    if !found {
        println!("No circular references");
    }
    Ok(())
}

fn print_outputs(doc: &Document) {
    for sheet in doc.workbook.sheets() {
        for cell_ref in sheet.sorted_refs() {
            let Some(cell) = sheet.cell(&cell_ref) else {
                continue;
            };
            if cell.output.is_empty() {
                continue;
            }
            println!("{}!{}: {}", sheet.name, cell_ref, cell.output);
        }
    }
}

async fn run(args: Args, config: config::Config) -> Result<()> {
    let Some(path) = args.file else {
        print_usage();
        bail!("no workbook file given");
    };
    let mut doc = Document::with_file(Some(path.clone()))
        .with_context(|| format!("failed to open {}", path.display()))?;

    for (target, prompt) in &args.set {
        let (sheet, cell) = resolve_target(&doc, target)?;
        if let Some(cycle) = doc.set_prompt(&sheet, &cell, prompt)? {
            let path: Vec<String> = cycle.iter().map(|c| c.to_string()).collect();
            eprintln!("Warning: {}!{} closes a cycle: {}", sheet, cell, path.join(" -> "));
        }
    }

    if args.check {
        report_cycles(&doc)?;
    }

    if !args.run.is_empty() || args.watch {
        let store = Arc::new(InMemoryCellStore::from_workbook(&doc.workbook));
        let provider = config.build_provider()?;
        let evaluator = Arc::new(
            Evaluator::new(doc.workbook.clone(), store, provider)
                .with_config(config.evaluator.clone()),
        );

        for target in &args.run {
            let (sheet, cell) = resolve_target(&doc, target)?;
            let state = evaluator.run_cell(&sheet, &cell).await;
            println!("{}!{}: {:?}", sheet, cell, state);
            if !matches!(state, RunState::Busy | RunState::Coalesced) {
                doc.modified = true;
            }
        }

        if args.watch {
            let scheduler = IntervalScheduler::new(evaluator.clone());
            let count = scheduler.sync();
            if count == 0 {
                eprintln!("Nothing to watch: no cell has an interval");
            } else {
                eprintln!("Watching {} cell(s), Ctrl-C to stop", count);
                tokio::signal::ctrl_c().await?;
                scheduler.shutdown();
                doc.modified = true;
            }
        }
    }

    if args.show {
        print_outputs(&doc);
    }

    if doc.modified && !args.no_save {
        let saved = doc.save_file()?;
        eprintln!("Saved {}", saved.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let (mut config, warnings) = config::load_config(args.config.as_ref());
    if let Some(kind) = args.provider {
        config.provider = kind;
    }
    init_tracing(&config.log_level);
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }

    if let Err(e) = run(args, config).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
