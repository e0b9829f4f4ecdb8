//! Tapedeck CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use tapedeck::Config;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DISCRIMINATORS: [&str; 3] = ["PASSED", "FAILED", "SKIPPED"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = &args[1];

    let result = match command.as_str() {
        "stats" => match args.get(2) {
            Some(dir) => show_stats(&PathBuf::from(dir)),
            None => {
                eprintln!("Usage: tapedeck stats <recording-dir>");
                process::exit(1);
            }
        },
        "check-config" => match args.get(2) {
            Some(file) => check_config(&PathBuf::from(file)),
            None => {
                eprintln!("Usage: tapedeck check-config <config.toml>");
                process::exit(1);
            }
        },
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'tapedeck' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!("Tapedeck v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: tapedeck <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  stats <dir>            Count retained recordings by outcome");
    eprintln!("  check-config <file>    Validate a configuration file");
}

fn show_stats(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("Directory not found: {}", dir.display());
    }

    let mut counts = [0usize; DISCRIMINATORS.len()];
    let mut other = 0usize;
    let mut bytes = 0u64;

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        // In-flight transfers
        if name.starts_with('.') {
            debug!("Skipping {}", name);
            continue;
        }

        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        bytes += meta.len();

        match DISCRIMINATORS
            .iter()
            .position(|d| name.starts_with(&format!("{d}-")))
        {
            Some(i) => counts[i] += 1,
            None => other += 1,
        }
    }

    println!("Recording directory: {}", dir.display());
    println!();
    for (discriminator, count) in DISCRIMINATORS.iter().zip(counts) {
        println!("  {discriminator:<8} {count}");
    }
    println!("  {:<8} {other}", "OTHER");
    println!();
    println!("Total size: {bytes} bytes");

    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;

    println!("Configuration OK: {}", path.display());
    println!("  mode:             {:?}", config.mode);
    println!("  recording_dir:    {}", config.recording_dir.display());
    println!("  finalize timeout: {:?}", config.finalize_timeout());
    println!(
        "  skipped kept:     {}",
        config.policy.retain_skipped_when_failing
    );
    println!("  keep unfinalized: {}", config.policy.transfer_unfinalized);
    println!("  max sessions:     {}", config.limits.max_sessions);

    Ok(())
}
