//! # homestat CLI
//!
//! Command-line utilities for checking source files and decoding captured
//! device payloads offline.

use anyhow::{Context, Result};
use chrono::Utc;
use homestat_core::{load_sources, RecordContext, SourceConfig, SourceKind, SourceRegistry};
use homestat_devices::{Device, DeviceAdaptor, DeviceSnapshot};
use std::env;
use std::fmt::Write as _;
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "check" => {
            if args.len() < 3 {
                eprintln!("Usage: homestat check <config>");
                std::process::exit(1);
            }
            print!("{}", check(Path::new(&args[2]))?);
        }
        "decode" => {
            if args.len() < 4 {
                eprintln!("Usage: homestat decode <kind> <file>...");
                std::process::exit(1);
            }
            let kind: SourceKind = args[2].parse().context("Unknown source kind")?;
            let mut payloads = Vec::with_capacity(args.len() - 3);
            for file in &args[3..] {
                payloads.push(std::fs::read(file).with_context(|| format!("Failed to read {file}"))?);
            }
            for line in decode(kind, payloads)? {
                println!("{line}");
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Validate a source file and describe every source, credentials redacted.
fn check(path: &Path) -> Result<String> {
    let sources = load_sources(path)
        .with_context(|| format!("Failed to load sources from {}", path.display()))?;
    let registry = SourceRegistry::from_configs(sources).context("Invalid source set")?;

    let mut out = String::new();
    for source in registry.list() {
        writeln!(out, "{}", describe(source))?;
    }
    writeln!(out, "{} source(s) OK", registry.len())?;
    Ok(out)
}

fn describe(source: &SourceConfig) -> String {
    let credentials = if source.endpoint.credentials().is_some() {
        "set"
    } else {
        "none"
    };
    let window = source.active_window.map_or_else(
        || "always".to_string(),
        |w| format!("{}-{}", w.start(), w.end()),
    );
    format!(
        "{id}\t{kind}\t{endpoint}\tauth={auth}\tcredentials={credentials}\tinterval={interval}s\ttimeout={timeout}s\twindow={window}\tanchors={anchors}",
        id = source.id,
        kind = source.kind,
        endpoint = source.endpoint,
        auth = source.auth_required,
        interval = source.poll_interval.as_secs(),
        timeout = source.timeout.as_secs(),
        anchors = source.trust.anchors.len(),
    )
}

/// Normalize captured payloads and render each record as one JSON line.
///
/// Freebox payloads are given in fetch order: connection, system, switch
/// status, then one stats document per switch port.
fn decode(kind: SourceKind, payloads: Vec<Vec<u8>>) -> Result<Vec<String>> {
    let snapshot = DeviceSnapshot::from_payloads(kind, payloads).context("Invalid payload set")?;
    let ctx = RecordContext::new(kind.as_str(), Utc::now());
    let records = Device::new(kind, false)
        .normalize(&snapshot, &ctx)
        .context("Failed to decode payloads")?;

    records
        .iter()
        .map(|record| serde_json::to_string(record).context("Failed to serialize record"))
        .collect()
}

fn print_help() {
    println!(
        r#"homestat CLI

USAGE:
    homestat <COMMAND> [OPTIONS]

COMMANDS:
    check <config>           Validate a source file and list its sources
    decode <kind> <file>...  Normalize captured payloads (bbox, freebox, deye)
    help                     Show this help message

EXAMPLES:
    homestat check ./homestat.yaml
    homestat decode deye status.html
    homestat decode bbox cpu.json mem.json wan.json lan.json wifi24.json wifi5.json
"#
    );
}
