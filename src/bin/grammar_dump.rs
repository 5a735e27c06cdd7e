use ante::grammar::{Symbol, SymbolTable};
use ante::io_utils::{ante_cli_error, io_cli_error};
use clap::Parser;
use std::path::PathBuf;

/// Dump a merge table as CSV: one row per symbol with its expansion.
#[derive(Parser)]
struct Args {
    /// Merge table file (ngrams-*.bin)
    table: PathBuf,
    /// Output CSV path
    output: PathBuf,
}

pub fn dump_table_to_csv(table: &SymbolTable, path: &std::path::Path) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["Index", "Kind", "Left", "Right", "TextHex", "Text"])?;
    for id in 0..table.n_tokens() as u32 {
        let (kind, left, right) = match table.symbol(id) {
            Some(Symbol::Atomic(_) | Symbol::Cluster(_)) => ("atom", String::new(), String::new()),
            Some(Symbol::Pair(l, r)) => ("pair", l.to_string(), r.to_string()),
            Some(Symbol::Terminator) | None => ("end", String::new(), String::new()),
        };
        let text = table.decode(&[id]);
        wtr.write_record([
            id.to_string(),
            kind.to_string(),
            left,
            right,
            hex::encode(text.as_bytes()),
            text,
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let table = SymbolTable::from_path(&args.table).map_err(|e| match e {
        ante::AnteError::Io(io) => io_cli_error("reading merge table", &args.table, io),
        other => ante_cli_error("loading merge table", other),
    })?;
    dump_table_to_csv(&table, &args.output)?;
    Ok(())
}
