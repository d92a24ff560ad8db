// src/main.rs

use anyhow::{bail, Context, Result};
use gridstore::{Document, GridConfig, GridFs, PutOptions, RemovalSummary, RemoveOptions, SqliteStore};
use std::env;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: gridstore [--db <path>] <command>

Commands:
  put <path> [filename]   store a file (verified)
  get <id> <out>          write a stored file to <out>
  ls                      list stored files
  rm <filename>           remove every file with that name
  delete <id>             remove one file by id
  drop                    remove everything";

fn default_db_path() -> PathBuf {
    if let Ok(path) = env::var("GRIDSTORE_DB") {
        return PathBuf::from(path);
    }
    dirs::data_local_dir()
        .unwrap_or_else(env::temp_dir)
        .join("gridstore")
        .join("grid.db")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let db_path = match args.iter().position(|a| a == "--db") {
        Some(i) if i + 1 < args.len() => {
            let path = PathBuf::from(args.remove(i + 1));
            args.remove(i);
            path
        }
        Some(_) => bail!("--db needs a path\n\n{USAGE}"),
        None => default_db_path(),
    };

    let Some(command) = args.first().cloned() else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let grid = GridFs::new(Arc::new(store), GridConfig::default())?;
    tracing::debug!("Database: {}", db_path.display());

    match (command.as_str(), &args[1..]) {
        ("put", [path, rest @ ..]) => {
            let mut metadata = Document::new();
            if let Some(name) = rest.first() {
                metadata.insert("filename", name.as_str());
            }
            let record = grid.insert_path(Path::new(path), metadata, PutOptions::safe())?;
            println!("{}", record.id);
        }
        ("get", [id, out]) => {
            let file = match grid.resolve_id(id)? {
                Some(id) => grid.get(&id)?,
                None => None,
            }
            .with_context(|| format!("no file with id {id}"))?;
            let mut writer = BufWriter::new(File::create(out)?);
            let written = file.write_to(&mut writer, None, 0)?;
            tracing::info!("Wrote {} bytes to {}", written, out);
        }
        ("ls", []) => {
            for file in grid.all()? {
                println!("{}", file?);
            }
        }
        ("rm", [name]) => {
            let criteria = Document::new().with("filename", name.as_str());
            let summary = grid.remove(&criteria, RemoveOptions::all().strict())?;
            println!("removed {} file(s), {} chunk(s)", summary.files, summary.chunks);
        }
        ("delete", [id]) => {
            let summary = match grid.resolve_id(id)? {
                Some(id) => grid.delete(&id)?,
                None => RemovalSummary::default(),
            };
            println!("removed {} file(s), {} chunk(s)", summary.files, summary.chunks);
        }
        ("drop", []) => {
            grid.drop_all()?;
            println!("dropped");
        }
        _ => bail!("unrecognized command\n\n{USAGE}"),
    }

    Ok(())
}
