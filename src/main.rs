use anyhow::Context;
use gbx_rs::{DirSource, Gbx, NodeRef, Settings};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .context("Need config filename arg")?;
    let config = Config::load(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log.filter).context("Invalid log filter")?)
        .init();

    if let Some(output) = &config.output {
        std::fs::create_dir_all(output)
            .with_context(|| format!("Creating output folder {}", output.display()))?;
    }

    let settings = config.settings();
    let mut files = Vec::new();
    for input in config.input.iter() {
        collect_gbx_files(input, &mut files)
            .with_context(|| format!("Walking input {}", input.display()))?;
    }
    tracing::info!("{} files to round-trip", files.len());

    let mut identical = 0;
    let mut failed = 0;
    for file in files.iter() {
        match round_trip(file, &settings, config.output.as_deref()) {
            Ok(true) => identical += 1,
            Ok(false) => tracing::warn!("{} changed after round trip", file.display()),
            Err(err) => {
                failed += 1;
                tracing::error!("{}: {:?}", file.display(), err);
            }
        }
    }

    tracing::info!(
        "{} of {} identical, {} failed",
        identical,
        files.len(),
        failed
    );
    Ok(())
}

fn collect_gbx_files(path: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if path.is_file() {
        files.push(path.to_owned());
        return Ok(());
    }

    for entry in std::fs::read_dir(path)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_gbx_files(&path, files)?;
        } else if path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("gbx"))
        {
            files.push(path);
        }
    }

    Ok(())
}

/// Reads and re-writes one file. Returns whether the bytes are unchanged.
fn round_trip(file: &Path, settings: &Settings, output: Option<&Path>) -> anyhow::Result<bool> {
    let data = std::fs::read(file).context("Reading file")?;
    let mut gbx = Gbx::read_with(&data, settings.clone()).context("Parsing")?;

    let root = gbx.root();
    tracing::debug!(
        "{}: {} with {} unknown chunks, {} external references",
        file.display(),
        root.class.name(),
        root.unknown_chunks().count(),
        gbx.ref_table.entries.len()
    );

    let source = DirSource::for_document(file);
    for entry in 0..gbx.ref_table.entries.len() {
        match gbx.resolve(NodeRef::External(entry), &source) {
            Ok(resolved) => tracing::debug!(
                "  reference {} is a {}",
                entry,
                resolved.node().class.name()
            ),
            Err(err) => tracing::debug!("  reference {} unresolved: {}", entry, err),
        }
    }

    let written = gbx.write_with(settings).context("Writing")?;

    if let Some(output) = output {
        let name = file.file_name().context("Input has no file name")?;
        std::fs::write(output.join(name), &written).context("Storing output")?;
    }

    Ok(written == data)
}
