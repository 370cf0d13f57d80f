use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use modcache_core::cache::{CacheRecord, PathCache, Sidecar, BLOB_FILE_NAME, DIRTY_MARKER_NAME};
use modcache_core::engine::CompileTimeOnlyEngine;
use modcache_core::{CacheConfig, CacheStore, CliOverrides, FileSystem, RealFileSystem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// modcache - inspect and maintain module compilation cache directories
#[derive(Parser, Debug)]
#[command(name = "modcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON cache configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the configuration file)
    #[arg(long, value_name = "DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Write the coverage marker when flushing
    #[arg(long, global = true)]
    coverage: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the entries recorded in a cache directory
    Inspect {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Print the raw sidecar as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that recorded blob offsets are consistent
    Verify {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Discard a cache directory so the next run starts fresh
    Reset {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    // Set RUST_LOG=debug for detailed logs
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Inspect { dir, json } => {
            let dir = resolve_dir(dir, &config)?;
            inspect(&dir, json)
        }
        Command::Verify { dir } => {
            let dir = resolve_dir(dir, &config)?;
            if !verify(&dir) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Reset { dir } => {
            let dir = resolve_dir(dir, &config)?;
            reset(&dir, config.coverage);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CacheConfig> {
    let mut config = match cli.config {
        Some(ref path) => CacheConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };

    let overrides = CliOverrides {
        cache_dir: cli.cache_dir.clone(),
        coverage: cli.coverage.then_some(true),
        ..CliOverrides::default()
    };
    config.merge(&overrides);
    debug!("Effective configuration: {:?}", config);

    Ok(config)
}

fn resolve_dir(arg: Option<PathBuf>, config: &CacheConfig) -> anyhow::Result<PathBuf> {
    match arg.or_else(|| config.cache_dir.clone()) {
        Some(dir) => Ok(dir),
        None => bail!("No cache directory given. Pass DIR, --cache-dir or a config with cacheDir."),
    }
}

/// Read a directory without consuming its dirty marker
fn read_cache(fs: &dyn FileSystem, dir: &Path) -> anyhow::Result<Option<PathCache>> {
    let Some(sidecar) = Sidecar::read(fs, dir)
        .with_context(|| format!("Unreadable sidecar in {}", dir.display()))?
    else {
        return Ok(None);
    };

    let blob_path = dir.join(BLOB_FILE_NAME);
    let buffer = if fs.exists(&blob_path) {
        fs.read(&blob_path)
            .with_context(|| format!("Failed to read {}", blob_path.display()))?
    } else {
        Vec::new()
    };

    Ok(Some(PathCache {
        map: sidecar.map,
        buffer,
        ..PathCache::default()
    }))
}

fn describe(record: &CacheRecord) -> String {
    let blob = match record.blob() {
        Some(range) => format!("blob {}..{}", range.start, range.end),
        None => "no bytecode".to_string(),
    };

    match record {
        CacheRecord::Script(script) => {
            let mut line = format!("script  {}", blob);
            if script.top_level_return {
                line.push_str("  top-level return");
            }
            line
        }
        CacheRecord::Module(module) => {
            let mut exports: Vec<&str> = module.exported_names.iter().map(String::as_str).collect();
            exports.extend(
                module
                    .exported_from
                    .values()
                    .flatten()
                    .map(|pair| pair.exported.as_str()),
            );
            format!("module  {}  exports: [{}]", blob, exports.join(", "))
        }
    }
}

fn inspect(dir: &Path, json: bool) -> anyhow::Result<()> {
    let fs = RealFileSystem::new();

    if fs.exists(&dir.join(DIRTY_MARKER_NAME)) {
        println!("{}: reset pending", dir.display());
        return Ok(());
    }

    let Some(cache) = read_cache(&fs, dir)? else {
        println!("{}: no cache", dir.display());
        return Ok(());
    };

    if json {
        let sidecar = Sidecar::new(cache.map);
        println!("{}", serde_json::to_string_pretty(&sidecar)?);
        return Ok(());
    }

    println!(
        "{}: {} entries, {} blob bytes",
        dir.display(),
        cache.map.len(),
        cache.buffer.len()
    );
    for (key, record) in &cache.map {
        println!("  {}  {}", key, describe(record));
    }

    Ok(())
}

/// Returns whether the directory is consistent
fn verify(dir: &Path) -> bool {
    let fs = RealFileSystem::new();

    let cache = match read_cache(&fs, dir) {
        Ok(Some(cache)) => cache,
        Ok(None) => {
            println!("{}: no cache", dir.display());
            return true;
        }
        Err(e) => {
            println!("{}: {:#}", dir.display(), e);
            return false;
        }
    };

    let violations = cache.verify();
    if violations.is_empty() {
        println!("{}: ok ({} entries)", dir.display(), cache.map.len());
        return true;
    }

    for violation in &violations {
        println!("{}: {}", dir.display(), violation);
    }
    false
}

fn reset(dir: &Path, coverage: bool) {
    let fs = Arc::new(RealFileSystem::new());
    if !fs.exists(dir) {
        println!("{}: no cache", dir.display());
        return;
    }

    let mut store = CacheStore::new(fs);
    store.mark_dirty(dir);

    let report = store.flush(&CompileTimeOnlyEngine, coverage);
    if report.directories_reset == 0 {
        println!("{}: could not be reset", dir.display());
    } else {
        info!("Reset {}", dir.display());
        println!("{}: reset", dir.display());
    }
}
