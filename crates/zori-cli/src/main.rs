//! zori: deduplicating backup CLI
//!
//! Commands:
//!   init                          - create the master key envelope (or check the password)
//!   backup [--dataset KEY]...     - snapshot configured data sets (all, in parallel, by default)
//!   snapshot <path> [--parent A]  - snapshot an arbitrary directory
//!   diff <old> <new>              - paths changed between two snapshots
//!   history <dataset>             - snapshot chain of a data set, newest first
//!   chunks <file>                 - show content-defined chunk boundaries
//!   digest <file>                 - content address of a file
//!   pack / unpack                 - write or extract a pack file directly
//!   config show                   - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use zori_chunks::{digest_file, find_chunks_with, ChunkSizes};
use zori_core::config::{expand_home, DataSetConfig, ZoriConfig};
use zori_core::{Algorithm, ContentAddress};
use zori_crypto::{KdfParams, KeyVault, MasterKeyPair};
use zori_pack::{
    pack_chunks, pack_chunks_encrypted, unpack_chunks_encrypted_with, unpack_chunks_with,
};
use zori_snapshot::{
    load_or_create_installation, load_or_create_master_keys, DocumentStore, JsonDirStore,
    PackSink, SnapshotEngine,
};
use zori_store::{build_registry, local_installation_id, StoreRegistry};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zori",
    version,
    about = "Deduplicating, encrypted directory backups",
    long_about = "zori: snapshot directories into content-addressed, encrypted packs"
)]
struct Cli {
    /// Path to zori.toml configuration file
    #[arg(long, short = 'c', env = "ZORI_CONFIG", default_value = "~/.config/zori/zori.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the master keys on first use, or verify the password
    ///
    /// The password is read from ZORI_PASSWORD or prompted for.
    Init,

    /// Back up configured data sets
    Backup {
        /// Data set keys to back up (default: every configured data set)
        #[arg(long = "dataset", short = 'd')]
        datasets: Vec<String>,
    },

    /// Snapshot a directory outside the configured data sets
    Snapshot {
        path: PathBuf,
        /// Parent snapshot address
        #[arg(long)]
        parent: Option<String>,
    },

    /// List paths that changed between two snapshots
    Diff { old: String, new: String },

    /// Show a data set's snapshots, newest first
    History { dataset: String },

    /// Show the chunk boundaries of a file
    Chunks {
        file: PathBuf,
        /// Target average chunk size (default: from config)
        #[arg(long)]
        avg: Option<u32>,
    },

    /// Print the content address of a file
    Digest {
        file: PathBuf,
        /// sha1 or sha256 (default: from config)
        #[arg(long, short = 'a')]
        algorithm: Option<String>,
    },

    /// Chunk files and write their chunks into one pack
    Pack {
        output: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Encrypt with the master keys
        #[arg(long)]
        encrypt: bool,
    },

    /// Extract a pack's chunks into a directory, one file per chunk
    Unpack {
        pack: PathBuf,
        output_dir: PathBuf,
        /// The pack is encrypted with the master keys
        #[arg(long)]
        encrypted: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_home(&cli.config);
    let config = ZoriConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;
    init_logging(&config.log.level, &config.log.format);

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Backup { datasets } => cmd_backup(&config, &datasets),
        Commands::Snapshot { path, parent } => cmd_snapshot(&config, &path, parent.as_deref()),
        Commands::Diff { old, new } => cmd_diff(&config, &old, &new),
        Commands::History { dataset } => cmd_history(&config, &dataset),
        Commands::Chunks { file, avg } => cmd_chunks(&config, &file, avg),
        Commands::Digest { file, algorithm } => cmd_digest(&config, &file, algorithm.as_deref()),
        Commands::Pack {
            output,
            files,
            encrypt,
        } => cmd_pack(&config, &output, &files, encrypt),
        Commands::Unpack {
            pack,
            output_dir,
            encrypted,
        } => cmd_unpack(&config, &pack, &output_dir, encrypted),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ── Shared setup ──────────────────────────────────────────────────────────────

fn open_documents(config: &ZoriConfig) -> Result<Arc<dyn DocumentStore>> {
    let root = expand_home(&config.store.documents);
    let store = JsonDirStore::open(&root)
        .with_context(|| format!("opening document store: {}", root.display()))?;
    Ok(Arc::new(store))
}

/// Password from ZORI_PASSWORD, else an interactive prompt.
fn read_password() -> Result<SecretString> {
    if let Ok(pw) = std::env::var("ZORI_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password("zori password: ").context("reading password")?;
    Ok(SecretString::from(pw))
}

fn master_keys(config: &ZoriConfig, docs: &dyn DocumentStore) -> Result<MasterKeyPair> {
    let vault = KeyVault::new(KdfParams::from(&config.crypto));
    let password = read_password()?;
    load_or_create_master_keys(docs, &vault, &password).context("unlocking master keys")
}

/// Master keys when packs are encrypted.
fn pack_keys(config: &ZoriConfig, docs: &dyn DocumentStore) -> Result<Option<MasterKeyPair>> {
    if !config.pack.encrypt {
        return Ok(None);
    }
    master_keys(config, docs).map(Some)
}

fn bucket(config: &ZoriConfig, docs: &dyn DocumentStore) -> Result<String> {
    let installation = load_or_create_installation(
        docs,
        &local_installation_id(),
        config.store.bucket.as_deref(),
    )
    .context("loading installation record")?;
    Ok(installation.bucket)
}

/// Engine with a packer staging under `<staging_dir>/<staging>`.
fn build_engine(
    config: &ZoriConfig,
    docs: &Arc<dyn DocumentStore>,
    stores: &StoreRegistry,
    bucket: &str,
    keys: Option<&MasterKeyPair>,
    staging: &str,
) -> SnapshotEngine {
    let mut pack_cfg = config.pack.clone();
    pack_cfg.staging_dir = expand_home(&pack_cfg.staging_dir).join(staging);
    let sink = PackSink::from_config(docs.clone(), stores.clone(), bucket, &pack_cfg, keys.cloned());
    SnapshotEngine::new(docs.clone(), &config.engine)
        .with_chunk_sizes(ChunkSizes::from_config(&config.chunking))
        .with_packer(sink)
}

fn parse_address(s: &str) -> Result<ContentAddress> {
    s.parse()
        .with_context(|| format!("invalid content address: {s}"))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("progress template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn make_spinner(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}").context("spinner template")?,
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

// ── `zori init` ───────────────────────────────────────────────────────────────

fn cmd_init(config: &ZoriConfig) -> Result<()> {
    let docs = open_documents(config)?;
    master_keys(config, docs.as_ref())?;
    let installation = load_or_create_installation(
        docs.as_ref(),
        &local_installation_id(),
        config.store.bucket.as_deref(),
    )?;

    println!("Master keys unlocked.");
    println!("  installation: {}", installation.id);
    println!("  bucket:       {}", installation.bucket);
    println!("  documents:    {}", expand_home(&config.store.documents).display());
    Ok(())
}

// ── `zori backup` ─────────────────────────────────────────────────────────────

struct BackupOutcome {
    key: String,
    snapshot: ContentAddress,
    files: u64,
    packs: u64,
    bytes: u64,
}

fn cmd_backup(config: &ZoriConfig, keys: &[String]) -> Result<()> {
    let selected: Vec<&DataSetConfig> = if keys.is_empty() {
        config.datasets.iter().collect()
    } else {
        keys.iter()
            .map(|k| {
                config
                    .dataset(k)
                    .with_context(|| format!("no data set named {k:?} in config"))
            })
            .collect::<Result<_>>()?
    };
    if selected.is_empty() {
        anyhow::bail!("no data sets configured; add a [[datasets]] section");
    }

    let docs = open_documents(config)?;
    let master = pack_keys(config, docs.as_ref())?;
    let bucket = bucket(config, docs.as_ref())?;
    let stores = build_registry(&config.store).context("building pack stores")?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.engine.workers)
        .build()
        .context("building worker pool")?;
    tracing::info!(
        datasets = selected.len(),
        workers = config.engine.workers,
        bucket = %bucket,
        "starting backup"
    );
    let pb = make_progress_bar(selected.len() as u64, "backup")?;

    let results: Vec<(String, Result<BackupOutcome>)> = pool.install(|| {
        selected
            .par_iter()
            .map(|set| {
                let mut engine =
                    build_engine(config, &docs, &stores, &bucket, master.as_ref(), &set.key);
                let outcome = engine
                    .backup(set)
                    .and_then(|snapshot| {
                        let files = engine.load_snapshot(&snapshot)?.file_count;
                        let stats = engine.packer().map(|p| p.stats()).unwrap_or_default();
                        Ok(BackupOutcome {
                            key: set.key.clone(),
                            snapshot,
                            files,
                            packs: stats.packs_written,
                            bytes: stats.bytes_packed,
                        })
                    })
                    .with_context(|| format!("backing up {}", set.key));
                pb.inc(1);
                pb.set_message(set.key.clone());
                (set.key.clone(), outcome)
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut failed = 0;
    for (key, result) in results {
        match result {
            Ok(o) => println!(
                "{}: {} ({} files, {} packs, {})",
                o.key,
                o.snapshot,
                o.files,
                o.packs,
                fmt_bytes(o.bytes)
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{key}: FAILED: {e:#}");
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} data set(s) failed");
    }
    Ok(())
}

// ── `zori snapshot` ───────────────────────────────────────────────────────────

fn cmd_snapshot(config: &ZoriConfig, path: &Path, parent: Option<&str>) -> Result<()> {
    let parent = parent.map(parse_address).transpose()?;
    let docs = open_documents(config)?;
    let master = pack_keys(config, docs.as_ref())?;
    let bucket = bucket(config, docs.as_ref())?;
    let stores = build_registry(&config.store).context("building pack stores")?;

    let spinner = make_spinner("snapshot")?;
    spinner.set_message(path.display().to_string());
    let mut engine = build_engine(config, &docs, &stores, &bucket, master.as_ref(), "adhoc");
    let result = engine.take_snapshot(path, parent.as_ref());
    spinner.finish_and_clear();

    let snapshot = result.with_context(|| format!("snapshotting {}", path.display()))?;
    println!("{snapshot}");
    Ok(())
}

// ── `zori diff` / `zori history` ──────────────────────────────────────────────

fn read_only_engine(config: &ZoriConfig) -> Result<SnapshotEngine> {
    Ok(SnapshotEngine::new(open_documents(config)?, &config.engine))
}

fn cmd_diff(config: &ZoriConfig, old: &str, new: &str) -> Result<()> {
    let (old, new) = (parse_address(old)?, parse_address(new)?);
    let engine = read_only_engine(config)?;
    let changes = engine
        .find_changed_files(&old, &new)
        .context("comparing snapshots")?;
    for (path, reference) in &changes {
        println!("{:<6} {}", reference.kind(), path.display());
    }
    Ok(())
}

fn cmd_history(config: &ZoriConfig, key: &str) -> Result<()> {
    let engine = read_only_engine(config)?;
    let dataset = engine
        .dataset(key)?
        .with_context(|| format!("data set {key:?} has never been backed up"))?;

    println!("{} ({})", dataset.key, dataset.base_path.display());
    for snapshot in engine.history(dataset.latest_snapshot) {
        let snapshot = snapshot.context("reading snapshot history")?;
        println!(
            "  {}  {}  {} files",
            snapshot.start_time.format("%Y-%m-%d %H:%M:%S"),
            snapshot.checksum,
            snapshot.file_count
        );
    }
    Ok(())
}

// ── `zori chunks` / `zori digest` ─────────────────────────────────────────────

fn cmd_chunks(config: &ZoriConfig, file: &Path, avg: Option<u32>) -> Result<()> {
    let sizes = match avg {
        Some(avg) => ChunkSizes::for_average(avg),
        None => ChunkSizes::from_config(&config.chunking),
    };
    let chunks = find_chunks_with(file, sizes, config.engine.hash_algorithm)
        .with_context(|| format!("chunking {}", file.display()))?;
    for c in &chunks {
        println!("{:>12} {:>8} {}", c.offset, c.size, c.content_hash);
    }
    println!("{} chunks", chunks.len());
    Ok(())
}

fn cmd_digest(config: &ZoriConfig, file: &Path, algorithm: Option<&str>) -> Result<()> {
    let algorithm: Algorithm = match algorithm {
        Some(a) => a.parse()?,
        None => config.engine.hash_algorithm,
    };
    let address =
        digest_file(algorithm, file).with_context(|| format!("hashing {}", file.display()))?;
    println!("{address}  {}", file.display());
    Ok(())
}

// ── `zori pack` / `zori unpack` ───────────────────────────────────────────────

fn cmd_pack(config: &ZoriConfig, output: &Path, files: &[PathBuf], encrypt: bool) -> Result<()> {
    let sizes = ChunkSizes::from_config(&config.chunking);
    let mut chunks = Vec::new();
    for file in files {
        chunks.extend(
            find_chunks_with(file, sizes, config.engine.hash_algorithm)
                .with_context(|| format!("chunking {}", file.display()))?,
        );
    }

    let info = if encrypt {
        let docs = open_documents(config)?;
        let keys = master_keys(config, docs.as_ref())?;
        pack_chunks_encrypted(&chunks, output, &keys)
    } else {
        pack_chunks(&chunks, output)
    }
    .with_context(|| format!("writing pack {}", output.display()))?;

    println!("{}  {} chunks", info.address, info.chunks.len());
    Ok(())
}

fn cmd_unpack(config: &ZoriConfig, pack: &Path, output_dir: &Path, encrypted: bool) -> Result<()> {
    let addresses = if encrypted {
        let docs = open_documents(config)?;
        let keys = master_keys(config, docs.as_ref())?;
        unpack_chunks_encrypted_with(pack, output_dir, &keys, config.engine.hash_algorithm)
    } else {
        unpack_chunks_with(pack, output_dir, config.engine.hash_algorithm)
    }
    .with_context(|| format!("extracting pack {}", pack.display()))?;

    for address in &addresses {
        println!("{address}");
    }
    Ok(())
}

// ── `zori config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &ZoriConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_backup_accepts_repeated_datasets() {
        let cli = Cli::try_parse_from(["zori", "backup", "-d", "home", "--dataset", "work"]).unwrap();
        match cli.command {
            Commands::Backup { datasets } => assert_eq!(datasets, vec!["home", "work"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_pack_requires_files() {
        assert!(Cli::try_parse_from(["zori", "pack", "out.pack"]).is_err());
    }

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
