use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ZoriError, ZoriResult};
use crate::types::Algorithm;

/// Top-level configuration (loaded from zori.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoriConfig {
    pub log: LogConfig,
    pub engine: EngineConfig,
    pub chunking: ChunkingConfig,
    pub pack: PackConfig,
    pub crypto: CryptoConfig,
    pub store: StoreConfig,
    /// Directory trees to back up
    pub datasets: Vec<DataSetConfig>,
}

impl ZoriConfig {
    /// Parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ZoriResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found (using defaults)");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ZoriError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn dataset(&self, key: &str) -> Option<&DataSetConfig> {
        self.datasets.iter().find(|d| d.key == key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Files at or below this size are inlined into their tree entry
    pub small_file_threshold: u64,
    /// Digest algorithm for chunks, trees and snapshots
    pub hash_algorithm: Algorithm,
    /// Concurrent data set backups (0 = cpu_count)
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target average chunk size in bytes
    pub avg_size: u32,
    /// Minimum chunk size (default: avg_size / 4)
    pub min_size: Option<u32>,
    /// Maximum chunk size (default: avg_size * 4)
    pub max_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Pack is sealed once its pending chunks reach this many bytes
    pub pack_size: u64,
    /// Local directory where packs are built before upload
    pub staging_dir: PathBuf,
    /// Encrypt packs with the master key pair
    pub encrypt: bool,
}

/// Password KDF parameters for the master key envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding snapshot, tree and envelope documents
    pub documents: PathBuf,
    /// Local pack store roots; each is registered as its own store
    pub pack_dirs: Vec<PathBuf>,
    /// Bucket name for packs (generated from the installation id when absent)
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetConfig {
    /// Stable identifier of the data set
    pub key: String,
    /// Root directory to back up
    pub base_path: PathBuf,
    /// Glob patterns (relative to base_path) to skip
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            small_file_threshold: 4096,
            hash_algorithm: Algorithm::Sha256,
            workers: 0,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            avg_size: 64 * 1024,
            min_size: None,
            max_size: None,
        }
    }
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            pack_size: 64 * 1024 * 1024,
            staging_dir: PathBuf::from("~/.cache/zori/packs"),
            encrypt: true,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            documents: PathBuf::from("~/.local/share/zori/db"),
            pack_dirs: vec![PathBuf::from("~/.local/share/zori/packs")],
            bucket: None,
        }
    }
}

/// Expand a leading `~/` using `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
