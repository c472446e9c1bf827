//! Allocator configuration, loadable from TOML.
//!
//! ```toml
//! [allocator]
//! page_size = 4096
//! max_size = 1073741824
//! init_meta_area = 16
//! meta_grow_percentage = 80
//! overflow_area_enabled = false
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alloc::{TxAllocOptions, DEFAULT_META_GROW_PERCENTAGE};
use crate::types::page::DEFAULT_PAGE_SIZE;
use crate::types::{AllocError, Result};

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: u32 = 128;

/// Open-time allocator settings plus the defaults for new transactions.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AllocatorOptions {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Maximum file size in bytes. 0 means unlimited.
    pub max_size: u64,
    /// Maximum number of pages. Takes precedence over `max_size` when set.
    pub max_pages: u64,
    /// Pages reserved for the meta area when a file is created.
    pub init_meta_area: u32,
    /// Meta area usage (percent) that triggers growth.
    pub meta_grow_percentage: u32,
    /// Whether transactions may allocate past the page limit by default.
    pub overflow_area_enabled: bool,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_size: 0,
            max_pages: 0,
            init_meta_area: 0,
            meta_grow_percentage: DEFAULT_META_GROW_PERCENTAGE,
            overflow_area_enabled: false,
        }
    }
}

impl AllocatorOptions {
    /// Page limit derived from `max_pages` or `max_size`; 0 is unlimited.
    pub fn effective_max_pages(&self) -> u64 {
        if self.max_pages > 0 {
            self.max_pages
        } else if self.max_size > 0 && self.page_size > 0 {
            self.max_size / self.page_size as u64
        } else {
            0
        }
    }

    /// Checks page size and limits for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(AllocError::Invalid("page size below minimum"));
        }
        if !self.page_size.is_power_of_two() {
            return Err(AllocError::Invalid("page size must be a power of two"));
        }
        if self.max_size > 0 && self.max_pages == 0 && self.max_size < self.page_size as u64 {
            return Err(AllocError::Invalid("max size smaller than one page"));
        }
        if self.meta_grow_percentage > 100 {
            return Err(AllocError::Invalid("meta grow percentage above 100"));
        }
        Ok(())
    }

    /// Options for a new write transaction.
    pub fn tx_options(&self) -> TxAllocOptions {
        TxAllocOptions {
            overflow_area_enabled: self.overflow_area_enabled,
            meta_grow_percentage: self.meta_grow_percentage,
        }
    }

    /// Parses the `[allocator]` table of a TOML document.
    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|source| ConfigError::ParseStr { source })?;
        raw.allocator
            .validate()
            .map_err(|source| ConfigError::Invalid { source })?;
        Ok(raw.allocator)
    }

    /// Reads options from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        raw.allocator
            .validate()
            .map_err(|source| ConfigError::Invalid { source })?;
        Ok(raw.allocator)
    }

    /// Serializes the options as an `[allocator]` TOML table.
    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        let raw = RawConfig {
            allocator: self.clone(),
        };
        toml::to_string_pretty(&raw).map_err(|source| ConfigError::Serialize { source })
    }

    /// Writes the options to `path` as TOML.
    pub fn persist(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        let serialized = self.to_toml_string()?;
        fs::write(path, serialized).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    allocator: AllocatorOptions,
}

/// Failures while loading, validating or saving [`AllocatorOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read allocator config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config file is not valid TOML for these options.
    #[error("failed to parse allocator config {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// TOML decode error.
        source: toml::de::Error,
    },
    /// An in-memory TOML document could not be parsed.
    #[error("failed to parse allocator config: {source}")]
    ParseStr {
        /// TOML decode error.
        source: toml::de::Error,
    },
    /// The options could not be encoded as TOML.
    #[error("failed to serialize allocator config: {source}")]
    Serialize {
        /// TOML encode error.
        source: toml::ser::Error,
    },
    /// The config file could not be written.
    #[error("failed to write allocator config {path}: {source}")]
    Write {
        /// File that was written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The options parsed but failed validation.
    #[error("invalid allocator config: {source}")]
    Invalid {
        /// Validation failure.
        source: AllocError,
    },
}
