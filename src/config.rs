use crate::checksum::ChecksumAlgorithm;
use crate::commit::CommitOptions;
use crate::error::{Result, StorageError};
use crate::sink::{SinkOptions, UnmapMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the storage engine.
///
/// This structure contains all configurable parameters for seqkv.
/// Use the builder pattern methods to customize settings.
///
/// # Example
///
/// ```
/// use seqkv::Config;
/// use std::path::PathBuf;
///
/// let config = Config::new(PathBuf::from("./data"))
///     .with_max_map_size(16 * 1024 * 1024)     // 16MB
///     .with_max_group_bytes(1024 * 1024)      // 1MB
///     .with_sync_on_commit(false);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for storing data files.
    ///
    /// Holds the log file and, when created by the CLI, `config.json`.
    pub data_dir: PathBuf,

    /// Size of the first log mapping in bytes (default: 512B).
    ///
    /// Every later mapping doubles in size up to `max_map_size`.
    /// Valid range: 64B - `max_map_size`.
    pub initial_map_size: usize,

    /// Largest log mapping in bytes (default: 64MB).
    ///
    /// Valid range: `initial_map_size` - 1GB.
    pub max_map_size: usize,

    /// Largest group commit payload in key and value bytes (default: 4MB).
    ///
    /// A leader stops folding queued batches into its group once the group
    /// reaches this size. Valid range: 1KB - 256MB.
    pub max_group_bytes: usize,

    /// Sync the log after every group commit (default: true).
    ///
    /// Disabling trades durability of the latest groups for throughput.
    pub sync_on_commit: bool,

    /// Release retired mappings on a background thread (default: true).
    pub async_unmap: bool,

    /// Checksum algorithm to use for data integrity.
    ///
    /// Every log record is protected with a checksum.
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Config {
    /// Creates a new configuration with the given data directory and default values.
    ///
    /// # Default Values
    ///
    /// - Initial map size: 512B
    /// - Max map size: 64MB
    /// - Max group size: 4MB
    /// - Sync on commit: enabled
    /// - Async unmap: enabled
    /// - Checksum: CRC32
    ///
    /// # Example
    ///
    /// ```
    /// use seqkv::Config;
    /// use std::path::PathBuf;
    ///
    /// let config = Config::new(PathBuf::from("./data"));
    /// assert_eq!(config.initial_map_size, 512);
    /// ```
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            initial_map_size: 512,
            max_map_size: 64 * 1024 * 1024,  // 64MB
            max_group_bytes: 4 * 1024 * 1024, // 4MB
            sync_on_commit: true,
            async_unmap: true,
            checksum_algorithm: ChecksumAlgorithm::CRC32,
        }
    }

    /// Validates the configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any parameter is invalid:
    /// - Empty data directory
    /// - Initial map size < 64B or > max map size
    /// - Max map size > 1GB
    /// - Max group size < 1KB or > 256MB
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StorageError::ConfigError(
                "data_dir cannot be empty".to_string()
            ));
        }

        if self.initial_map_size < 64 {
            return Err(StorageError::ConfigError(
                "initial_map_size must be at least 64 bytes".to_string()
            ));
        }
        if self.initial_map_size > self.max_map_size {
            return Err(StorageError::ConfigError(
                "initial_map_size cannot exceed max_map_size".to_string()
            ));
        }
        if self.max_map_size > 1024 * 1024 * 1024 {
            return Err(StorageError::ConfigError(
                "max_map_size cannot exceed 1GB".to_string()
            ));
        }

        if self.max_group_bytes < 1024 {
            return Err(StorageError::ConfigError(
                "max_group_bytes must be at least 1KB".to_string()
            ));
        }
        if self.max_group_bytes > 256 * 1024 * 1024 {
            return Err(StorageError::ConfigError(
                "max_group_bytes cannot exceed 256MB".to_string()
            ));
        }

        Ok(())
    }

    /// Mapping parameters for the log sink.
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            initial_map_size: self.initial_map_size,
            max_map_size: self.max_map_size,
            unmap_mode: if self.async_unmap {
                UnmapMode::Async
            } else {
                UnmapMode::Sync
            },
        }
    }

    /// Group commit parameters for the write coordinator.
    pub fn commit_options(&self) -> CommitOptions {
        CommitOptions {
            max_group_bytes: self.max_group_bytes,
            sync_on_commit: self.sync_on_commit,
        }
    }

    /// Set initial map size
    pub fn with_initial_map_size(mut self, size: usize) -> Self {
        self.initial_map_size = size;
        self
    }

    /// Set max map size
    pub fn with_max_map_size(mut self, size: usize) -> Self {
        self.max_map_size = size;
        self
    }

    /// Set max group commit size
    pub fn with_max_group_bytes(mut self, size: usize) -> Self {
        self.max_group_bytes = size;
        self
    }

    /// Enable or disable syncing after each group
    pub fn with_sync_on_commit(mut self, enable: bool) -> Self {
        self.sync_on_commit = enable;
        self
    }

    /// Enable or disable background unmapping
    pub fn with_async_unmap(mut self, enable: bool) -> Self {
        self.async_unmap = enable;
        self
    }

    /// Set checksum algorithm
    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::new(PathBuf::from("/tmp/test"));

        assert_eq!(config.initial_map_size, 512);
        assert_eq!(config.max_map_size, 64 * 1024 * 1024);
        assert_eq!(config.max_group_bytes, 4 * 1024 * 1024);
        assert!(config.sync_on_commit);
        assert!(config.async_unmap);
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::CRC32);
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::new(PathBuf::from("/tmp/test"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_data_dir() {
        let config = Config::new(PathBuf::from(""));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_map_sizes() {
        let too_small = Config::new(PathBuf::from("/tmp/test")).with_initial_map_size(16);
        assert!(too_small.validate().is_err());

        let inverted = Config::new(PathBuf::from("/tmp/test"))
            .with_initial_map_size(8192)
            .with_max_map_size(4096);
        assert!(inverted.validate().is_err());

        let too_large = Config::new(PathBuf::from("/tmp/test"))
            .with_max_map_size(2 * 1024 * 1024 * 1024);
        assert!(too_large.validate().is_err());
    }

    #[test]
    fn test_config_validation_group_size() {
        let too_small = Config::new(PathBuf::from("/tmp/test")).with_max_group_bytes(100);
        assert!(too_small.validate().is_err());

        let too_large = Config::new(PathBuf::from("/tmp/test")).with_max_group_bytes(512 * 1024 * 1024);
        assert!(too_large.validate().is_err());
    }

    #[test]
    fn test_config_builder_pattern() {
        let config = Config::new(PathBuf::from("/tmp/test"))
            .with_initial_map_size(4096)
            .with_max_map_size(1024 * 1024)
            .with_max_group_bytes(64 * 1024)
            .with_sync_on_commit(false)
            .with_async_unmap(false)
            .with_checksum_algorithm(ChecksumAlgorithm::XXH64);

        assert!(config.validate().is_ok());

        let sink = config.sink_options();
        assert_eq!(sink.initial_map_size, 4096);
        assert_eq!(sink.max_map_size, 1024 * 1024);
        assert_eq!(sink.unmap_mode, UnmapMode::Sync);

        let commit = config.commit_options();
        assert_eq!(commit.max_group_bytes, 64 * 1024);
        assert!(!commit.sync_on_commit);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config::new(PathBuf::from("/tmp/test")).with_checksum_algorithm(ChecksumAlgorithm::XXH64);
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.checksum_algorithm, ChecksumAlgorithm::XXH64);
        assert_eq!(parsed.max_group_bytes, config.max_group_bytes);
    }
}
