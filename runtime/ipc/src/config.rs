//! Channel configuration
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! tx_lock = 1
//! rx_lock = 2
//! kick_retries = 16
//!
//! [tx]
//! capacity = 4092
//! lock_timeout_us = 10000
//! ```
//!
//! Missing keys take the defaults below.

use std::time::Duration;

use serde::Deserialize;

use crate::fifo::HEADER_SIZE;
use crate::ConfigError;

/// Shared region backing one FIFO: one 4 KiB page
pub const DEFAULT_REGION_SIZE: usize = 0x1000;

/// Data bytes of a FIFO in a default region
pub const DEFAULT_CAPACITY: usize = DEFAULT_REGION_SIZE - HEADER_SIZE;

/// Hardware lock hold by the peer beyond this is loss of synchrony
pub const DEFAULT_LOCK_TIMEOUT_US: u64 = 10_000;

/// Busy retries before a virtqueue kick gives up
pub const DEFAULT_KICK_RETRIES: u32 = 16;

/// One direction of shared-memory FIFO
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FifoConfig {
    /// Data area size in bytes (excludes the count header)
    pub capacity: usize,
    /// Hardware lock acquisition bound, microseconds
    pub lock_timeout_us: u64,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            lock_timeout_us: DEFAULT_LOCK_TIMEOUT_US,
        }
    }
}

impl FifoConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_micros(self.lock_timeout_us)
    }

    /// Bytes of shared memory this FIFO occupies
    pub fn region_size(&self) -> usize {
        HEADER_SIZE + self.capacity
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("FIFO capacity must be non-zero".into()));
        }
        if u32::try_from(self.capacity).is_err() {
            return Err(ConfigError::Invalid(format!(
                "FIFO capacity {} does not fit the 32-bit count header",
                self.capacity
            )));
        }
        if self.lock_timeout_us == 0 {
            return Err(ConfigError::Invalid("lock timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Check that a region of `len` bytes can hold this FIFO
    pub fn check_region(&self, len: usize) -> Result<(), ConfigError> {
        let required = self.region_size();
        if len < required {
            return Err(ConfigError::RegionTooSmall { len, required });
        }
        Ok(())
    }
}

/// Remote processor IPC: one FIFO per direction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RprocConfig {
    /// Application core -> co-processor
    pub tx: FifoConfig,
    /// Co-processor -> application core
    pub rx: FifoConfig,
    /// Arbiter lock guarding `tx`
    pub tx_lock: u32,
    /// Arbiter lock guarding `rx`
    pub rx_lock: u32,
    pub kick_retries: u32,
}

impl Default for RprocConfig {
    fn default() -> Self {
        Self {
            tx: FifoConfig::default(),
            rx: FifoConfig::default(),
            tx_lock: 1,
            rx_lock: 2,
            kick_retries: DEFAULT_KICK_RETRIES,
        }
    }
}

impl RprocConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tx.validate()?;
        self.rx.validate()?;
        if self.tx_lock == self.rx_lock {
            return Err(ConfigError::Invalid(format!(
                "tx and rx share hwspinlock {}",
                self.tx_lock
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_one_page() {
        let config = RprocConfig::default();
        assert_eq!(config.tx.region_size(), DEFAULT_REGION_SIZE);
        assert_eq!(config.tx.lock_timeout(), Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = RprocConfig::from_toml(
            r#"
            rx_lock = 7
            [tx]
            capacity = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.tx.capacity, 64);
        assert_eq!(config.tx.lock_timeout_us, DEFAULT_LOCK_TIMEOUT_US);
        assert_eq!(config.rx, FifoConfig::default());
        assert_eq!(config.rx_lock, 7);
        assert_eq!(config.kick_retries, DEFAULT_KICK_RETRIES);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(matches!(
            RprocConfig::from_toml("bogus = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RprocConfig::from_toml("tx_lock = 3\nrx_lock = 3"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RprocConfig::from_toml("[rx]\ncapacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_check_region() {
        let config = FifoConfig {
            capacity: 16,
            ..FifoConfig::default()
        };
        assert!(config.check_region(20).is_ok());
        assert!(matches!(
            config.check_region(19),
            Err(ConfigError::RegionTooSmall { len: 19, required: 20 })
        ));
    }
}
