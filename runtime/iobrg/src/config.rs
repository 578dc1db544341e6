//! Bridge configuration

use std::time::Duration;

use serde::Deserialize;

use crate::BridgeError;

/// What a hardware lock timeout does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Halt: the peer processor is wedged and nothing downstream can recover
    #[default]
    Panic,
    /// Return [`BridgeError::Lock`] to the caller
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Arbiter lock shared with the companion microcontroller
    pub lock: u32,
    pub lock_timeout_us: u64,
    /// `CTRL` polls before a transfer is declared stuck
    pub poll_limit: u32,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            lock: 0,
            lock_timeout_us: 10_000,
            poll_limit: 100_000,
            timeout_policy: TimeoutPolicy::Panic,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml(text: &str) -> Result<Self, BridgeError> {
        let config: Self =
            toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.lock_timeout_us == 0 {
            return Err(BridgeError::Config("lock timeout must be non-zero".into()));
        }
        if self.poll_limit == 0 {
            return Err(BridgeError::Config("poll limit must be non-zero".into()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_micros(self.lock_timeout_us)
    }
}
