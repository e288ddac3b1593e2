//! Adapter configuration.
//!
//! Library defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use slotring::config::AdapterConfig;
//!
//! let config = AdapterConfig::from_env()
//!     .buf_size(4096)
//!     .mit_interval(Duration::from_micros(50));
//! ```

pub mod defaults;

use std::time::Duration;

use slotring_core::env::{env_get, env_get_bool, env_get_us};
use slotring_core::error::{Result, RingError};
use slotring_core::kinfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Bytes per ring buffer (slot capacity).
    pub buf_size: usize,
    /// Fallback TX ring length.
    pub tx_slots: u32,
    /// Fallback RX ring length.
    pub rx_slots: u32,
    /// Coalesce receive notifications through the mitigation timer.
    pub mitigation: bool,
    /// Mitigation timer period. Zero notifies on every arrival.
    pub mit_interval: Duration,
    /// Ingress backlog capacity in frames.
    pub backlog: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AdapterConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SLR_BUF_SIZE` - Bytes per buffer
    /// - `SLR_TX_SLOTS` - TX ring length fallback
    /// - `SLR_RX_SLOTS` - RX ring length fallback
    /// - `SLR_MITIGATION` - Enable notification mitigation (0/1)
    /// - `SLR_MIT_INTERVAL_US` - Mitigation interval in microseconds
    /// - `SLR_BACKLOG` - Ingress backlog frames
    pub fn from_env() -> Self {
        Self {
            buf_size: env_get("SLR_BUF_SIZE", defaults::BUF_SIZE),
            tx_slots: env_get("SLR_TX_SLOTS", defaults::TX_SLOTS),
            rx_slots: env_get("SLR_RX_SLOTS", defaults::RX_SLOTS),
            mitigation: env_get_bool("SLR_MITIGATION", defaults::MITIGATION),
            mit_interval: env_get_us(
                "SLR_MIT_INTERVAL_US",
                Duration::from_micros(defaults::MIT_INTERVAL_US),
            ),
            backlog: env_get("SLR_BACKLOG", defaults::BACKLOG),
        }
    }

    /// Library defaults only, no environment.
    pub fn new() -> Self {
        Self {
            buf_size: defaults::BUF_SIZE,
            tx_slots: defaults::TX_SLOTS,
            rx_slots: defaults::RX_SLOTS,
            mitigation: defaults::MITIGATION,
            mit_interval: Duration::from_micros(defaults::MIT_INTERVAL_US),
            backlog: defaults::BACKLOG,
        }
    }

    // Builder methods

    pub fn buf_size(mut self, bytes: usize) -> Self {
        self.buf_size = bytes;
        self
    }

    pub fn tx_slots(mut self, n: u32) -> Self {
        self.tx_slots = n;
        self
    }

    pub fn rx_slots(mut self, n: u32) -> Self {
        self.rx_slots = n;
        self
    }

    pub fn mitigation(mut self, enable: bool) -> Self {
        self.mitigation = enable;
        self
    }

    pub fn mit_interval(mut self, d: Duration) -> Self {
        self.mit_interval = d;
        self
    }

    pub fn backlog(mut self, frames: usize) -> Self {
        self.backlog = frames;
        self
    }

    /// True when arrivals go through the timer rather than notifying
    /// directly.
    pub fn mitigation_active(&self) -> bool {
        self.mitigation && !self.mit_interval.is_zero()
    }

    pub fn validate(&self) -> Result<()> {
        if self.buf_size == 0 || self.buf_size > defaults::MAX_BUF_SIZE {
            return Err(RingError::InvalidConfig("buf_size must be in 1..=65536"));
        }
        if self.tx_slots == 0 || self.tx_slots > defaults::MAX_SLOTS {
            return Err(RingError::InvalidConfig("tx_slots must be in 1..=65536"));
        }
        if self.rx_slots == 0 || self.rx_slots > defaults::MAX_SLOTS {
            return Err(RingError::InvalidConfig("rx_slots must be in 1..=65536"));
        }
        if self.backlog == 0 {
            return Err(RingError::InvalidConfig("backlog must be > 0"));
        }
        Ok(())
    }

    /// Log the effective configuration at info level.
    pub fn log(&self) {
        kinfo!(
            "config: buf_size={} tx_slots={} rx_slots={} mitigation={} interval={:?} backlog={}",
            self.buf_size,
            self.tx_slots,
            self.rx_slots,
            self.mitigation,
            self.mit_interval,
            self.backlog
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid() {
        let config = AdapterConfig::new();
        assert_eq!(config.buf_size, 2048);
        assert_eq!(config.mit_interval, Duration::from_micros(100));
        assert!(config.mitigation_active());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = AdapterConfig::new()
            .buf_size(512)
            .tx_slots(8)
            .rx_slots(16)
            .mit_interval(Duration::ZERO)
            .backlog(4);
        assert_eq!(config.buf_size, 512);
        assert_eq!(config.tx_slots, 8);
        assert_eq!(config.rx_slots, 16);
        assert_eq!(config.backlog, 4);
        assert!(!config.mitigation_active());
        assert!(!config.clone().mitigation(false).mitigation_active());
    }

    #[test]
    fn test_validation() {
        assert!(AdapterConfig::new().buf_size(0).validate().is_err());
        assert!(AdapterConfig::new().buf_size(1 << 20).validate().is_err());
        assert!(AdapterConfig::new().tx_slots(0).validate().is_err());
        assert!(AdapterConfig::new().rx_slots(1 << 20).validate().is_err());
        assert_eq!(
            AdapterConfig::new().backlog(0).validate(),
            Err(RingError::InvalidConfig("backlog must be > 0"))
        );
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SLR_BACKLOG", "77");
        let config = AdapterConfig::from_env();
        std::env::remove_var("SLR_BACKLOG");
        assert_eq!(config.backlog, 77);
    }
}
