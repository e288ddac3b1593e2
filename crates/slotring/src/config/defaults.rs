//! Library defaults for `AdapterConfig`.

/// Bytes per ring buffer.
pub const BUF_SIZE: usize = 2048;

/// TX slots per ring when the datapath does not report its length.
pub const TX_SLOTS: u32 = 1024;

/// RX slots when the datapath does not report its length.
pub const RX_SLOTS: u32 = 1024;

/// Coalesce receive notifications.
pub const MITIGATION: bool = true;

/// Mitigation interval.
pub const MIT_INTERVAL_US: u64 = 100;

/// Frames the ingress backlog holds before dropping.
pub const BACKLOG: usize = 1024;

/// Largest buffer a slot length can describe.
pub const MAX_BUF_SIZE: usize = 65536;

/// Upper bound on slots per ring.
pub const MAX_SLOTS: u32 = 1 << 16;
