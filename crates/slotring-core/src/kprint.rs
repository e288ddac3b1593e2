//! Kernel-style print macros for slotring
//!
//! Thread-safe leveled output on stderr, plus a per-site rate limiter for
//! diagnostics that can fire once per packet.
//!
//! # Environment Variables
//!
//! - `SLR_FLUSH_EPRINT=1` - Flush stderr after each print
//! - `SLR_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use slotring_core::{kinfo, kwarn_rl};
//!
//! kinfo!("adapter {} attached, {} tx slots", name, n);
//! kwarn_rl!(5, "ran out of slots with an incomplete packet");
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[slotring ERROR]",
            LogLevel::Warn => "[slotring WARN] ",
            LogLevel::Info => "[slotring INFO] ",
            LogLevel::Debug => "[slotring DEBUG]",
            LogLevel::Trace => "[slotring TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging from environment variables.
///
/// Called automatically on first log.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    FLUSH_ENABLED.store(crate::env::env_get_bool("SLR_FLUSH_EPRINT", false), Ordering::Relaxed);
    if let Some(level) = std::env::var("SLR_LOG_LEVEL").ok().and_then(|v| LogLevel::parse(&v)) {
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically (overrides the environment).
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

/// Internal: Leveled print
#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Allows at most `per_sec` events per one-second window.
///
/// Lock-free; concurrent callers in the same window may overshoot by the
/// number of racing threads, which is fine for diagnostics.
pub struct RateLimit {
    per_sec: u32,
    window: AtomicU64,
    count: AtomicU32,
}

impl RateLimit {
    pub const fn new(per_sec: u32) -> Self {
        Self {
            per_sec,
            window: AtomicU64::new(u64::MAX),
            count: AtomicU32::new(0),
        }
    }

    /// Returns true if the caller may emit now.
    pub fn allow(&self) -> bool {
        self.allow_at(epoch().elapsed().as_secs())
    }

    #[doc(hidden)]
    pub fn allow_at(&self, sec: u64) -> bool {
        if self.window.swap(sec, Ordering::Relaxed) != sec {
            self.count.store(1, Ordering::Relaxed);
            return self.per_sec > 0;
        }
        self.count.fetch_add(1, Ordering::Relaxed) < self.per_sec
    }
}

// ============================================================================
// Public Macros
// ============================================================================

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Debug, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::Trace, format_args!($($arg)*));
    }};
}

/// Warning limited to `$lps` lines per second at this call site.
#[macro_export]
macro_rules! kwarn_rl {
    ($lps:expr, $($arg:tt)*) => {{
        static __RL: $crate::kprint::RateLimit = $crate::kprint::RateLimit::new($lps);
        if $crate::kprint::level_enabled($crate::kprint::LogLevel::Warn) && __RL.allow() {
            $crate::kprint::_klog_impl($crate::kprint::LogLevel::Warn, format_args!($($arg)*));
        }
    }};
}
