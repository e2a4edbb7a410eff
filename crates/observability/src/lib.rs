//! Tracing and logging setup shared by the binaries.

/// Tracing configuration (filters, formatting).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide logging, reading the format from `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    self::tracing::init(format);
}
