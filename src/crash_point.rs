//! Crash point injection for testing durability
//!
//! When `DOCSTASH_CRASH_POINT` names one of the points below, the process
//! terminates immediately via `std::process::abort()` when execution reaches
//! it: no cleanup, no unwinding, no catching.
//!
//! ```ignore
//! use docstash::crash_point::{maybe_crash, points};
//!
//! maybe_crash(points::REWRITE_AFTER_TEMP_FSYNC);
//! ```
//!
//! ```bash
//! DOCSTASH_CRASH_POINT=rewrite_after_rename ./my_app
//! ```

use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("DOCSTASH_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `DOCSTASH_CRASH_POINT` equals the given name
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
///
/// No-op when `DOCSTASH_CRASH_POINT` is unset or names another point.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    // Full rewrite (compaction, index stream rewrite)
    pub const REWRITE_BEFORE_TEMP_WRITE: &str = "rewrite_before_temp_write";
    pub const REWRITE_AFTER_TEMP_WRITE: &str = "rewrite_after_temp_write";
    pub const REWRITE_AFTER_TEMP_FSYNC: &str = "rewrite_after_temp_fsync";
    pub const REWRITE_AFTER_RENAME: &str = "rewrite_after_rename";
    pub const REWRITE_AFTER_DIR_SYNC: &str = "rewrite_after_dir_sync";

    // Append path
    pub const APPEND_BEFORE_WRITE: &str = "append_before_write";
    pub const APPEND_AFTER_FSYNC: &str = "append_after_fsync";

    // Load
    pub const LOAD_AFTER_INTEGRITY_CHECK: &str = "load_after_integrity_check";

    /// Get all crash point names
    pub fn all() -> &'static [&'static str] {
        &[
            REWRITE_BEFORE_TEMP_WRITE,
            REWRITE_AFTER_TEMP_WRITE,
            REWRITE_AFTER_TEMP_FSYNC,
            REWRITE_AFTER_RENAME,
            REWRITE_AFTER_DIR_SYNC,
            APPEND_BEFORE_WRITE,
            APPEND_AFTER_FSYNC,
            LOAD_AFTER_INTEGRITY_CHECK,
        ]
    }
}
