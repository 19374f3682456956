use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version for JSON reports (clone, download, graph).
/// Bump this when changing formats that would break compatibility.
pub const SCHEMA_VERSION: u32 = 1;

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!("rpack/", env!("CARGO_PKG_VERSION"));

/// Returns a formatted version string including build metadata if available.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("rpack {VERSION}");

    if let Some(hash) = option_env!("RPACK_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}
