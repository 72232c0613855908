//! Scratch locations for tests that write stores.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// This is determined by walking up from the current crate's manifest directory
/// until we find the workspace Cargo.toml.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Creates a temporary directory for test output.
///
/// The directory is removed when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("fieldset_test_")
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// A store basename inside `dir`, e.g. `<dir>/run_` for prefix `run_`.
///
/// Field stores are then written as `<dir>/run_U.zarr` and so on.
pub fn scratch_basename(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(prefix)
}
