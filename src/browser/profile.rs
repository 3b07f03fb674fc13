//! Per-session Chrome profile directories
//!
//! Every pooled session gets its own UUID-named profile so concurrent
//! sessions never contend on Chrome's SingletonLock.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// RAII wrapper for a Chrome profile directory
///
/// The directory is removed on drop, so a closed session leaves nothing
/// behind in temp.
#[derive(Debug)]
pub struct BrowserProfile {
    path: PathBuf,
}

impl BrowserProfile {
    /// Get reference to the profile directory path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BrowserProfile {
    fn drop(&mut self) {
        if self.path.exists() {
            debug!("BrowserProfile cleanup: removing {}", self.path.display());
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to cleanup profile directory {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Create a unique profile directory named `{prefix}_{uuid}` in temp
pub fn create_unique_profile_with_prefix(prefix: &str) -> Result<BrowserProfile> {
    let path = std::env::temp_dir().join(format!("{}_{}", prefix, Uuid::new_v4()));

    // create_dir (not create_dir_all) fails on an existing directory
    std::fs::create_dir(&path)
        .with_context(|| format!("Failed to create profile directory: {}", path.display()))?;

    info!("Created Chrome profile directory: {}", path.display());
    Ok(BrowserProfile { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_is_unique_and_removed_on_drop() {
        let a = create_unique_profile_with_prefix("pagewatch_test").expect("create profile");
        let b = create_unique_profile_with_prefix("pagewatch_test").expect("create profile");
        assert_ne!(a.path(), b.path());

        let path = a.path().to_path_buf();
        assert!(path.is_dir());
        drop(a);
        assert!(!path.exists());
    }
}
