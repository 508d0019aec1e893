//! Last confirmed WAN IP, kept in a single-value text file

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct WanIpStore {
    path: PathBuf,
}

impl WanIpStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored IP, or an empty string when nothing has been saved yet
    pub fn load(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        }
    }

    /// Overwrite the file with `ip`
    pub fn save(&self, ip: &str) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(&self.path, ip)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = WanIpStore::new(dir.path().join("wanip.txt"));
        assert_eq!(store.load().unwrap(), "");
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = WanIpStore::new(dir.path().join("nested/wanip.txt"));

        store.save("1.2.3.4").unwrap();
        store.save("5.6.7.8").unwrap();

        assert_eq!(store.load().unwrap(), "5.6.7.8");
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "5.6.7.8");
    }

    #[test]
    fn test_load_trims_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wanip.txt");
        std::fs::write(&path, "1.2.3.4\n").unwrap();
        assert_eq!(WanIpStore::new(path).load().unwrap(), "1.2.3.4");
    }
}
