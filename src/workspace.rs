use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::config::Config;
use crate::error::DwcaError;

/// Scratch directories used while an archive is downloaded, extracted and
/// rewritten.
#[derive(Debug, Clone)]
pub struct Workspace {
    download_root: Utf8PathBuf,
    extract_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Workspace {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_root: config.download_path.clone(),
            extract_root: config.extract_path.clone(),
            output_root: config.output_path.clone(),
        }
    }

    pub fn download_root(&self) -> &Utf8Path {
        &self.download_root
    }

    pub fn extract_root(&self) -> &Utf8Path {
        &self.extract_root
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn output_path(&self, file: &str) -> Utf8PathBuf {
        self.output_root.join(file)
    }

    /// Empties extract and output directories and makes sure all three exist.
    pub fn reset(&self) -> Result<(), DwcaError> {
        for dir in [&self.extract_root, &self.output_root] {
            if dir.as_std_path().exists() {
                fs::remove_dir_all(dir.as_std_path())
                    .map_err(|err| DwcaError::Filesystem(format!("remove {dir}: {err}")))?;
            }
        }
        for dir in [&self.download_root, &self.extract_root, &self.output_root] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| DwcaError::Filesystem(format!("create {dir}: {err}")))?;
        }
        debug!(extract = %self.extract_root, output = %self.output_root, "workspace reset");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), DwcaError> {
        for dir in [&self.download_root, &self.extract_root, &self.output_root] {
            if dir.as_std_path().exists() {
                fs::remove_dir_all(dir.as_std_path())
                    .map_err(|err| DwcaError::Filesystem(format!("remove {dir}: {err}")))?;
            }
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DwcaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Path, dest: &Utf8Path) -> Result<(), DwcaError> {
        let parent = dest
            .parent()
            .ok_or_else(|| DwcaError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("dwca-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        fs::copy(source, temp.path()).map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        if dest.as_std_path().exists() {
            fs::remove_file(dest.as_std_path())
                .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest.as_std_path())
            .map_err(|err| DwcaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Every path below `root`, directories included, in no particular order.
pub(crate) fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, DwcaError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path)
            .map_err(|err| DwcaError::Filesystem(format!("read {}: {err}", path.display())))?;
        for entry in entries {
            let entry = entry.map_err(|err| DwcaError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_recreates_empty_directories() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let workspace = Workspace::from_config(&Config::new(root));
        workspace.reset().unwrap();

        let stale = workspace.output_path("stale.txt");
        fs::write(stale.as_std_path(), b"old").unwrap();
        workspace.reset().unwrap();

        assert!(workspace.output_root().as_std_path().is_dir());
        assert!(!stale.as_std_path().exists());
    }
}
