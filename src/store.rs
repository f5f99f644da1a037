use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Themes this application installed, mapped to their cached preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Record {
    #[serde(default)]
    installed: BTreeMap<String, PathBuf>,
}

#[derive(Debug)]
pub struct InstalledStore {
    path: PathBuf,
    record: Record,
}

impl InstalledStore {
    /// Opens the record at `path`, creating an empty one if it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let record = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                Record::default()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            let record = Record::default();
            write_atomically(&path, &record)?;
            record
        };

        debug!(path = %path.display(), count = record.installed.len(), "Loaded installed themes");
        Ok(Self { path, record })
    }

    pub fn installed(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.record
            .installed
            .iter()
            .map(|(name, preview)| (name.as_str(), preview.as_path()))
    }

    pub fn mark_installed(&mut self, name: &str, preview: &Path) -> Result<()> {
        self.record
            .installed
            .insert(name.to_string(), preview.to_path_buf());
        write_atomically(&self.path, &self.record)?;
        info!(theme = name, "Recorded installed theme");
        Ok(())
    }

    /// Returns `false` when `name` was not recorded.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if self.record.installed.remove(name).is_none() {
            return Ok(false);
        }
        write_atomically(&self.path, &self.record)?;
        info!(theme = name, "Removed installed theme record");
        Ok(true)
    }
}

fn write_atomically(path: &Path, record: &Record) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, record)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
