//! PMode store implementations.

use super::PModeStore;
use crate::error::{As4Error, Result};
use crate::models::{ReceivingPMode, SendingPMode};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAX_PMODE_FILE_SIZE: u64 = 1024 * 1024; // 1MB limit

/// PModes registered in code, kept in registration order
#[derive(Debug, Default)]
pub struct InMemoryPModeStore {
    sending: RwLock<Vec<SendingPMode>>,
    receiving: RwLock<Vec<ReceivingPMode>>,
}

impl InMemoryPModeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace (by id) a sending PMode
    pub fn add_sending_pmode(&self, pmode: SendingPMode) {
        let mut sending = self.sending.write();
        match sending.iter_mut().find(|p| p.id == pmode.id) {
            Some(existing) => *existing = pmode,
            None => sending.push(pmode),
        }
    }

    /// Add or replace (by id) a receiving PMode; replacing keeps the declaration position
    pub fn add_receiving_pmode(&self, pmode: ReceivingPMode) {
        let mut receiving = self.receiving.write();
        match receiving.iter_mut().find(|p| p.id == pmode.id) {
            Some(existing) => *existing = pmode,
            None => receiving.push(pmode),
        }
    }
}

#[async_trait]
impl PModeStore for InMemoryPModeStore {
    async fn get_sending_pmode(&self, id: &str) -> Result<SendingPMode> {
        self.sending
            .read()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| As4Error::PModeNotFound(id.to_string()))
    }

    async fn receiving_pmodes(&self) -> Result<Vec<ReceivingPMode>> {
        Ok(self.receiving.read().clone())
    }
}

/// PModes read from YAML files under `<directory>/send` and `<directory>/receive`.
///
/// Files are loaded in file name order, so the file name decides precedence
/// between equally scored receiving PModes.
#[derive(Debug)]
pub struct FilePModeStore {
    directory: PathBuf,
    inner: InMemoryPModeStore,
}

impl FilePModeStore {
    pub fn load(directory: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            directory: directory.into(),
            inner: InMemoryPModeStore::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Re-read every PMode file, replacing the current set atomically
    pub fn reload(&self) -> Result<()> {
        let sending: Vec<SendingPMode> = load_pmodes(&self.directory.join("send"))?;
        let receiving: Vec<ReceivingPMode> = load_pmodes(&self.directory.join("receive"))?;

        ensure_unique(sending.iter().map(|p| p.id.as_str()))?;
        ensure_unique(receiving.iter().map(|p| p.id.as_str()))?;

        info!(
            directory = %self.directory.display(),
            sending = sending.len(),
            receiving = receiving.len(),
            "Loaded PModes"
        );

        *self.inner.sending.write() = sending;
        *self.inner.receiving.write() = receiving;
        Ok(())
    }
}

#[async_trait]
impl PModeStore for FilePModeStore {
    async fn get_sending_pmode(&self, id: &str) -> Result<SendingPMode> {
        self.inner.get_sending_pmode(id).await
    }

    async fn receiving_pmodes(&self) -> Result<Vec<ReceivingPMode>> {
        self.inner.receiving_pmodes().await
    }
}

fn ensure_unique<'a>(ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(As4Error::invalid_pmode(id, "declared more than once"));
        }
    }
    Ok(())
}

fn load_pmodes<T: DeserializeOwned>(directory: &Path) -> Result<Vec<T>> {
    if !directory.exists() {
        debug!(directory = %directory.display(), "PMode directory does not exist, skipping");
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(directory).map_err(|e| {
        As4Error::Configuration(format!("cannot read {}: {e}", directory.display()))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    files
        .iter()
        .map(|path| {
            let content = read_pmode_file(path)?;
            serde_yaml::from_str(&content).map_err(|e| {
                As4Error::invalid_pmode(path.display().to_string(), e.to_string())
            })
        })
        .collect()
}

fn read_pmode_file(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| As4Error::Configuration(format!("cannot read {}: {e}", path.display())))?;

    if metadata.len() > MAX_PMODE_FILE_SIZE {
        return Err(As4Error::invalid_pmode(
            path.display().to_string(),
            format!("file too large ({} bytes)", metadata.len()),
        ));
    }

    std::fs::read_to_string(path)
        .map_err(|e| As4Error::Configuration(format!("cannot read {}: {e}", path.display())))
}
