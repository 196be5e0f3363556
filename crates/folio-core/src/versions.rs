//! Append-only version ledger.
//!
//! Every content-changing mutation of an article appends one immutable
//! [`VersionRecord`]. Records are numbered per article from 1 with no gaps
//! and are never rewritten or deleted; restoring an old version appends a
//! copy of it.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/articles/
//! └── hello/
//!     └── versions/
//!         ├── 1.json
//!         ├── 2.json
//!         └── 3.json
//! ```
//!
//! The ledger is loaded into memory on open, so reads never touch the disk.
//! Writes go through a temp file that is linked into place without
//! clobbering, so a crash leaves either the old ledger or the new one.
//!
//! Mutations for one article are serialized by a per-article mutex; other
//! articles are unaffected.

use crate::parser::checksum;
use crate::types::{VersionDescriptor, VersionReason, VersionRecord};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<Arc<VersionRecord>>,
}

impl Ledger {
    fn current(&self) -> u64 {
        self.records.last().map_or(0, |r| r.version)
    }
}

/// Durable per-article history of content snapshots.
#[derive(Debug)]
pub struct VersionStore {
    root: Option<PathBuf>,
    ledgers: RwLock<HashMap<String, Arc<Mutex<Ledger>>>>,
}

impl VersionStore {
    /// Open the ledger rooted at `root`, loading every stored record.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!(
                "Failed to create version root {}: {e}",
                root.display()
            ))
        })?;

        let mut ledgers = HashMap::new();
        let mut total = 0usize;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(article_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_article_id(&article_id).is_err() {
                debug!("Skipping foreign directory in version root: {article_id}");
                continue;
            }
            let records = load_ledger(&entry.path().join("versions"), &article_id)?;
            total += records.len();
            if !records.is_empty() {
                ledgers.insert(article_id, Arc::new(Mutex::new(Ledger { records })));
            }
        }

        info!(
            "Loaded {} versions for {} articles from {}",
            total,
            ledgers.len(),
            root.display()
        );

        Ok(Self {
            root: Some(root),
            ledgers: RwLock::new(ledgers),
        })
    }

    /// A ledger that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    /// Append `content` as the next version of `article_id`.
    ///
    /// Content identical to the latest version is not recorded again; the
    /// current number is returned unchanged.
    pub fn commit(&self, article_id: &str, content: &str) -> Result<u64> {
        self.commit_as(article_id, content, None)
    }

    /// [`commit`](Self::commit) with the editor recorded on the new version.
    pub fn commit_as(&self, article_id: &str, content: &str, editor: Option<&str>) -> Result<u64> {
        validate_article_id(article_id)?;
        let ledger = self.ledger(article_id);
        let mut ledger = ledger.lock();

        let sha256 = checksum(content);
        if let Some(latest) = ledger.records.last() {
            if latest.sha256 == sha256 && latest.content == content {
                debug!("Unchanged content for {article_id}, staying at v{}", latest.version);
                return Ok(latest.version);
            }
        }

        let record = VersionRecord {
            article_id: article_id.to_string(),
            version: ledger.current() + 1,
            content: content.to_string(),
            sha256,
            timestamp: Utc::now(),
            reason: VersionReason::Edit,
            restored_from: None,
            editor: editor.map(str::to_string),
        };
        self.append(&mut ledger, record)
    }

    /// Append a copy of `version` as the new current version.
    ///
    /// Always appends, even when the content equals the current version.
    pub fn restore(&self, article_id: &str, version: u64) -> Result<u64> {
        self.restore_as(article_id, version, None)
    }

    /// [`restore`](Self::restore) with the editor recorded on the new version.
    pub fn restore_as(&self, article_id: &str, version: u64, editor: Option<&str>) -> Result<u64> {
        validate_article_id(article_id)?;
        let ledger = self.existing(article_id).ok_or_else(|| Error::VersionNotFound {
            slug: article_id.to_string(),
            version,
        })?;
        let mut ledger = ledger.lock();

        let source = find(&ledger, version).ok_or_else(|| Error::VersionNotFound {
            slug: article_id.to_string(),
            version,
        })?;

        let record = VersionRecord {
            article_id: article_id.to_string(),
            version: ledger.current() + 1,
            content: source.content.clone(),
            sha256: source.sha256.clone(),
            timestamp: Utc::now(),
            reason: VersionReason::Restore,
            restored_from: Some(version),
            editor: editor.map(str::to_string),
        };
        self.append(&mut ledger, record)
    }

    /// Version descriptors for `article_id`, newest first.
    pub fn list(&self, article_id: &str) -> Vec<VersionDescriptor> {
        self.existing(article_id)
            .map(|ledger| {
                ledger
                    .lock()
                    .records
                    .iter()
                    .rev()
                    .map(|r| r.descriptor())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One stored version.
    pub fn get(&self, article_id: &str, version: u64) -> Result<Arc<VersionRecord>> {
        self.existing(article_id)
            .and_then(|ledger| find(&ledger.lock(), version))
            .ok_or_else(|| Error::VersionNotFound {
                slug: article_id.to_string(),
                version,
            })
    }

    /// Latest version of `article_id`, if any.
    pub fn latest(&self, article_id: &str) -> Option<Arc<VersionRecord>> {
        self.existing(article_id)
            .and_then(|ledger| ledger.lock().records.last().cloned())
    }

    /// Current version number, 0 when nothing is recorded.
    pub fn current_version(&self, article_id: &str) -> u64 {
        self.existing(article_id)
            .map_or(0, |ledger| ledger.lock().current())
    }

    fn existing(&self, article_id: &str) -> Option<Arc<Mutex<Ledger>>> {
        self.ledgers.read().get(article_id).cloned()
    }

    fn ledger(&self, article_id: &str) -> Arc<Mutex<Ledger>> {
        if let Some(ledger) = self.existing(article_id) {
            return ledger;
        }
        Arc::clone(
            self.ledgers
                .write()
                .entry(article_id.to_string())
                .or_default(),
        )
    }

    fn append(&self, ledger: &mut Ledger, record: VersionRecord) -> Result<u64> {
        if let Some(root) = &self.root {
            persist(root, &record)?;
        }
        let version = record.version;
        info!(
            "Recorded {} v{} ({:?})",
            record.article_id, version, record.reason
        );
        ledger.records.push(Arc::new(record));
        Ok(version)
    }
}

fn find(ledger: &Ledger, version: u64) -> Option<Arc<VersionRecord>> {
    // Numbers are contiguous from 1.
    let index = usize::try_from(version.checked_sub(1)?).ok()?;
    ledger.records.get(index).cloned()
}

fn persist(root: &Path, record: &VersionRecord) -> Result<()> {
    let dir = root.join(&record.article_id).join("versions");
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", record.version));
    if path.exists() {
        return Err(Error::Storage(format!(
            "Refusing to overwrite version file {}",
            path.display()
        )));
    }

    let json = serde_json::to_vec_pretty(record)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(&path).map_err(|e| {
        Error::Storage(format!(
            "Failed to persist version file {}: {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}

fn load_ledger(dir: &Path, article_id: &str) -> Result<Vec<Arc<VersionRecord>>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path)?;
        let record: VersionRecord = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Storage(format!("Corrupt version file {}: {e}", path.display()))
        })?;
        if record.article_id != article_id || checksum(&record.content) != record.sha256 {
            return Err(Error::Storage(format!(
                "Version file {} does not match its ledger",
                path.display()
            )));
        }
        records.push(Arc::new(record));
    }

    records.sort_by_key(|r| r.version);
    for (expected, record) in (1u64..).zip(&records) {
        if record.version != expected {
            return Err(Error::Storage(format!(
                "Version ledger for '{article_id}' has a gap before v{}",
                record.version
            )));
        }
    }
    Ok(records)
}

/// Reject ids that could escape the ledger directory.
pub fn validate_article_id(article_id: &str) -> Result<()> {
    if article_id.trim().is_empty() {
        return Err(Error::InvalidInput("Article id cannot be empty".into()));
    }
    if article_id.contains("..") || article_id.contains('/') || article_id.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "Invalid article id '{article_id}': contains path traversal characters"
        )));
    }
    if article_id.starts_with('.') || article_id.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "Invalid article id '{article_id}': contains invalid filesystem characters"
        )));
    }
    Ok(())
}
