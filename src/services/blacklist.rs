//! Blacklist store
//!
//! A persistent, append-only set of servers that are never probed again.
//! Lines have the form `host:port # reason`; only the text before the `#`
//! identifies the server. Entries are appended one at a time as soon as a
//! server is classified, so an interrupted run keeps everything it learned.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{StoreError, StoreResult};
use crate::models::{BlacklistEntry, ServerId};

/// Raw storage behind the blacklist
#[async_trait]
pub trait BlacklistBackend: Send + Sync {
    /// Create the resource empty if it does not exist yet
    async fn ensure_exists(&self) -> StoreResult<()>;

    /// Whole resource contents, `None` when it does not exist
    async fn read_all(&self) -> StoreResult<Option<String>>;

    /// Durably append one line; `line` carries no newline
    async fn append_line(&self, line: &str) -> StoreResult<()>;

    /// Human readable location for logs
    fn describe(&self) -> String;
}

/// Plain text file backend
#[derive(Debug, Clone)]
pub struct FileBlacklistBackend {
    path: PathBuf,
}

impl FileBlacklistBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn append_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Append {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl BlacklistBackend for FileBlacklistBackend {
    async fn ensure_exists(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.append_error(e))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.append_error(e))?;
        Ok(())
    }

    async fn read_all(&self) -> StoreResult<Option<String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.read_error(e)),
        }
    }

    async fn append_line(&self, line: &str) -> StoreResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.append_error(e))?;

        // a hand-edited file may end without a newline
        let len = file
            .metadata()
            .await
            .map_err(|e| self.append_error(e))?
            .len();
        let mut buf = String::with_capacity(line.len() + 2);
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(std::io::SeekFrom::Start(len - 1))
                .await
                .map_err(|e| self.append_error(e))?;
            file.read_exact(&mut last)
                .await
                .map_err(|e| self.append_error(e))?;
            if last[0] != b'\n' {
                buf.push('\n');
            }
        }
        buf.push_str(line);
        buf.push('\n');

        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| self.append_error(e))?;
        file.flush().await.map_err(|e| self.append_error(e))?;
        file.sync_data().await.map_err(|e| self.append_error(e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory backend, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryBlacklistBackend {
    contents: StdMutex<Option<String>>,
}

impl MemoryBlacklistBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing contents, e.g. a copy of the on-disk file
    pub fn seeded(contents: impl Into<String>) -> Self {
        Self {
            contents: StdMutex::new(Some(contents.into())),
        }
    }

    /// Current contents, empty when nothing was ever written
    pub fn snapshot(&self) -> String {
        self.contents
            .lock()
            .map(|c| c.clone().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlacklistBackend for MemoryBlacklistBackend {
    async fn ensure_exists(&self) -> StoreResult<()> {
        if let Ok(mut contents) = self.contents.lock() {
            contents.get_or_insert_with(String::new);
        }
        Ok(())
    }

    async fn read_all(&self) -> StoreResult<Option<String>> {
        Ok(self.contents.lock().ok().and_then(|c| c.clone()))
    }

    async fn append_line(&self, line: &str) -> StoreResult<()> {
        let mut contents = self.contents.lock().map_err(|_| StoreError::Append {
            path: PathBuf::from("<memory>"),
            source: std::io::Error::other("blacklist buffer poisoned"),
        })?;
        let buf = contents.get_or_insert_with(String::new);
        if !buf.is_empty() && !buf.ends_with('\n') {
            buf.push('\n');
        }
        buf.push_str(line);
        buf.push('\n');
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

/// Reads through to another backend but keeps appends in memory
///
/// Used for dry runs: the underlying blacklist is honored, including its
/// read failures, and never written.
pub struct OverlayBlacklistBackend {
    base: Arc<dyn BlacklistBackend>,
    appended: MemoryBlacklistBackend,
}

impl OverlayBlacklistBackend {
    pub fn new(base: Arc<dyn BlacklistBackend>) -> Self {
        Self {
            base,
            appended: MemoryBlacklistBackend::new(),
        }
    }

    /// Lines appended during this run
    pub fn appended(&self) -> String {
        self.appended.snapshot()
    }
}

#[async_trait]
impl BlacklistBackend for OverlayBlacklistBackend {
    async fn ensure_exists(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn read_all(&self) -> StoreResult<Option<String>> {
        let base = self.base.read_all().await?;
        let appended = self.appended.snapshot();
        match base {
            None if appended.is_empty() => Ok(None),
            None => Ok(Some(appended)),
            Some(mut contents) => {
                if !contents.is_empty() && !contents.ends_with('\n') {
                    contents.push('\n');
                }
                contents.push_str(&appended);
                Ok(Some(contents))
            }
        }
    }

    async fn append_line(&self, line: &str) -> StoreResult<()> {
        self.appended.append_line(line).await
    }

    fn describe(&self) -> String {
        format!("{} (dry run)", self.base.describe())
    }
}

/// Summary of one blacklist load
#[derive(Debug, Clone, Default)]
pub struct BlacklistSnapshot {
    pub servers: HashSet<ServerId>,
    /// Non-blank lines that did not start with a `host:port`
    pub unparsed_lines: usize,
    /// Count of entries per annotation, for logging
    pub reasons: HashMap<String, usize>,
}

/// Append-only blacklist shared by every writer in a run
pub struct BlacklistStore {
    backend: Arc<dyn BlacklistBackend>,
    write_lock: Mutex<()>,
}

impl BlacklistStore {
    pub fn new(backend: Arc<dyn BlacklistBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBlacklistBackend::new(path)))
    }

    pub async fn ensure_exists(&self) -> StoreResult<()> {
        self.backend.ensure_exists().await
    }

    /// Read every server currently on the blacklist
    ///
    /// A missing resource is an empty blacklist. Unparseable lines are
    /// skipped; the server is whatever precedes the first `#`.
    pub async fn load(&self) -> StoreResult<HashSet<ServerId>> {
        Ok(self.load_snapshot().await?.servers)
    }

    pub async fn load_snapshot(&self) -> StoreResult<BlacklistSnapshot> {
        let Some(contents) = self.backend.read_all().await? else {
            debug!("Blacklist {} does not exist yet", self.backend.describe());
            return Ok(BlacklistSnapshot::default());
        };

        let mut snapshot = BlacklistSnapshot::default();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match BlacklistEntry::parse_line(trimmed) {
                Some(entry) => {
                    *snapshot.reasons.entry(entry.reason.to_string()).or_default() += 1;
                    snapshot.servers.insert(entry.server);
                }
                None => snapshot.unparsed_lines += 1,
            }
        }

        if snapshot.unparsed_lines > 0 {
            warn!(
                "Ignored {} unparseable line(s) in blacklist {}",
                snapshot.unparsed_lines,
                self.backend.describe()
            );
        }
        debug!("Blacklist annotations: {:?}", snapshot.reasons);
        info!(
            "Loaded {} blacklisted server(s) from {}",
            snapshot.servers.len(),
            self.backend.describe()
        );
        Ok(snapshot)
    }

    /// Append one entry durably
    ///
    /// Appends are serialized so concurrent writers never interleave
    /// partial lines.
    pub async fn append(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        let line = entry.to_line();
        if line.contains(['\n', '\r']) {
            return Err(StoreError::InvalidLine(line));
        }

        let _guard = self.write_lock.lock().await;
        self.backend.append_line(&line).await?;
        debug!("Blacklisted {}", line);
        Ok(())
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}
