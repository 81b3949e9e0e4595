//! Ingestion watcher
//!
//! Watches one directory for input files. Files present at startup are
//! drained first; afterwards file system notifications and a periodic rescan
//! drive processing. Each file is delivered batch by batch and archived only
//! once every batch was acknowledged.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use sensorline_common::{ShutdownSignal, WatcherSettings};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

use crate::archive::Archiver;
use crate::batcher::LineBatcher;
use crate::error::IngestError;
use crate::relay::Relay;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Processing state of the watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    FileDetected,
    Draining,
    Archiving,
}

/// Result of processing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Every batch was acknowledged and the file moved to the archive
    Archived(PathBuf),
    /// Transport failure or unreadable file; retried on the next pass
    Retry,
    /// Rejected by the collector; skipped until the file changes
    Quarantined,
    /// Vanished, not a regular file, or quarantined and unchanged
    Skipped,
}

/// Size and modification time of a regular file, used to notice changed
/// quarantined files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    async fn read(path: &Path) -> Option<Self> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

pub struct IngestWatcher {
    watch_dir: PathBuf,
    archiver: Archiver,
    batcher: LineBatcher,
    relay: Arc<dyn Relay>,
    readable_timeout: Duration,
    rescan_interval: Duration,
    state: WatcherState,
    quarantined: HashMap<PathBuf, FileStamp>,
}

impl IngestWatcher {
    pub fn new(settings: &WatcherSettings, relay: Arc<dyn Relay>) -> Self {
        Self {
            watch_dir: settings.watch_dir.clone(),
            archiver: Archiver::new(settings.archive_dir.clone()),
            batcher: LineBatcher::new(settings.batch_size),
            relay,
            readable_timeout: settings.readable_timeout,
            rescan_interval: settings.rescan_interval,
            state: WatcherState::Idle,
            quarantined: HashMap::new(),
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn is_quarantined(&self, path: &Path) -> bool {
        self.quarantined.contains_key(path)
    }

    fn transition(&mut self, next: WatcherState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Watcher state changed");
            self.state = next;
        }
    }

    /// Create the watched and archive directories
    pub async fn prepare(&self) -> Result<(), IngestError> {
        for dir in [self.watch_dir.as_path(), self.archiver.root()] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| IngestError::io(dir, e))?;
        }
        Ok(())
    }

    fn is_archive_path(&self, path: &Path) -> bool {
        path.starts_with(self.archiver.root())
    }

    /// Regular files directly inside the watched directory, sorted by name
    pub async fn pending_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let mut entries = tokio::fs::read_dir(&self.watch_dir)
            .await
            .map_err(|e| IngestError::io(&self.watch_dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::io(&self.watch_dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && !self.is_archive_path(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Process every pending file once; returns the number archived
    pub async fn drain(&mut self) -> Result<usize, IngestError> {
        let pending = self.pending_files().await?;
        // Forget quarantined files that were removed or moved away
        self.quarantined.retain(|path, _| pending.contains(path));

        let mut archived = 0;
        for path in pending {
            if matches!(self.process_file(&path).await, FileOutcome::Archived(_)) {
                archived += 1;
            }
        }
        Ok(archived)
    }

    /// Deliver one file and archive it when every batch was acknowledged
    pub async fn process_file(&mut self, path: &Path) -> FileOutcome {
        let Some(stamp) = FileStamp::read(path).await else {
            return FileOutcome::Skipped;
        };
        if let Some(previous) = self.quarantined.get(path) {
            if *previous == stamp {
                return FileOutcome::Skipped;
            }
            info!(path = %path.display(), "Quarantined file changed, retrying");
            self.quarantined.remove(path);
        }

        self.transition(WatcherState::FileDetected);
        let outcome = self.deliver_file(path).await;
        self.transition(WatcherState::Idle);
        outcome
    }

    async fn deliver_file(&mut self, path: &Path) -> FileOutcome {
        if let Err(e) = wait_until_readable(path, self.readable_timeout).await {
            warn!(path = %path.display(), error = %e, "File not readable yet");
            return FileOutcome::Retry;
        }

        let content = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return FileOutcome::Skipped,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read file");
                return FileOutcome::Retry;
            }
        };
        let content = match String::from_utf8(content) {
            Ok(text) => text,
            Err(e) => {
                error!(path = %path.display(), error = %e, "File is not valid UTF-8");
                self.quarantine(path).await;
                return FileOutcome::Quarantined;
            }
        };

        self.transition(WatcherState::Draining);
        let groups = self.batcher.split(path, &content);
        info!(path = %path.display(), batches = groups.len(), "Delivering file");

        for group in &groups {
            match self.relay.deliver(&group.batch).await {
                Ok(ack) => {
                    if ack.rejected > 0 {
                        warn!(
                            path = %path.display(),
                            lines = %format!("{}-{}", group.first_line, group.last_line),
                            accepted = ack.accepted,
                            rejected = ack.rejected,
                            "Collector rejected some readings"
                        );
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        path = %path.display(),
                        first_line = group.first_line,
                        error = %e,
                        "Transport failed, file left for retry"
                    );
                    return FileOutcome::Retry;
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        first_line = group.first_line,
                        error = %e,
                        "Collector rejected batch, file quarantined"
                    );
                    self.quarantine(path).await;
                    return FileOutcome::Quarantined;
                }
            }
        }

        self.transition(WatcherState::Archiving);
        match self.archiver.archive(path).await {
            Ok(target) => FileOutcome::Archived(target),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to archive file");
                FileOutcome::Retry
            }
        }
    }

    async fn quarantine(&mut self, path: &Path) {
        if let Some(stamp) = FileStamp::read(path).await {
            self.quarantined.insert(path.to_path_buf(), stamp);
        }
    }

    /// Drain the backlog, then process files as they arrive until `shutdown`
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<(), IngestError> {
        self.prepare().await?;

        let archived = self.drain().await?;
        info!(
            watch_dir = %self.watch_dir.display(),
            archived,
            "Initial drain complete, watching for new files"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut fs_watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;
        fs_watcher.watch(&self.watch_dir, RecursiveMode::NonRecursive)?;

        let mut rescan = interval_at(Instant::now() + self.rescan_interval, self.rescan_interval);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Watcher stopping");
                    break;
                }
                Some(event) = rx.recv() => {
                    let mut paths = BTreeSet::new();
                    collect_paths(event, &mut paths);
                    while let Ok(event) = rx.try_recv() {
                        collect_paths(event, &mut paths);
                    }
                    for path in paths {
                        if self.is_archive_path(&path) || shutdown.is_shutdown() {
                            continue;
                        }
                        self.process_file(&path).await;
                    }
                }
                _ = rescan.tick() => {
                    if let Err(e) = self.drain().await {
                        warn!(error = %e, "Rescan failed");
                    }
                }
            }
        }

        Ok(())
    }
}

fn collect_paths(event: notify::Result<Event>, paths: &mut BTreeSet<PathBuf>) {
    match event {
        Ok(event) => {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                paths.extend(event.paths);
            }
        }
        Err(e) => warn!(error = %e, "File watch error"),
    }
}

/// Wait until `path` can be opened and its size is stable between two polls
pub async fn wait_until_readable(path: &Path, timeout: Duration) -> Result<(), IngestError> {
    let started = Instant::now();
    let mut last_len: Option<u64> = None;

    loop {
        let ready = match tokio::fs::File::open(path).await {
            Ok(file) => match file.metadata().await {
                Ok(metadata) if metadata.is_file() => {
                    let len = metadata.len();
                    let stable = last_len == Some(len);
                    last_len = Some(len);
                    stable
                }
                _ => false,
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::io(path, e));
            }
            Err(_) => false,
        };
        if ready {
            return Ok(());
        }

        if started.elapsed() >= timeout {
            return Err(IngestError::NotReadable {
                path: path.to_path_buf(),
                waited_ms: started.elapsed().as_millis(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_file_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "line").unwrap();
        wait_until_readable(&path, Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let result = wait_until_readable(&dir.path().join("nope"), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(IngestError::Io { .. })));
    }

    #[tokio::test]
    async fn test_directory_never_becomes_readable() {
        let dir = tempfile::tempdir().unwrap();
        let result = wait_until_readable(dir.path(), Duration::from_millis(300)).await;
        assert!(matches!(result, Err(IngestError::NotReadable { .. })));
    }
}
