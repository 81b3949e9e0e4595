//! Archiving of fully delivered input files
//!
//! Layout: `<root>/<YYYY-MM-DD>/<stem>_<DDMMYYYY_HHMMSS>.<ext>`, partitioned by
//! the day of archiving. A file is either moved whole or left where it was.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct Archiver {
    root: PathBuf,
}

impl Archiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `source` into today's archive directory
    pub async fn archive(&self, source: &Path) -> Result<PathBuf, IngestError> {
        self.archive_at(source, Local::now().naive_local()).await
    }

    /// Move `source` into the archive directory of `now`
    pub async fn archive_at(
        &self,
        source: &Path,
        now: NaiveDateTime,
    ) -> Result<PathBuf, IngestError> {
        let day_dir = self.root.join(now.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&day_dir)
            .await
            .map_err(|e| IngestError::io(&day_dir, e))?;

        let target = free_target(&day_dir, source, now).await?;
        move_file(source, &target).await?;
        info!(
            source = %source.display(),
            target = %target.display(),
            "Archived file"
        );
        Ok(target)
    }
}

/// Archive name for `source`, with a numeric suffix if the name is taken
async fn free_target(
    day_dir: &Path,
    source: &Path,
    now: NaiveDateTime,
) -> Result<PathBuf, IngestError> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = now.format("%d%m%Y_%H%M%S");

    let mut candidate = day_dir.join(format!("{}_{}{}", stem, stamp, extension));
    let mut counter = 1;
    while tokio::fs::try_exists(&candidate)
        .await
        .map_err(|e| IngestError::io(&candidate, e))?
    {
        candidate = day_dir.join(format!("{}_{}_{}{}", stem, stamp, counter, extension));
        counter += 1;
    }
    Ok(candidate)
}

/// Rename, or copy then remove when the rename crosses devices.
///
/// If the source cannot be removed after copying, the copy is deleted again
/// so the file exists in exactly one place.
async fn move_file(source: &Path, target: &Path) -> Result<(), IngestError> {
    if tokio::fs::rename(source, target).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(source, target)
        .await
        .map_err(|e| IngestError::io(source, e))?;

    if let Err(e) = tokio::fs::remove_file(source).await {
        if let Err(revert) = tokio::fs::remove_file(target).await {
            warn!(
                target = %target.display(),
                error = %revert,
                "Failed to remove archive copy"
            );
        }
        return Err(IngestError::io(source, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap()
    }

    #[tokio::test]
    async fn test_archive_layout() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sensors.txt");
        std::fs::write(&source, "data").unwrap();

        let archiver = Archiver::new(dir.path().join("archive"));
        let target = archiver.archive_at(&source, noon()).await.unwrap();

        assert_eq!(
            target,
            dir.path()
                .join("archive/2024-05-01/sensors_01052024_123005.txt")
        );
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_name_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(dir.path().join("archive"));

        let mut targets = Vec::new();
        for content in ["one", "two", "three"] {
            let source = dir.path().join("sensors.txt");
            std::fs::write(&source, content).unwrap();
            targets.push(archiver.archive_at(&source, noon()).await.unwrap());
        }

        let names: Vec<_> = targets
            .iter()
            .map(|t| t.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "sensors_01052024_123005.txt",
                "sensors_01052024_123005_1.txt",
                "sensors_01052024_123005_2.txt",
            ]
        );
        assert_eq!(std::fs::read_to_string(&targets[2]).unwrap(), "three");
    }

    #[tokio::test]
    async fn test_file_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dump");
        std::fs::write(&source, "x").unwrap();

        let target = Archiver::new(dir.path().join("a"))
            .archive_at(&source, noon())
            .await
            .unwrap();
        assert!(target.ends_with("2024-05-01/dump_01052024_123005"));
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(dir.path().join("archive"));
        assert!(
            archiver
                .archive_at(&dir.path().join("ghost.txt"), noon())
                .await
                .is_err()
        );
        let day_dir = dir.path().join("archive/2024-05-01");
        assert_eq!(std::fs::read_dir(day_dir).unwrap().count(), 0);
    }
}
