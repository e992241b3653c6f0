//! File-backed snapshot of the last successful fetch.
//!
//! The snapshot is loaded once at start and kept in memory. Writes go to a
//! temporary file in the same directory which is then renamed over the
//! target, so readers see either the old file or the new one, never a mix.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::movies::MovieRecord;

const SOURCE: &str = "infra::snapshot";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot writer task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub fetched_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub movies: Vec<MovieRecord>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    pub fn age_at(&self, now: OffsetDateTime) -> Option<Duration> {
        let fetched_at = self.fetched_at?;
        Some(Duration::try_from(now - fetched_at).unwrap_or(Duration::ZERO))
    }

    /// Stale once strictly older than `ttl`. A snapshot without a timestamp is stale.
    pub fn is_stale_at(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        self.age_at(now).is_none_or(|age| age > ttl)
    }
}

pub struct SnapshotStore {
    path: PathBuf,
    ttl: Duration,
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    /// Open the store, treating a missing or unreadable file as an empty snapshot.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let snapshot = match read_snapshot(&path) {
            Ok(Some(snapshot)) => {
                info!(
                    target = SOURCE,
                    path = %path.display(),
                    movies = snapshot.movies.len(),
                    "Loaded movie snapshot"
                );
                snapshot
            }
            Ok(None) => Snapshot::default(),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    path = %path.display(),
                    error = %err,
                    "Ignoring unreadable movie snapshot"
                );
                Snapshot::default()
            }
        };

        Self {
            path,
            ttl,
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&rw_read(&self.current, SOURCE, "current"))
    }

    /// Empty or stale snapshots must be refreshed before they are served.
    pub fn needs_refresh(&self) -> bool {
        let snapshot = self.current();
        snapshot.is_empty() || snapshot.is_stale_at(OffsetDateTime::now_utc(), self.ttl)
    }

    /// Persist `movies` as the new snapshot, then swap it in memory.
    pub async fn save(&self, movies: Vec<MovieRecord>) -> Result<Arc<Snapshot>, SnapshotError> {
        let snapshot = Snapshot {
            fetched_at: Some(OffsetDateTime::now_utc()),
            movies,
        };
        let payload = serde_json::to_vec(&snapshot)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &payload))
            .await
            .map_err(|err| SnapshotError::Task(err.to_string()))??;

        let snapshot = Arc::new(snapshot);
        *rw_write(&self.current, SOURCE, "save") = Arc::clone(&snapshot);
        info!(
            target = SOURCE,
            path = %self.path.display(),
            movies = snapshot.movies.len(),
            "Persisted movie snapshot"
        );
        Ok(snapshot)
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), SnapshotError> {
    write_atomic_with(path, payload, |file, bytes| file.write_all(bytes))
}

/// The temp file is removed whenever the write fails.
fn write_atomic_with<F>(path: &Path, payload: &[u8], fill: F) -> Result<(), SnapshotError>
where
    F: FnOnce(&mut NamedTempFile, &[u8]) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut file = tempfile::Builder::new()
        .prefix(".snapshot-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    fill(&mut file, payload)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| SnapshotError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn movies(titles: &[&str]) -> Vec<MovieRecord> {
        titles
            .iter()
            .map(|title| MovieRecord::new(*title, Some(2020)))
            .collect()
    }

    #[tokio::test]
    async fn save_then_reopen_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("cache").join("movies.json");

        let store = SnapshotStore::open(&path, Duration::from_secs(60));
        assert!(store.current().is_empty());
        assert!(store.needs_refresh());

        store.save(movies(&["Alpha", "Beta"])).await.expect("save");
        assert!(!store.needs_refresh());

        let reopened = SnapshotStore::open(&path, Duration::from_secs(60));
        assert_eq!(reopened.current().movies.len(), 2);
        assert!(reopened.current().fetched_at.is_some());
    }

    fn stray_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test]
    async fn interrupted_write_leaves_previous_snapshot_readable() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("movies.json");
        let store = SnapshotStore::open(&path, Duration::from_secs(60));
        store.save(movies(&["Alpha"])).await.expect("save");

        let next = serde_json::to_vec(&Snapshot {
            fetched_at: Some(OffsetDateTime::now_utc()),
            movies: movies(&["Beta", "Gamma"]),
        })
        .expect("encode");
        let result = write_atomic_with(&path, &next, |file, bytes| {
            file.write_all(&bytes[..bytes.len() / 2])?;
            Err(std::io::Error::other("writer died mid-write"))
        });

        assert!(matches!(result, Err(SnapshotError::Io(_))));
        assert_eq!(stray_temp_files(dir.path()), 0);
        let reopened = SnapshotStore::open(&path, Duration::from_secs(60));
        let snapshot = reopened.current();
        assert_eq!(snapshot.movies.len(), 1);
        assert_eq!(snapshot.movies[0].title, "Alpha");
    }

    #[tokio::test]
    async fn failed_save_keeps_the_current_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("movies.json");
        let store = SnapshotStore::open(&path, Duration::from_secs(60));
        store.save(movies(&["Alpha"])).await.expect("save");

        // A non-empty directory at the target makes the final rename fail.
        fs::remove_file(&path).expect("remove snapshot");
        fs::create_dir(&path).expect("block target");
        fs::write(path.join("occupied"), b"x").expect("occupy target");

        let result = store.save(movies(&["Beta", "Gamma"])).await;

        assert!(matches!(result, Err(SnapshotError::Io(_))));
        let current = store.current();
        assert_eq!(current.movies.len(), 1);
        assert_eq!(current.movies[0].title, "Alpha");
        assert_eq!(stray_temp_files(dir.path()), 0);
    }

    #[test]
    fn unparseable_file_is_treated_as_empty() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("movies.json");
        fs::write(&path, b"{\"movies\": [").expect("write");

        let store = SnapshotStore::open(&path, Duration::from_secs(60));
        assert!(store.current().is_empty());
        assert!(store.needs_refresh());
    }

    #[test]
    fn staleness_is_strictly_after_ttl() {
        let fetched_at = OffsetDateTime::now_utc();
        let snapshot = Snapshot {
            fetched_at: Some(fetched_at),
            movies: movies(&["Alpha"]),
        };
        let ttl = Duration::from_secs(6 * 60 * 60);

        assert!(!snapshot.is_stale_at(fetched_at + ttl, ttl));
        assert!(snapshot.is_stale_at(fetched_at + ttl + time::Duration::SECOND, ttl));
        assert!(Snapshot::default().is_stale_at(fetched_at, ttl));
    }
}
