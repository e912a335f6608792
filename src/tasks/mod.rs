//! File-backed progress tasks
//!
//! A long job (re-encrypting the vault, exporting it) registers a task
//! marker `<dir>/<id>.task` and keeps overwriting `<dir>/<id>.out` with its
//! latest [`TaskMessage`]. Readers poll the status file, so the job and the
//! browser do not need to share anything but the directory.
//!
//! Both files are replaced by rename, so writers and readers serialize on a
//! separate `<dir>/<id>.lock` whose inode never changes.

use crate::crypto::random_hash;
use async_stream::stream;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Polls spent waiting for a task marker to show up
const STARTUP_POLLS: usize = 5;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid task id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Contents of the `.task` marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
    /// User that started the task
    pub uid: u64,
    pub started_at: DateTime<Utc>,
}

/// One status update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    pub task_id: String,
    pub task: String,
    pub message: String,
    pub time: DateTime<Utc>,
    /// Percent, 0..=100
    pub progress: u8,
    pub end: bool,
}

/// Owns the task directory
#[derive(Debug, Clone)]
pub struct TaskManager {
    dir: PathBuf,
    poll_interval: Duration,
}

impl TaskManager {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a new running task
    pub fn create(&self, name: &str, uid: u64) -> Result<Task, TaskError> {
        fs::create_dir_all(&self.dir)?;

        let info = TaskInfo {
            id: random_hash(16),
            name: name.to_string(),
            uid,
            started_at: Utc::now(),
        };
        let task = Task {
            info,
            dir: self.dir.clone(),
        };
        write_locked(&task.marker_path(), &serde_json::to_vec(&task.info)?)?;

        tracing::debug!(task_id = %task.id(), task = name, "Task registered");
        Ok(task)
    }

    pub fn info(&self, id: &str) -> Result<TaskInfo, TaskError> {
        let path = self.path(id, "task")?;
        if !path.exists() {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(serde_json::from_slice(&read_locked(&path)?)?)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.path(id, "task").map(|p| p.exists()).unwrap_or(false)
    }

    /// Latest status, if the task has reported anything yet
    pub fn read_status(&self, id: &str) -> Result<Option<TaskMessage>, TaskError> {
        let path = self.path(id, "out")?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = read_locked(&path)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Poll a task until it ends.
    ///
    /// Waits a few intervals for the task to start, yields each status
    /// change while it runs, then yields the final message and removes the
    /// status file.
    pub fn track_status(&self, id: &str) -> impl Stream<Item = TaskMessage> + Send + 'static {
        let manager = self.clone();
        let id = id.to_string();

        stream! {
            let mut waited = 0;
            loop {
                let (running, status) = manager.poll(&id).await;
                if running || status.is_some() || waited >= STARTUP_POLLS {
                    break;
                }
                waited += 1;
                tokio::time::sleep(manager.poll_interval).await;
            }

            let mut last: Option<TaskMessage> = None;
            loop {
                let (running, status) = manager.poll(&id).await;
                if let Some(message) = status {
                    if last.as_ref() != Some(&message) {
                        last = Some(message.clone());
                        yield message;
                    }
                }
                if !running {
                    break;
                }
                tokio::time::sleep(manager.poll_interval).await;
            }

            if last.is_some() {
                for ext in ["out", "lock"] {
                    let Ok(path) = manager.path(&id, ext) else { continue };
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::debug!(task_id = %id, error = %e, "Could not remove task file");
                    }
                }
            }
        }
    }

    /// Whether the task still runs, and its latest status. The marker is
    /// checked first: `end` writes the final status before dropping it.
    async fn poll(&self, id: &str) -> (bool, Option<TaskMessage>) {
        let manager = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            (manager.is_running(&id), manager.read_status(&id).ok().flatten())
        })
        .await
        .unwrap_or((false, None))
    }

    /// Ids are our own hex strings; anything else could escape the directory
    fn path(&self, id: &str, ext: &str) -> Result<PathBuf, TaskError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TaskError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", id, ext)))
    }
}

/// Handle held by the job doing the work
#[derive(Debug)]
pub struct Task {
    info: TaskInfo,
    dir: PathBuf,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(format!("{}.task", self.info.id))
    }

    fn status_path(&self) -> PathBuf {
        self.dir.join(format!("{}.out", self.info.id))
    }

    fn message(&self, message: &str, progress: u8, end: bool) -> TaskMessage {
        TaskMessage {
            task_id: self.info.id.clone(),
            task: self.info.name.clone(),
            message: message.to_string(),
            time: Utc::now(),
            progress: progress.min(100),
            end,
        }
    }

    pub fn write_status(&self, message: &str, progress: u8) -> Result<(), TaskError> {
        let message = self.message(message, progress, false);
        write_locked(&self.status_path(), &serde_json::to_vec(&message)?)
    }

    /// Report `(done, total)` as a percentage
    pub fn write_progress(&self, message: &str, done: usize, total: usize) -> Result<(), TaskError> {
        let percent = if total == 0 { 100 } else { done * 100 / total };
        self.write_status(message, u8::try_from(percent.min(100)).unwrap_or(100))
    }

    /// Write the final message and drop the marker
    pub fn end(self, message: &str) -> Result<(), TaskError> {
        let message = self.message(message, 100, true);
        write_locked(&self.status_path(), &serde_json::to_vec(&message)?)?;
        fs::remove_file(self.marker_path())?;
        tracing::debug!(task_id = %self.info.id, task = %self.info.name, "Task ended");
        Ok(())
    }
}

/// `<id>.task` and `<id>.out` share `<id>.lock`
fn open_lock(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
}

/// Replace `path` through its own temp file while holding the task lock
fn write_locked(path: &Path, bytes: &[u8]) -> Result<(), TaskError> {
    let lock = open_lock(path)?;
    lock.lock_exclusive()?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }

    lock.unlock()?;
    Ok(result?)
}

fn read_locked(path: &Path) -> Result<Vec<u8>, TaskError> {
    let lock = open_lock(path)?;
    lock.lock_shared()?;
    let result = fs::read(path);
    lock.unlock()?;
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn manager(dir: &Path) -> TaskManager {
        TaskManager::new(dir, Duration::from_millis(10))
    }

    #[test]
    fn test_create_registers_marker() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let task = manager.create("masterpass", 1).unwrap();
        assert_eq!(task.id().len(), 32);
        assert!(manager.is_running(task.id()));

        let info = manager.info(task.id()).unwrap();
        assert_eq!(info.name, "masterpass");
        assert_eq!(info.uid, 1);
        assert_eq!(manager.read_status(task.id()).unwrap(), None);
    }

    #[test]
    fn test_status_overwrites_and_end_stops() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let task = manager.create("export", 1).unwrap();
        let id = task.id().to_string();

        task.write_status("first", 10).unwrap();
        task.write_progress("second", 1, 4).unwrap();
        let status = manager.read_status(&id).unwrap().unwrap();
        assert_eq!(status.message, "second");
        assert_eq!(status.progress, 25);
        assert!(!status.end);

        task.end("done").unwrap();
        assert!(!manager.is_running(&id));
        let status = manager.read_status(&id).unwrap().unwrap();
        assert!(status.end);
        assert_eq!(status.progress, 100);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        assert!(matches!(
            manager.read_status("../etc/passwd"),
            Err(TaskError::InvalidId(_))
        ));
        assert!(!manager.is_running("../x"));
    }

    #[tokio::test]
    async fn test_track_status_follows_task_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let task = manager.create("masterpass", 1).unwrap();
        let id = task.id().to_string();
        task.write_status("working", 50).unwrap();

        let worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            task.end("finished").unwrap();
        });

        let messages: Vec<TaskMessage> = manager.track_status(&id).collect().await;
        worker.await.unwrap();

        assert_eq!(messages.first().map(|m| m.message.as_str()), Some("working"));
        let last = messages.last().unwrap();
        assert!(last.end);
        assert_eq!(last.message, "finished");
        assert!(!dir.path().join(format!("{}.out", id)).exists());
        assert!(!dir.path().join(format!("{}.lock", id)).exists());
    }

    #[tokio::test]
    async fn test_track_status_gives_up_on_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let messages: Vec<TaskMessage> = manager.track_status("abcdef").collect().await;
        assert!(messages.is_empty());
    }

    #[test]
    fn test_concurrent_status_writes_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let task = manager.create("export", 1).unwrap();
        let id = task.id().to_string();
        task.write_status("start", 0).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..100u8 {
                    task.write_status(&format!("step {}", i), i).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..100 {
                    assert_eq!(manager.info(&id).unwrap().name, "export");
                    assert!(manager.read_status(&id).unwrap().is_some());
                }
            });
        });

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![format!("{}.lock", id), format!("{}.out", id), format!("{}.task", id)]
        );
    }
}
