//! Persisted log mirror.
//!
//! A scoped-write sink for the raw log text received over the protocol:
//! open in append or truncate mode, write, and close on scope exit. An
//! advisory lock guards against a concurrent reader holding the file;
//! transient sharing violations retry with backoff before surfacing.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::time::{Duration, sleep};

/// How the mirror file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Append to the existing mirror (log update).
    Append,
    /// Replace the mirror contents (log restart).
    Truncate,
}

/// Retry attempts for a transient sharing violation.
const LOCK_ATTEMPTS: u32 = 5;
/// Initial backoff; doubles per attempt.
const LOCK_BACKOFF: Duration = Duration::from_millis(50);

/// A mirror of one client's log on local disk.
#[derive(Debug, Clone)]
pub struct LogMirror {
    path: PathBuf,
}

impl LogMirror {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes text to the mirror under an exclusive advisory lock.
    ///
    /// The file is closed (and the lock released) when the write scope
    /// ends, success or failure.
    pub async fn write(&self, text: &str, mode: WriteMode) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut backoff = LOCK_BACKOFF;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut options = OpenOptions::new();
            options.create(true).write(true);
            match mode {
                WriteMode::Append => options.append(true),
                WriteMode::Truncate => options.truncate(true),
            };
            let mut file = options.open(&self.path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let result = file.write_all(text.as_bytes()).and_then(|()| file.flush());
                    let _ = fs2::FileExt::unlock(&file);
                    return result;
                }
                Err(error) if attempt < LOCK_ATTEMPTS => {
                    tracing::debug!(
                        path = %self.path.display(),
                        attempt,
                        error = %error,
                        "mirror locked, retrying"
                    );
                    drop(file);
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_truncate() {
        let temp = tempfile::tempdir().unwrap();
        let mirror = LogMirror::new(temp.path().join("rig-a.log"));

        mirror.write("first\n", WriteMode::Append).await.unwrap();
        mirror.write("second\n", WriteMode::Append).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(mirror.path()).unwrap(),
            "first\nsecond\n"
        );

        mirror.write("restarted\n", WriteMode::Truncate).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(mirror.path()).unwrap(),
            "restarted\n"
        );
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let temp = tempfile::tempdir().unwrap();
        let mirror = LogMirror::new(temp.path().join("logs").join("nested").join("rig-a.log"));

        mirror.write("line\n", WriteMode::Append).await.unwrap();
        assert!(mirror.path().exists());
    }

    #[tokio::test]
    async fn lock_released_after_write() {
        let temp = tempfile::tempdir().unwrap();
        let mirror = LogMirror::new(temp.path().join("rig-a.log"));

        mirror.write("a\n", WriteMode::Append).await.unwrap();
        // A second writer acquires the lock immediately.
        mirror.write("b\n", WriteMode::Append).await.unwrap();
        assert_eq!(std::fs::read_to_string(mirror.path()).unwrap(), "a\nb\n");
    }
}
