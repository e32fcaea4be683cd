//! Path & I/O utilities: atomic writes, per-file advisory locks, JSON/YAML
//! load-save, UTC timestamps.
//!
//! Uses `fs4`'s async file-locking API since the repository layer is
//! invoked from async facade code.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;

/// Current UTC instant, ISO-8601. All entity timestamps use this.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Writes `contents` to `path` atomically: write to a sibling temp file in
/// the same directory, then rename over the destination. Rename within one
/// filesystem is atomic, so readers never observe a partial write.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    tokio::fs::create_dir_all(dir).await?;

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("entity"),
        uuid::Uuid::new_v4()
    );
    let tmp_path = dir.join(tmp_name);

    let mut file = File::create(&tmp_path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    drop(file);

    match tokio::fs::rename(&tmp_path, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(err)
        }
    }
}

/// Renames a file across directories atomically (used by the repository for
/// `move(kind, id, from_state, to_state)`). Fails if `to` already exists.
pub async fn atomic_move(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(dir) = to.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination already exists: {}", to.display()),
        ));
    }
    tokio::fs::rename(from, to).await
}

/// A held advisory lock on a single file. Released on drop (best-effort) or
/// explicitly via [`FileLock::release`].
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Acquires an exclusive lock on `path`'s sidecar `.lock` file, polling
    /// until acquired or `timeout` elapses. Default timeout
    /// is 10 seconds; pass it explicitly from the config domain.
    pub async fn acquire(path: &Path, timeout: Duration) -> io::Result<Self> {
        let lock_path = sidecar_lock_path(path);
        if let Some(dir) = lock_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => return Err(err),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out acquiring lock on {}", lock_path.display()),
                ));
            }
            sleep(Duration::from_millis(25)).await;
        }

        write_lock_metadata(&file, &lock_path).await.ok();

        Ok(Self {
            file: Some(file),
            path: lock_path,
        })
    }

    /// Releases the lock, removing the sidecar file if this was the last
    /// holder. Safe to call multiple times.
    pub async fn release(mut self) -> io::Result<()> {
        self.release_inner().await
    }

    async fn release_inner(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            AsyncFileExt::unlock(&file).ok();
            drop(file);
            let _ = tokio::fs::remove_file(&self.path).await;
        }
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = AsyncFileExt::unlock(&file);
        }
    }
}

fn sidecar_lock_path(path: &Path) -> PathBuf {
    let mut lock_path = path.to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entity");
    lock_path.set_file_name(format!(".{file_name}.lock"));
    lock_path
}

async fn write_lock_metadata(file: &File, lock_path: &Path) -> io::Result<()> {
    let meta = LockMetadata {
        holder_pid: std::process::id(),
        acquired_at: now(),
    };
    let bytes = serde_json::to_vec(&meta).unwrap_or_default();
    let mut f = file.try_clone().await?;
    f.set_len(0).await?;
    tokio::io::AsyncSeekExt::seek(&mut f, io::SeekFrom::Start(0)).await?;
    f.write_all(&bytes).await?;
    f.flush().await?;
    let _ = lock_path;
    Ok(())
}

/// Metadata persisted inside a lock's sidecar file, used by
/// [`reap_stale`] to decide whether a lock can be reclaimed.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct LockMetadata {
    holder_pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Administrative stale-lock recovery. Removes `path`'s `.lock` file if
/// the holder process is no longer alive and the lock is older than
/// `timeout * 6`.
pub async fn reap_stale(path: &Path, timeout: Duration) -> io::Result<bool> {
    let lock_path = sidecar_lock_path(path);
    let bytes = match tokio::fs::read(&lock_path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    let Ok(meta) = serde_json::from_slice::<LockMetadata>(&bytes) else {
        return Ok(false);
    };

    let age = now().signed_duration_since(meta.acquired_at);
    let stale_after = timeout.saturating_mul(6);
    if age.num_seconds() < 0 || (age.num_seconds() as u64) < stale_after.as_secs() {
        return Ok(false);
    }

    if process_alive(meta.holder_pid) {
        return Ok(false);
    }

    tokio::fs::remove_file(&lock_path).await?;
    Ok(true)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // signal 0 performs no-op delivery; success (or EPERM, meaning the
    // process exists but we lack permission to signal it) implies alive.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Loads and deserializes JSON from `path`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let mut file = File::open(path).await?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).await?;
    serde_json::from_str(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write(path, &bytes).await
}

/// Loads and deserializes YAML from `path`.
pub async fn read_yaml<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let mut file = File::open(path).await?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).await?;
    serde_yaml::from_str(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
