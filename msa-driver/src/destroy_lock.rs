//! Cross-process destroy lock.
//!
//! Multiple engine instances may apply plans against the same array at
//! once, and the array's error text for colliding destroys is not reliably
//! retry-classifiable, so destructive operations are serialized through a
//! filesystem mutex: an exclusively-created lock directory with an owner
//! file recording who holds it and since when. A lock whose owner process
//! is gone, or whose directory has outlived the wait ceiling, is reclaimed.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{DriverError, Result};
use crate::wait;

pub const ENV_LOCK_DIR: &str = "MSA_DESTROY_LOCK_DIR";
pub const ENV_LOCK_WAIT_SECONDS: &str = "MSA_DESTROY_LOCK_WAIT_SECONDS";

const DEFAULT_LOCK_DIR: &str = "/tmp/msa-destroy-global.lock.d";
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const OWNER_FILE_NAME: &str = "owner";

#[derive(Debug, Clone)]
pub struct DestroyLockOptions {
    pub dir: PathBuf,
    /// Ceiling on how long acquisition may wait; doubles as the age after
    /// which an orphaned lock directory is considered stale.
    pub wait: Duration,
}

impl Default for DestroyLockOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOCK_DIR),
            wait: DEFAULT_LOCK_WAIT,
        }
    }
}

impl DestroyLockOptions {
    /// Reads the optional environment knobs, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();

        if let Ok(dir) = std::env::var(ENV_LOCK_DIR) {
            let dir = dir.trim();
            if !dir.is_empty() {
                options.dir = PathBuf::from(dir);
            }
        }

        if let Ok(raw) = std::env::var(ENV_LOCK_WAIT_SECONDS) {
            let raw = raw.trim();
            if !raw.is_empty() {
                let seconds: u64 = raw.parse().map_err(|_| invalid_wait(raw))?;
                if seconds < 1 {
                    return Err(invalid_wait(raw));
                }
                options.wait = Duration::from_secs(seconds);
            }
        }

        Ok(options)
    }
}

fn invalid_wait(raw: &str) -> DriverError {
    DriverError::Validation(format!(
        "invalid {ENV_LOCK_WAIT_SECONDS}={raw:?} (must be integer >= 1)"
    ))
}

/// A held destroy lock. Dropping it releases best-effort; call
/// [`DestroyLock::release`] to observe failures.
#[derive(Debug)]
pub struct DestroyLock {
    dir: PathBuf,
    owner_file: PathBuf,
    owner: String,
    released: bool,
}

#[derive(Debug, Default)]
struct OwnerMetadata {
    owner: String,
    pid: Option<i32>,
}

impl DestroyLock {
    /// Acquires the lock, polling once per second until the wait ceiling.
    pub async fn acquire(
        cancel: &CancellationToken,
        owner: &str,
        options: &DestroyLockOptions,
    ) -> Result<DestroyLock> {
        let dir = &options.dir;
        if dir.as_os_str().is_empty() {
            return Err(DriverError::Lock("lock directory is empty".to_string()));
        }
        if options.wait < Duration::from_secs(1) {
            return Err(DriverError::Lock(format!(
                "lock wait must be at least 1s (got {:?})",
                options.wait
            )));
        }

        let owner = match owner.trim() {
            "" => "unknown".to_string(),
            trimmed => trimmed.to_string(),
        };

        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                DriverError::Lock(format!("prepare lock parent directory: {err}"))
            })?;
        }

        let deadline = Instant::now() + options.wait;
        loop {
            match std::fs::create_dir(dir) {
                Ok(()) => {
                    let lock = DestroyLock {
                        dir: dir.clone(),
                        owner_file: dir.join(OWNER_FILE_NAME),
                        owner,
                        released: false,
                    };
                    lock.write_owner_file();
                    info!(
                        lock_dir = %lock.dir.display(),
                        lock_owner = %lock.owner,
                        "acquired destroy lock"
                    );
                    return Ok(lock);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => {
                    return Err(DriverError::Lock(format!(
                        "create lock directory {:?}: {err}",
                        dir.display()
                    )));
                }
            }

            if try_reap_stale_lock(dir, options.wait)? {
                continue;
            }

            if Instant::now() > deadline {
                return Err(DriverError::Lock(format!(
                    "timeout acquiring destroy lock {:?} for owner {owner:?} after {:?}",
                    dir.display(),
                    options.wait
                )));
            }

            wait::sleep(cancel, POLL_INTERVAL).await?;
        }
    }

    fn write_owner_file(&self) {
        let contents = format!(
            "owner={}\nacquired_at={}\npid={}\n",
            self.owner,
            humantime::format_rfc3339_seconds(SystemTime::now()),
            std::process::id(),
        );
        // The lock is the directory itself; the owner file is diagnostics
        // plus staleness metadata, so a write failure is not fatal.
        if let Err(err) = std::fs::write(&self.owner_file, contents) {
            warn!(
                owner_file = %self.owner_file.display(),
                error = %err,
                "failed to write destroy lock owner file"
            );
        }
    }

    /// Removes the owner file, then the directory. Both steps tolerate the
    /// path already being gone, so release is idempotent.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        remove_ignoring_missing(std::fs::remove_file(&self.owner_file)).map_err(|err| {
            DriverError::Lock(format!(
                "remove lock owner file {:?}: {err}",
                self.owner_file.display()
            ))
        })?;
        remove_ignoring_missing(std::fs::remove_dir(&self.dir)).map_err(|err| {
            DriverError::Lock(format!(
                "remove lock directory {:?}: {err}",
                self.dir.display()
            ))
        })?;

        info!(
            lock_dir = %self.dir.display(),
            lock_owner = %self.owner,
            "released destroy lock"
        );
        Ok(())
    }
}

impl Drop for DestroyLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.release_inner() {
                warn!(error = %err, "destroy lock release on drop failed");
            }
        }
    }
}

fn remove_ignoring_missing(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Reclaims the lock directory when its owner is provably gone: the
/// recorded pid no longer accepts signal 0, or the directory has outlived
/// the wait ceiling with no live owner. Returns `true` when the caller
/// should immediately retry acquisition.
fn try_reap_stale_lock(dir: &Path, wait: Duration) -> Result<bool> {
    let metadata = match std::fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(DriverError::Lock(format!(
                "stat lock directory {:?}: {err}",
                dir.display()
            )))
        }
    };

    let owner_file = dir.join(OWNER_FILE_NAME);
    let owner = read_owner_metadata(&owner_file);

    let mut reasons = Vec::with_capacity(2);
    let mut owner_alive = false;
    if let Some(pid) = owner.pid {
        if process_exists(pid) {
            owner_alive = true;
        } else {
            reasons.push(format!("dead_pid={pid}"));
        }
    }

    if !owner_alive {
        if let Ok(modified) = metadata.modified() {
            if let Ok(age) = modified.elapsed() {
                if age >= wait {
                    reasons.push(format!("age={}s", age.as_secs()));
                }
            }
        }
    }

    if reasons.is_empty() {
        return Ok(false);
    }

    let _ = std::fs::remove_file(&owner_file);
    match std::fs::remove_dir(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        // Another process repopulated the directory between our two
        // removals; treat the lock as live again.
        Err(_) => return Ok(false),
    }

    warn!(
        lock_dir = %dir.display(),
        lock_owner = %owner.owner,
        reasons = %reasons.join(","),
        "reclaimed stale destroy lock"
    );
    Ok(true)
}

fn read_owner_metadata(owner_file: &Path) -> OwnerMetadata {
    let Ok(data) = std::fs::read_to_string(owner_file) else {
        return OwnerMetadata::default();
    };

    let mut metadata = OwnerMetadata::default();
    for line in data.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "owner" => metadata.owner = value.trim().to_string(),
            "pid" => metadata.pid = value.trim().parse().ok(),
            _ => {}
        }
    }
    metadata
}

#[cfg(unix)]
fn process_exists(pid: i32) -> bool {
    if pid < 1 {
        return false;
    }
    // Signal 0 probes for existence; EPERM still means the process is there.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_exists(_pid: i32) -> bool {
    // No portable liveness probe; rely on the age check alone.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(root: &Path, wait: Duration) -> DestroyLockOptions {
        DestroyLockOptions {
            dir: root.join("destroy.lock.d"),
            wait,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let lock = DestroyLock::acquire(&cancel, "test-owner", &options)
            .await
            .unwrap();
        assert!(options.dir.is_dir());

        let owner_contents =
            std::fs::read_to_string(options.dir.join(OWNER_FILE_NAME)).unwrap();
        assert!(owner_contents.contains("owner=test-owner"));
        assert!(owner_contents.contains(&format!("pid={}", std::process::id())));

        lock.release().unwrap();
        assert!(!options.dir.exists());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_against_missing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let lock = DestroyLock::acquire(&cancel, "test-owner", &options)
            .await
            .unwrap();
        std::fs::remove_file(options.dir.join(OWNER_FILE_NAME)).unwrap();
        std::fs::remove_dir(&options.dir).unwrap();
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        {
            let _lock = DestroyLock::acquire(&cancel, "test-owner", &options)
                .await
                .unwrap();
            assert!(options.dir.is_dir());
        }
        assert!(!options.dir.exists());
    }

    #[tokio::test]
    async fn test_contention_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path(), Duration::from_secs(1));
        let cancel = CancellationToken::new();

        // A live holder: our own pid, fresh directory.
        let _held = DestroyLock::acquire(&cancel, "holder", &options)
            .await
            .unwrap();

        let result = DestroyLock::acquire(&cancel, "second", &options).await;
        match result {
            Err(DriverError::Lock(message)) => assert!(message.contains("timeout")),
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_lock_with_dead_pid_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        // Forge a lock held by a pid that cannot exist.
        std::fs::create_dir(&options.dir).unwrap();
        std::fs::write(
            options.dir.join(OWNER_FILE_NAME),
            "owner=ghost\nacquired_at=2020-01-01T00:00:00Z\npid=999999999\n",
        )
        .unwrap();

        let lock = DestroyLock::acquire(&cancel, "reclaimer", &options)
            .await
            .unwrap();
        let owner_contents =
            std::fs::read_to_string(options.dir.join(OWNER_FILE_NAME)).unwrap();
        assert!(owner_contents.contains("owner=reclaimer"));
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_waiting() {
        let tmp = tempfile::tempdir().unwrap();
        let options = options(tmp.path(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let _held = DestroyLock::acquire(&cancel, "holder", &options)
            .await
            .unwrap();

        let waiting_cancel = cancel.child_token();
        waiting_cancel.cancel();
        let result = DestroyLock::acquire(&waiting_cancel, "second", &options).await;
        assert!(matches!(result, Err(DriverError::Interrupted)));
    }

    #[test]
    fn test_from_env_validation() {
        // Note: mutating the process environment is avoided; only the
        // default path is exercised here.
        let options = DestroyLockOptions::default();
        assert_eq!(options.wait, DEFAULT_LOCK_WAIT);
        assert_eq!(options.dir, PathBuf::from(DEFAULT_LOCK_DIR));
    }
}
