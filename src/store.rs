//! Filesystem-backed failover overlay and snapshot cache.
//!
//! Both roots share the `{tenant}/{group}/{dataId}` layout. The failover
//! root is provisioned by operators and never written by the client; the
//! snapshot root is written through on every successful fetch. Snapshot
//! writes go to a temp file and are renamed into place, so a concurrent
//! reader in the same process observes either the old or the new value,
//! never a torn one.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::process;

use tracing::debug;
use tracing::warn;

use crate::key::ConfigKey;

pub(crate) struct LocalStore {
    failover_base: PathBuf,
    snapshot_base: PathBuf,
}

impl LocalStore {
    pub(crate) fn new(
        failover_base: PathBuf,
        snapshot_base: PathBuf,
    ) -> Self {
        Self {
            failover_base,
            snapshot_base,
        }
    }

    /// Reads the failover overlay. Never falls through to the snapshot.
    pub(crate) fn read_failover(
        &self,
        key: &ConfigKey,
    ) -> Option<String> {
        read_entry(&self.failover_base, key)
    }

    pub(crate) fn read_snapshot(
        &self,
        key: &ConfigKey,
    ) -> Option<String> {
        read_entry(&self.snapshot_base, key)
    }

    /// Writes a snapshot record atomically.
    ///
    /// Failures are logged and swallowed: a cache write must never fail
    /// the fetch that produced the content.
    pub(crate) fn write_snapshot(
        &self,
        key: &ConfigKey,
        content: &str,
    ) {
        let path = self.snapshot_base.join(key.relative_path());
        if let Err(e) = write_atomic(&path, content) {
            warn!("snapshot write failed for {}: {}", key, e);
        }
    }

    /// Removes a snapshot record. Absence is not an error.
    pub(crate) fn delete_snapshot(
        &self,
        key: &ConfigKey,
    ) {
        let path = self.snapshot_base.join(key.relative_path());
        match fs::remove_file(&path) {
            Ok(()) => debug!("snapshot removed for {}", key),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("snapshot delete failed for {}: {}", key, e),
        }
    }
}

fn read_entry(
    base: &Path,
    key: &ConfigKey,
) -> Option<String> {
    let path = base.join(key.relative_path());
    match fs::read(&path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("local record for {} is not valid UTF-8: {}", key, e);
                None
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("local read failed at {}: {}", path.display(), e);
            None
        }
    }
}

fn write_atomic(
    path: &Path,
    content: &str,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Temp name is process-unique; rename makes the swap atomic.
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".tmp.{}", process::id()));
    let tmp = PathBuf::from(tmp_name);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
