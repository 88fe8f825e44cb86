use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::{debug, warn};

use super::error::Denial;

/// Source of free-space readings for the storage volume.
pub trait DiskSpaceSource: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Reads the disk holding `path` through sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpaceSource for SystemDiskSpace {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let target = path.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted disk contains {}", target.display()),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(Denial),
}

impl Admission {
    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Denied(denial) => Err(denial),
        }
    }
}

#[derive(Debug)]
struct SpaceReading {
    available: u64,
    refreshed_at: Option<Instant>,
}

/// Capacity checks against a cached free-space reading.
///
/// The reading is refreshed at most once per `ttl`. When the underlying query
/// fails the last known value keeps being used, so a broken probe never blocks
/// uploads; before the first successful reading that value is unbounded.
pub struct AdmissionGate {
    path: PathBuf,
    source: Arc<dyn DiskSpaceSource>,
    max_file_size: u64,
    reserved: u64,
    ttl: Duration,
    reading: Mutex<SpaceReading>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("path", &self.path)
            .field("max_file_size", &self.max_file_size)
            .field("reserved", &self.reserved)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl AdmissionGate {
    pub fn new(
        path: impl Into<PathBuf>,
        source: Arc<dyn DiskSpaceSource>,
        max_file_size: u64,
        reserved: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            source,
            max_file_size,
            reserved,
            ttl,
            reading: Mutex::new(SpaceReading {
                available: u64::MAX,
                refreshed_at: None,
            }),
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn check_file_size(&self, requested: u64) -> Admission {
        if requested > self.max_file_size {
            Admission::Denied(Denial::TooLarge {
                requested,
                limit: self.max_file_size,
            })
        } else {
            Admission::Allowed
        }
    }

    /// Uses the cached reading if it is younger than the ttl.
    pub fn check_capacity(&self, required: u64) -> Admission {
        let available = self.available_space(false);
        self.decide(required, available)
    }

    /// Always re-reads free space first; used when a new upload is admitted.
    pub fn check_capacity_fresh(&self, required: u64) -> Admission {
        let available = self.available_space(true);
        self.decide(required, available)
    }

    /// The disk query runs without holding the cache lock; concurrent callers
    /// keep seeing the previous reading until it lands.
    pub fn available_space(&self, force: bool) -> u64 {
        let last = {
            let reading = self.lock_reading();
            let fresh = reading
                .refreshed_at
                .is_some_and(|at| at.elapsed() < self.ttl);
            if fresh && !force {
                return reading.available;
            }
            reading.available
        };

        let queried = match self.source.available_space(&self.path) {
            Ok(available) => {
                debug!(free_bytes = available, "disk space refreshed");
                Some(available)
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    free_bytes = last,
                    "disk space query failed, keeping last reading"
                );
                None
            }
        };

        let mut reading = self.lock_reading();
        if let Some(available) = queried {
            reading.available = available;
        }
        reading.refreshed_at = Some(Instant::now());
        reading.available
    }

    fn lock_reading(&self) -> std::sync::MutexGuard<'_, SpaceReading> {
        self.reading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decide(&self, required: u64, available: u64) -> Admission {
        if available < required.saturating_add(self.reserved) {
            Admission::Denied(Denial::InsufficientSpace {
                requested: required,
                available,
                reserved: self.reserved,
            })
        } else {
            Admission::Allowed
        }
    }
}
