// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block device capacity and the size checks run before installing.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use installer_common::ErrorKind;
use slog::Logger;

use crate::cmd::{Command, ExecutionError};

/// Installs are refused on disks smaller than this.
pub const HARD_MIN_DISK_SIZE_GIB: u64 = 60;

/// Disks smaller than this get a warning, and a smaller persistent partition.
pub const SOFT_MIN_DISK_SIZE_GIB: u64 = 140;

/// The largest disk an MBR partition table can address: (2^32 - 1) sectors
/// of 512 bytes.
pub const MBR_MAX_DISK_SIZE_BYTES: u64 = 2_199_023_255_040;

pub const LSBLK: &str = "/usr/bin/lsblk";

#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    #[error("failed to query size of {device}")]
    Query {
        device: Utf8PathBuf,
        #[source]
        err: ExecutionError,
    },

    #[error("unexpected size {output:?} reported for {device}")]
    BadSize { device: Utf8PathBuf, output: String },

    #[error("Disk size too small. Minimum {min_gib}GB is required")]
    TooSmall { size_gib: u64, min_gib: u64 },

    #[error("Disk size smaller than recommended size {min_gib}GB")]
    SmallerThanRecommended { size_gib: u64, min_gib: u64 },
}

impl DiskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiskError::Query { .. } => ErrorKind::Process,
            DiskError::BadSize { .. } => ErrorKind::Parse,
            DiskError::TooSmall { .. }
            | DiskError::SmallerThanRecommended { .. } => ErrorKind::Validation,
        }
    }
}

/// Reports the capacity of a block device.
#[async_trait]
pub trait DiskSizeProbe: Send + Sync {
    async fn size_bytes(&self, device: &Utf8Path) -> Result<u64, DiskError>;
}

/// Reads device sizes with `lsblk`.
#[derive(Clone, Debug)]
pub struct LsblkProbe {
    log: Logger,
    lsblk: Utf8PathBuf,
}

impl LsblkProbe {
    pub fn new(log: &Logger) -> Self {
        Self::with_binary(log, LSBLK)
    }

    pub fn with_binary(log: &Logger, lsblk: impl Into<Utf8PathBuf>) -> Self {
        Self {
            log: log.new(slog::o!("component" => "LsblkProbe")),
            lsblk: lsblk.into(),
        }
    }
}

#[async_trait]
impl DiskSizeProbe for LsblkProbe {
    async fn size_bytes(&self, device: &Utf8Path) -> Result<u64, DiskError> {
        let output = Command::new(&self.lsblk)
            .arg(device)
            .args(["-n", "-b", "-d", "-r", "-o", "SIZE"])
            .ensure_stdout(&self.log)
            .await
            .map_err(|err| DiskError::Query { device: device.to_owned(), err })?;
        parse_lsblk_size(device, &output)
    }
}

fn parse_lsblk_size(device: &Utf8Path, output: &str) -> Result<u64, DiskError> {
    output.trim().parse().map_err(|_| DiskError::BadSize {
        device: device.to_owned(),
        output: output.to_owned(),
    })
}

/// Whole GiB in `bytes`, rounded down.
pub fn bytes_to_gib(bytes: u64) -> u64 {
    bytes >> 30
}

/// Refuse devices below [`HARD_MIN_DISK_SIZE_GIB`].
pub async fn validate_disk_size(
    probe: &dyn DiskSizeProbe,
    device: &Utf8Path,
) -> Result<(), DiskError> {
    let size_gib = bytes_to_gib(probe.size_bytes(device).await?);
    if size_gib < HARD_MIN_DISK_SIZE_GIB {
        return Err(DiskError::TooSmall {
            size_gib,
            min_gib: HARD_MIN_DISK_SIZE_GIB,
        });
    }
    Ok(())
}

/// Flag devices below [`SOFT_MIN_DISK_SIZE_GIB`]. Callers show this as a
/// warning and let the operator continue.
pub async fn validate_disk_size_soft(
    probe: &dyn DiskSizeProbe,
    device: &Utf8Path,
) -> Result<(), DiskError> {
    let size_gib = bytes_to_gib(probe.size_bytes(device).await?);
    if size_gib < SOFT_MIN_DISK_SIZE_GIB {
        return Err(DiskError::SmallerThanRecommended {
            size_gib,
            min_gib: SOFT_MIN_DISK_SIZE_GIB,
        });
    }
    Ok(())
}

/// True if the device is too large to be fully addressed by an MBR
/// partition table.
pub async fn disk_exceeds_mbr_limit(
    probe: &dyn DiskSizeProbe,
    device: &Utf8Path,
) -> Result<bool, DiskError> {
    Ok(probe.size_bytes(device).await? > MBR_MAX_DISK_SIZE_BYTES)
}
