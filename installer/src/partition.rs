// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sizing the persistent partition and planning the partition layout.

use camino::Utf8Path;
use installer_common::{
    DATA_FS_LABEL, ErrorKind, OEM_PARTITION_SIZE_MIB, PERSISTENT_FS_LABEL,
    Partition, PartitionLayoutDocument, RECOVERY_PARTITION_SIZE_MIB,
    STATE_PARTITION_SIZE_MIB,
};
use slog::{Logger, info};

use crate::disk::{
    DiskError, DiskSizeProbe, HARD_MIN_DISK_SIZE_GIB, SOFT_MIN_DISK_SIZE_GIB,
    bytes_to_gib,
};
use crate::staging::{StageError, StagedFile, stage_yaml};

/// Persistent partition size on the smallest supported disk.
const MIN_PERSISTENT_SIZE_GIB: u64 = 25;
/// Persistent partition size on a disk of [`SOFT_MIN_DISK_SIZE_GIB`].
const RECOMMENDED_PERSISTENT_SIZE_GIB: u64 = 50;
const MAX_PERSISTENT_SIZE_GIB: u64 = 100;

/// Prefix of the staged layout file.
pub const LAYOUT_FILE_PREFIX: &str = "partition-layout";

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("Disk size is too small. Minimum {HARD_MIN_DISK_SIZE_GIB}Gi is required")]
    DiskTooSmall { size_gib: u64 },

    #[error(transparent)]
    Disk(#[from] DiskError),

    #[error("failed to stage partition layout")]
    Stage(#[from] StageError),
}

impl PartitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PartitionError::DiskTooSmall { .. } => ErrorKind::Validation,
            PartitionError::Disk(err) => err.kind(),
            PartitionError::Stage(err) => err.kind(),
        }
    }
}

/// Size in GiB of the persistent partition for a disk of `disk_gib` GiB.
///
/// Between the hard and soft minimums the size grows linearly from 25 to 50
/// GiB. Above that it grows by 10 GiB for each full 100 GiB past the first
/// 100 GiB, capped at 100 GiB.
pub fn persistent_partition_size_gib(
    disk_gib: u64,
) -> Result<u64, PartitionError> {
    if disk_gib < HARD_MIN_DISK_SIZE_GIB {
        return Err(PartitionError::DiskTooSmall { size_gib: disk_gib });
    }
    if disk_gib < SOFT_MIN_DISK_SIZE_GIB {
        let span = RECOMMENDED_PERSISTENT_SIZE_GIB - MIN_PERSISTENT_SIZE_GIB;
        let offset = (disk_gib - HARD_MIN_DISK_SIZE_GIB) * span
            / (SOFT_MIN_DISK_SIZE_GIB - HARD_MIN_DISK_SIZE_GIB);
        return Ok(MIN_PERSISTENT_SIZE_GIB + offset);
    }
    let size = 50 + (disk_gib - 100) / 100 * 10;
    Ok(size.min(MAX_PERSISTENT_SIZE_GIB))
}

/// The layout for `device` given its size in bytes.
///
/// OEM, state and recovery get fixed sizes, the persistent partition is
/// sized by [`persistent_partition_size_gib`] and the data partition takes
/// whatever is left.
pub fn plan_partition_layout(
    device: &Utf8Path,
    disk_size_bytes: u64,
) -> Result<PartitionLayoutDocument, PartitionError> {
    let persistent_gib =
        persistent_partition_size_gib(bytes_to_gib(disk_size_bytes))?;
    Ok(PartitionLayoutDocument::new(
        device,
        vec![
            Partition::ext4("COS_OEM", "oem", OEM_PARTITION_SIZE_MIB),
            Partition::ext4("COS_STATE", "state", STATE_PARTITION_SIZE_MIB),
            Partition::ext4(
                "COS_RECOVERY",
                "recovery",
                RECOVERY_PARTITION_SIZE_MIB,
            ),
            Partition::ext4(
                PERSISTENT_FS_LABEL,
                "persistent",
                persistent_gib << 10,
            ),
            Partition::ext4(DATA_FS_LABEL, "longhorn", 0),
        ],
    ))
}

/// Probe `device`, plan its layout, and stage the layout document in
/// `staging_dir`.
pub async fn build_partition_layout(
    log: &Logger,
    probe: &dyn DiskSizeProbe,
    device: &Utf8Path,
    staging_dir: &Utf8Path,
) -> Result<StagedFile, PartitionError> {
    let size_bytes = probe.size_bytes(device).await?;
    let layout = plan_partition_layout(device, size_bytes)?;
    let staged = stage_yaml(staging_dir, LAYOUT_FILE_PREFIX, &layout)?;
    info!(
        log, "staged partition layout";
        "device" => %device,
        "disk_gib" => bytes_to_gib(size_bytes),
        "path" => %staged.path(),
    );
    Ok(staged)
}
