// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The declarative partition layout document read by the install executable
//! (through `COS_PARTITION_LAYOUT`).

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

pub const OEM_PARTITION_SIZE_MIB: u64 = 50;
pub const STATE_PARTITION_SIZE_MIB: u64 = 15360;
pub const RECOVERY_PARTITION_SIZE_MIB: u64 = 8192;

/// Filesystem label of the persistent partition.
pub const PERSISTENT_FS_LABEL: &str = "COS_PERSISTENT";

/// Filesystem label of the partition that takes the remainder of the disk.
pub const DATA_FS_LABEL: &str = "HARV_LH_DEFAULT";

pub const PARTITION_FILESYSTEM: &str = "ext4";

/// Name of the single partitioning step in a layout document.
pub const LAYOUT_STEP_NAME: &str = "Part layout";

/// A layout document: one `partitioning` stage that adds partitions to a
/// device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayoutDocument {
    pub stages: LayoutStages,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutStages {
    pub partitioning: Vec<PartitioningStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitioningStep {
    pub name: String,
    pub layout: Layout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub device: LayoutDevice,
    pub add_partitions: Vec<Partition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDevice {
    pub path: Utf8PathBuf,
}

/// One partition to create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(rename = "fsLabel")]
    pub fs_label: String,

    #[serde(rename = "pLabel")]
    pub p_label: String,

    /// Size in MiB. Zero means "the rest of the disk" and is left out of the
    /// serialized document.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,

    pub filesystem: String,
}

fn is_zero(size: &u64) -> bool {
    *size == 0
}

impl Partition {
    pub fn ext4(fs_label: &str, p_label: &str, size_mib: u64) -> Self {
        Self {
            fs_label: fs_label.to_owned(),
            p_label: p_label.to_owned(),
            size: size_mib,
            filesystem: PARTITION_FILESYSTEM.to_owned(),
        }
    }

    /// True if this partition consumes whatever space is left on the device.
    pub fn takes_rest(&self) -> bool {
        self.size == 0
    }
}

impl PartitionLayoutDocument {
    /// A document with a single partitioning step for `device`.
    pub fn new(device: &Utf8Path, partitions: Vec<Partition>) -> Self {
        Self {
            stages: LayoutStages {
                partitioning: vec![PartitioningStep {
                    name: LAYOUT_STEP_NAME.to_owned(),
                    layout: Layout {
                        device: LayoutDevice { path: device.to_owned() },
                        add_partitions: partitions,
                    },
                }],
            },
        }
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(data)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// All partitions across every partitioning step, in order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.stages
            .partitioning
            .iter()
            .flat_map(|step| step.layout.add_partitions.iter())
    }

    pub fn partition_by_fs_label(&self, fs_label: &str) -> Option<&Partition> {
        self.partitions().find(|p| p.fs_label == fs_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_partition_omits_size() {
        let doc = PartitionLayoutDocument::new(
            Utf8Path::new("/dev/vda"),
            vec![
                Partition::ext4("COS_OEM", "oem", OEM_PARTITION_SIZE_MIB),
                Partition::ext4(DATA_FS_LABEL, "longhorn", 0),
            ],
        );
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("fsLabel: COS_OEM"), "{yaml}");
        assert!(yaml.contains("size: 50"), "{yaml}");
        assert_eq!(yaml.matches("size:").count(), 1, "{yaml}");
        assert!(yaml.contains("path: /dev/vda"), "{yaml}");

        let parsed = PartitionLayoutDocument::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(parsed, doc);
        assert!(parsed.partition_by_fs_label(DATA_FS_LABEL).unwrap().takes_rest());
    }
}
