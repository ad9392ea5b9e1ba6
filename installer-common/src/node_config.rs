// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The slice of the node configuration schema that the installer reads and
//! writes.
//!
//! The full schema is owned by the configuration loader. Keys this crate does
//! not model are carried through `extra` so that staging a config for the
//! install executable never drops anything the operator set.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of the environment variables derived from [`InstallConfig`].
pub const INSTALL_ENV_PREFIX: &str = "COS_INSTALL_";

/// A node configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default)]
    pub install: InstallConfig,

    /// Skip creating the data partition; the persistent partition then takes
    /// the rest of the disk.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_data_partition: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// The `install` section of a [`NodeConfig`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,

    /// Block device the OS is installed onto, e.g. `/dev/sda`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Utf8PathBuf>,

    /// Where the OS layer reads its configuration from. The installer points
    /// this at the staged OS config file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iso_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tty: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_disk: String,

    #[serde(default)]
    pub silent: bool,

    #[serde(default)]
    pub power_off: bool,

    #[serde(default)]
    pub no_format: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub force_efi: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl NodeConfig {
    /// Parse a node configuration document. An empty document yields the
    /// default configuration.
    pub fn from_yaml(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(data)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Environment variables consumed by the install executable.
    ///
    /// Strings are only exported when set; flags are always exported as
    /// `true` or `false`.
    pub fn to_install_env(&self) -> Vec<(String, String)> {
        let install = &self.install;
        let mut env = Vec::new();
        let mut push = |name: &str, value: String| {
            env.push((format!("{INSTALL_ENV_PREFIX}{name}"), value));
        };

        let strings = [
            ("MODE", install.mode.as_str()),
            ("DEVICE", install.device.as_ref().map_or("", |d| d.as_str())),
            ("CONFIG_URL", install.config_url.as_str()),
            ("ISO_URL", install.iso_url.as_str()),
            ("TTY", install.tty.as_str()),
            ("DATA_DISK", install.data_disk.as_str()),
        ];
        for (name, value) in strings {
            if !value.is_empty() {
                push(name, value.to_owned());
            }
        }

        let flags = [
            ("SILENT", install.silent),
            ("POWER_OFF", install.power_off),
            ("NO_FORMAT", install.no_format),
            ("DEBUG", install.debug),
            ("FORCE_EFI", install.force_efi),
        ];
        for (name, value) in flags {
            push(name, value.to_string());
        }

        env
    }
}

/// The OS-layer configuration. The installer never looks inside it; it is
/// staged verbatim for the install executable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OsConfig(pub serde_yaml::Value);

impl Default for OsConfig {
    fn default() -> Self {
        OsConfig(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()))
    }
}

impl OsConfig {
    pub fn from_yaml(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(data).map(OsConfig)
    }
}
