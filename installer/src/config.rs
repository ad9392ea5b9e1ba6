// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Installer configuration

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use installer_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where the installer finds the executables it drives, where it stages
/// files, and how patient it is with the network.
///
/// Every field has a default, so an empty file (or no file at all) gives the
/// stock appliance layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    pub install_executable: Utf8PathBuf,
    pub shutdown_executable: Utf8PathBuf,
    pub upgrade_executable: Utf8PathBuf,
    pub lsblk: Utf8PathBuf,

    /// Directory holding the staged config and layout files.
    pub staging_dir: Utf8PathBuf,

    pub timesyncd_conf: Utf8PathBuf,
    pub network_config: Utf8PathBuf,

    pub http_timeout_secs: u64,
    pub ntp_timeout_secs: u64,

    pub remote_config_retry: RetryPolicy,
    pub ping_server_retry: RetryPolicy,

    pub events: EventsConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            install_executable: "/usr/sbin/harv-install".into(),
            shutdown_executable: "/usr/sbin/cos-installer-shutdown".into(),
            upgrade_executable:
                "/k3os/system/k3os/current/harvester-upgrade.sh".into(),
            lsblk: crate::disk::LSBLK.into(),
            staging_dir: "/tmp".into(),
            timesyncd_conf: "/etc/systemd/timesyncd.conf".into(),
            network_config: "/etc/sysconfig/network/config".into(),
            http_timeout_secs: 15,
            ntp_timeout_secs: 5,
            remote_config_retry: RetryPolicy::REMOTE_CONFIG,
            ping_server_retry: RetryPolicy::PING_SERVER,
            events: EventsConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Follow a failed install's `FAILED` event with a `SUCCEEDED` event.
    ///
    /// Deployed installers do this, and webhook receivers key off the second
    /// event to learn that the installer has finished. On by default; set it
    /// to `false` to send only `FAILED`.
    pub success_event_on_install_failure: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { success_event_on_install_failure: true }
    }
}

impl InstallerConfig {
    /// Load an `InstallerConfig` from the given TOML file
    pub fn from_file<P: AsRef<Utf8Path>>(
        path: P,
    ) -> Result<InstallerConfig, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            ConfigError::Io { error, path: path.to_owned() }
        })?;
        toml::from_str(&data).map_err(|error| ConfigError::Parse {
            error,
            path: path.to_owned(),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn ntp_timeout(&self) -> Duration {
        Duration::from_secs(self.ntp_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("Failed to parse config file: {path}")]
    Parse {
        #[source]
        error: toml::de::Error,
        path: Utf8PathBuf,
    },
}
