// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving the install and upgrade executables.
//!
//! An install goes through three phases:
//!
//! 1. Staging: the OS config and node config are written to temporary files,
//!    the node config is pointed at the staged OS config, the environment for
//!    the install executable is composed, and (unless the node opts out of a
//!    data partition) a partition layout is planned and staged too.
//! 2. Installing: the install executable runs with that environment while its
//!    output is relayed to the install panel.
//! 3. Shutting down: the shutdown executable runs with the same environment.
//!    This is the only phase that can be cancelled; cancelling it skips the
//!    reboot and is not a failure.
//!
//! Staged files live exactly as long as the [`StagedInstall`] that owns them.

use std::ffi::{OsStr, OsString};
use std::sync::Arc;

use camino::Utf8Path;
use display_error_chain::DisplayErrorChain;
use installer_common::{ErrorKind, LifecycleEvent, NodeConfig, OsConfig};
use slog::{Logger, error, info, o, warn};
use tokio_util::sync::CancellationToken;

use crate::cmd::{Command, ExecutionError};
use crate::config::InstallerConfig;
use crate::disk::DiskSizeProbe;
use crate::events::LifecycleHandler;
use crate::partition::{PartitionError, build_partition_layout};
use crate::relay::{OutputRelay, Panel};
use crate::staging::{StageError, StagedFile, stage_yaml};

/// Points the install executable at the staged node config.
pub const HARVESTER_CONFIG_ENV: &str = "HARVESTER_CONFIG";

/// Points the install executable at the staged partition layout.
pub const PARTITION_LAYOUT_ENV: &str = "COS_PARTITION_LAYOUT";

const OS_CONFIG_PREFIX: &str = "cos";
const NODE_CONFIG_PREFIX: &str = "harvester";

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to stage {what}")]
    Stage {
        what: &'static str,
        #[source]
        err: StageError,
    },

    #[error("no install device configured")]
    MissingDevice,

    #[error("failed to build partition layout")]
    PartitionLayout(#[source] PartitionError),

    #[error("install failed")]
    Install(#[source] ExecutionError),

    #[error("shutdown after install failed")]
    Shutdown(#[source] ExecutionError),

    #[error("auto-reboot cancelled")]
    Cancelled,

    #[error("upgrade failed")]
    Upgrade(#[source] ExecutionError),
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Stage { err, .. } => err.kind(),
            InstallError::MissingDevice => ErrorKind::Validation,
            InstallError::PartitionLayout(err) => err.kind(),
            InstallError::Install(err)
            | InstallError::Shutdown(err)
            | InstallError::Upgrade(err) => err.kind(),
            InstallError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Artifacts staged for one install, and the environment that refers to
/// them. Dropping this removes the staged files.
#[derive(Debug)]
pub struct StagedInstall {
    os_config: StagedFile,
    node_config: StagedFile,
    layout: Option<StagedFile>,
    env: Vec<(OsString, OsString)>,
}

impl StagedInstall {
    pub fn os_config_path(&self) -> &Utf8Path {
        self.os_config.path()
    }

    pub fn node_config_path(&self) -> &Utf8Path {
        self.node_config.path()
    }

    pub fn layout_path(&self) -> Option<&Utf8Path> {
        self.layout.as_ref().map(StagedFile::path)
    }

    /// The full environment for the install and shutdown executables.
    pub fn env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    pub fn env_var(&self, name: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_os_str())
    }
}

/// Sets `key`, replacing any inherited value so each name appears once.
fn set_env(
    env: &mut Vec<(OsString, OsString)>,
    key: impl Into<OsString>,
    value: impl Into<OsString>,
) {
    let key = key.into();
    env.retain(|(k, _)| *k != key);
    env.push((key, value.into()));
}

pub struct Installer {
    log: Logger,
    config: InstallerConfig,
    relay: OutputRelay,
    events: Arc<dyn LifecycleHandler>,
    disks: Arc<dyn DiskSizeProbe>,
}

impl Installer {
    pub fn new(
        log: &Logger,
        config: InstallerConfig,
        relay: OutputRelay,
        events: Arc<dyn LifecycleHandler>,
        disks: Arc<dyn DiskSizeProbe>,
    ) -> Self {
        Self {
            log: log.new(o!("component" => "Installer")),
            config,
            relay,
            events,
            disks,
        }
    }

    /// Stage everything the install executable needs.
    ///
    /// `node` is updated in place: its `install.config_url` is rewritten to
    /// the staged OS config. The node config file itself is written before
    /// that rewrite, so the executable finds the new location only through
    /// the environment.
    pub async fn stage(
        &self,
        node: &mut NodeConfig,
        os: &OsConfig,
    ) -> Result<StagedInstall, InstallError> {
        let staging_dir = &self.config.staging_dir;

        let os_config = stage_yaml(staging_dir, OS_CONFIG_PREFIX, os)
            .map_err(|err| InstallError::Stage { what: "OS config", err })?;
        let node_config = stage_yaml(staging_dir, NODE_CONFIG_PREFIX, node)
            .map_err(|err| InstallError::Stage { what: "node config", err })?;

        node.install.config_url = os_config.path().to_string();

        let mut env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        for (key, value) in node.to_install_env() {
            set_env(&mut env, key, value);
        }
        set_env(&mut env, HARVESTER_CONFIG_ENV, node_config.path());

        let layout = if node.no_data_partition {
            None
        } else {
            let device = node
                .install
                .device
                .as_deref()
                .ok_or(InstallError::MissingDevice)?;
            let layout = build_partition_layout(
                &self.log,
                self.disks.as_ref(),
                device,
                staging_dir,
            )
            .await
            .map_err(InstallError::PartitionLayout)?;
            set_env(&mut env, PARTITION_LAYOUT_ENV, layout.path());
            Some(layout)
        };

        info!(
            self.log, "staged install";
            "os_config" => %os_config.path(),
            "node_config" => %node_config.path(),
            "layout" => ?layout.as_ref().map(|l| l.path().to_string()),
        );
        Ok(StagedInstall { os_config, node_config, layout, env })
    }

    /// Stage, install and then shut down.
    ///
    /// `cancel` only affects the shutdown phase: if it fires while the
    /// shutdown executable runs, that process is killed and
    /// [`InstallError::Cancelled`] is returned without a failure event.
    pub async fn install(
        &self,
        mut node: NodeConfig,
        os: &OsConfig,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        let staged = self.stage(&mut node, os).await?;

        self.emit(LifecycleEvent::InstallStarted);
        let result = Command::new(&self.config.install_executable)
            .env_exact(staged.env().iter().cloned())
            .run_relayed(&self.log, &self.relay, Panel::Install, None)
            .await;
        if let Err(err) = result {
            error!(
                self.log, "install executable failed";
                "error" => %DisplayErrorChain::new(&err),
            );
            self.emit(LifecycleEvent::InstallFailed);
            if self.config.events.success_event_on_install_failure {
                self.emit(LifecycleEvent::InstallSucceeded);
            }
            return Err(InstallError::Install(err));
        }
        self.emit(LifecycleEvent::InstallSucceeded);

        let result = Command::new(&self.config.shutdown_executable)
            .env_exact(staged.env().iter().cloned())
            .run_relayed(&self.log, &self.relay, Panel::Install, Some(cancel))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(ExecutionError::Cancelled { .. }) => {
                warn!(self.log, "auto-reboot cancelled");
                Err(InstallError::Cancelled)
            }
            Err(err) => {
                error!(
                    self.log, "shutdown executable failed";
                    "error" => %DisplayErrorChain::new(&err),
                );
                self.emit(LifecycleEvent::InstallFailed);
                Err(InstallError::Shutdown(err))
            }
        }
    }

    /// Run the upgrade executable with the inherited environment, relaying
    /// its output to the upgrade panel, and wait for it to exit.
    pub async fn upgrade(&self) -> Result<(), InstallError> {
        Command::new(&self.config.upgrade_executable)
            .run_relayed(&self.log, &self.relay, Panel::Upgrade, None)
            .await
            .map_err(InstallError::Upgrade)
    }

    fn emit(&self, event: LifecycleEvent) {
        info!(self.log, "emitting lifecycle event"; "event" => event.as_str());
        self.events.handle(event);
    }
}
