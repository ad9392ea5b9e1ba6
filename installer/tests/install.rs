// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end install runs against shell scripts standing in for the
//! install, shutdown and upgrade executables.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use installer::disk::DiskError;
use installer::{
    DiskSizeProbe, InstallError, Installer, InstallerConfig, MemorySink,
    OutputRelay, Panel, RecordingLifecycleHandler,
};
use installer_common::{ErrorKind, LifecycleEvent, NodeConfig, OsConfig};
use tokio_util::sync::CancellationToken;

const GIB: u64 = 1 << 30;

struct FixedDisk(u64);

#[async_trait]
impl DiskSizeProbe for FixedDisk {
    async fn size_bytes(&self, _device: &Utf8Path) -> Result<u64, DiskError> {
        Ok(self.0)
    }
}

struct TestEnv {
    scripts: Utf8TempDir,
    staging: Utf8TempDir,
    config: InstallerConfig,
}

impl TestEnv {
    fn new() -> Self {
        let scripts = camino_tempfile::tempdir().unwrap();
        let staging = camino_tempfile::tempdir().unwrap();
        let config = InstallerConfig {
            install_executable: scripts.path().join("install"),
            shutdown_executable: scripts.path().join("shutdown"),
            upgrade_executable: scripts.path().join("upgrade"),
            staging_dir: staging.path().to_owned(),
            ..InstallerConfig::default()
        };
        Self { scripts, staging, config }
    }

    fn script(&self, path: &Utf8Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .unwrap();
    }

    fn marker(&self, name: &str) -> Utf8PathBuf {
        self.scripts.path().join(name)
    }

    fn run(self) -> Run {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let sink = MemorySink::new();
        // The render loop runs for as long as the installer holds the relay.
        let (relay, _render_loop) = OutputRelay::spawn(&log, sink.clone());
        let events = RecordingLifecycleHandler::new();
        let installer = Installer::new(
            &log,
            self.config.clone(),
            relay,
            Arc::new(events.clone()),
            Arc::new(FixedDisk(200 * GIB)),
        );
        Run { env: self, installer, events, sink }
    }
}

struct Run {
    env: TestEnv,
    installer: Installer,
    events: RecordingLifecycleHandler,
    sink: MemorySink,
}

impl Run {
    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.env.staging.path()).unwrap().count()
    }
}

fn node_config() -> NodeConfig {
    NodeConfig::from_yaml(b"install:\n  mode: create\n  device: /dev/sda\n")
        .unwrap()
}

#[tokio::test]
async fn install_then_shutdown() {
    let env = TestEnv::new();
    env.script(
        &env.config.install_executable,
        r#"
test -f "$HARVESTER_CONFIG" || exit 10
test -f "$COS_INSTALL_CONFIG_URL" || exit 11
grep -q COS_PERSISTENT "$COS_PARTITION_LAYOUT" || exit 12
echo "installing to $COS_INSTALL_DEVICE"
echo "formatting" >&2
echo "done""#,
    );
    env.script(&env.config.shutdown_executable, "echo rebooting");
    let run = env.run();

    run.installer
        .install(node_config(), &OsConfig::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        run.events.events(),
        [LifecycleEvent::InstallStarted, LifecycleEvent::InstallSucceeded]
    );
    let lines = run.sink.lines_for(Panel::Install);
    assert!(lines.contains(&"installing to /dev/sda".to_owned()), "{lines:?}");
    assert!(lines.contains(&"formatting".to_owned()), "{lines:?}");
    let installing = lines.iter().position(|l| l == "installing to /dev/sda");
    let done = lines.iter().position(|l| l == "done");
    assert!(installing < done, "{lines:?}");
    assert_eq!(lines.last().map(String::as_str), Some("rebooting"));
    assert_eq!(run.staged_files(), 0);
}

#[tokio::test]
async fn failed_install_skips_shutdown() {
    let env = TestEnv::new();
    let marker = env.marker("shutdown-ran");
    env.script(&env.config.install_executable, "echo 'no space left' >&2\nexit 2");
    env.script(&env.config.shutdown_executable, &format!("touch {marker}"));
    let run = env.run();

    let error = run
        .installer
        .install(node_config(), &OsConfig::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, InstallError::Install(_)), "{error}");
    assert_eq!(error.kind(), ErrorKind::Process);
    assert_eq!(
        run.events.events(),
        [
            LifecycleEvent::InstallStarted,
            LifecycleEvent::InstallFailed,
            LifecycleEvent::InstallSucceeded,
        ]
    );
    assert!(!marker.exists());
    assert_eq!(run.sink.lines_for(Panel::Install), ["no space left"]);
    assert_eq!(run.staged_files(), 0);
}

#[tokio::test]
async fn cancelled_shutdown_is_not_a_failure() {
    let env = TestEnv::new();
    env.script(&env.config.install_executable, "echo installed");
    env.script(&env.config.shutdown_executable, "echo rebooting\nexec sleep 30");
    let run = env.run();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        let sink = run.sink.clone();
        tokio::spawn(async move {
            while !sink.lines_for(Panel::Install).contains(&"rebooting".to_owned())
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let error = run
        .installer
        .install(node_config(), &OsConfig::default(), &cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(error, InstallError::Cancelled), "{error}");
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(
        run.events.events(),
        [LifecycleEvent::InstallStarted, LifecycleEvent::InstallSucceeded]
    );
    assert_eq!(run.staged_files(), 0);
}

#[tokio::test]
async fn failed_shutdown_is_a_failure() {
    let env = TestEnv::new();
    env.script(&env.config.install_executable, "true");
    env.script(&env.config.shutdown_executable, "exit 1");
    let run = env.run();

    let error = run
        .installer
        .install(node_config(), &OsConfig::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, InstallError::Shutdown(_)), "{error}");
    assert_eq!(
        run.events.events(),
        [
            LifecycleEvent::InstallStarted,
            LifecycleEvent::InstallSucceeded,
            LifecycleEvent::InstallFailed,
        ]
    );
}

/// The process group of the calling process, from `/proc/self/stat`.
#[cfg(target_os = "linux")]
fn own_process_group() -> String {
    let stat = std::fs::read_to_string("/proc/self/stat").unwrap();
    // Fields after the parenthesized command name: state, ppid, pgrp.
    let (_, rest) = stat.rsplit_once(')').unwrap();
    rest.split_whitespace().nth(2).unwrap().to_owned()
}

// A Ctrl-C at the terminal is delivered to the foreground process group. The
// install executable must not be in it, or the interrupt that is meant to
// skip the reboot would kill the install.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn install_runs_outside_the_terminal_process_group() {
    let env = TestEnv::new();
    env.script(
        &env.config.install_executable,
        r#"read -r _ _ _ _ pgid _ < /proc/$$/stat
echo "pid=$$ pgid=$pgid""#,
    );
    env.script(&env.config.shutdown_executable, "true");
    let run = env.run();

    run.installer
        .install(node_config(), &OsConfig::default(), &CancellationToken::new())
        .await
        .unwrap();

    let lines = run.sink.lines_for(Panel::Install);
    let [line] = lines.as_slice() else { panic!("{lines:?}") };
    let (pid, pgid) = line
        .strip_prefix("pid=")
        .and_then(|rest| rest.split_once(" pgid="))
        .unwrap_or_else(|| panic!("{line}"));
    assert_eq!(pid, pgid, "install executable leads its own group");
    assert_ne!(pgid, own_process_group());
}

#[tokio::test]
async fn upgrade_relays_to_upgrade_panel() {
    let env = TestEnv::new();
    env.script(&env.config.upgrade_executable, "echo upgrading\nexit 4");
    let run = env.run();

    let error = run.installer.upgrade().await.unwrap_err();
    assert!(matches!(error, InstallError::Upgrade(_)), "{error}");
    assert_eq!(run.sink.lines_for(Panel::Upgrade), ["upgrading"]);
    assert!(run.sink.lines_for(Panel::Install).is_empty());
    assert!(run.events.events().is_empty());
}
