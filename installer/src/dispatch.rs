// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use installer_common::{ErrorKind, NodeConfig, OsConfig};
use slog::{Drain, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    ConfigFetcher, Installer, InstallerConfig, LogLifecycleHandler,
    LsblkProbe, NtpValidator, OutputRelay, TerminalSink,
    disk::{
        DiskError, disk_exceeds_mbr_limit, validate_disk_size,
        validate_disk_size_soft,
    },
    fetch::validate_ping_server_url,
    partition::plan_partition_layout,
    preflight::{PreflightError, formatted_server_url, system_is_bios},
    sysconf::{enable_ntp_servers, update_dns_servers},
};
use crate::disk::DiskSizeProbe;

/// Appliance installer.
#[derive(Debug, Parser)]
#[command(version)]
pub struct InstallerApp {
    /// Installer configuration file (TOML); built-in defaults if omitted.
    #[clap(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    subcommand: InstallerCommand,
}

impl InstallerApp {
    /// Executes the app.
    pub async fn exec(self, log: &slog::Logger) -> Result<()> {
        let config = match &self.config {
            Some(path) => InstallerConfig::from_file(path)?,
            None => InstallerConfig::default(),
        };
        match self.subcommand {
            InstallerCommand::Install(opts) => opts.exec(log, config).await,
            InstallerCommand::Upgrade => upgrade(log, config).await,
            InstallerCommand::ValidateNtp(opts) => opts.exec(log, config).await,
            InstallerCommand::SetDns(opts) => opts.exec(log, config).await,
            InstallerCommand::CheckPingUrl { url } => {
                let url = ping_url(&url)?;
                validate_ping_server_url(
                    log,
                    &url,
                    config.http_timeout(),
                    config.ping_server_retry,
                )
                .await
                .with_context(|| format!("{url} is not reachable"))?;
                println!("{url} is reachable");
                Ok(())
            }
            InstallerCommand::PlanPartitions { device } => {
                let probe = LsblkProbe::with_binary(log, &config.lsblk);
                let size = probe.size_bytes(&device).await?;
                let layout = plan_partition_layout(&device, size)?;
                print!("{}", layout.to_yaml()?);
                Ok(())
            }
            InstallerCommand::CheckDisk { device } => {
                check_disk(log, &config, &device).await
            }
            InstallerCommand::FetchConfig(opts) => opts.exec(log, config).await,
        }
    }

    pub fn setup_log(
        path: impl AsRef<Utf8Path>,
    ) -> anyhow::Result<slog::Logger> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())?;

        let file_decorator = slog_term::PlainDecorator::new(file);
        let file_drain =
            slog_term::FullFormat::new(file_decorator).build().fuse();

        let stderr_drain = stderr_env_drain("RUST_LOG");

        let drain = slog::Duplicate::new(file_drain, stderr_drain).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Ok(slog::Logger::root(drain, slog::o!()))
    }
}

#[derive(Debug, Subcommand)]
enum InstallerCommand {
    /// Stage the configuration, install, then shut down.
    ///
    /// Ctrl-C cancels the shutdown that follows a successful install.
    Install(InstallOpts),
    /// Run the upgrade executable.
    Upgrade,
    /// Check that NTP servers answer.
    ValidateNtp(ValidateNtpOpts),
    /// Set the static DNS servers.
    SetDns(SetDnsOpts),
    /// Check that an existing cluster's URL answers.
    ///
    /// A bare IP address or domain name is checked at the cluster's
    /// management URL.
    CheckPingUrl { url: String },
    /// Print the partition layout that would be used for a device.
    PlanPartitions { device: Utf8PathBuf },
    /// Check that a device is suitable for installing onto.
    CheckDisk { device: Utf8PathBuf },
    /// Fetch a node configuration and print it.
    FetchConfig(FetchConfigOpts),
}

#[derive(Debug, Args)]
struct InstallOpts {
    /// Node configuration file.
    #[clap(
        long,
        required_unless_present = "config_url",
        conflicts_with = "config_url"
    )]
    node_config: Option<Utf8PathBuf>,

    /// Fetch the node configuration from this URL, retrying while the
    /// network comes up.
    #[clap(long)]
    config_url: Option<String>,

    /// OS configuration file, staged verbatim for the install executable.
    #[clap(long)]
    os_config: Option<Utf8PathBuf>,
}

impl InstallOpts {
    async fn exec(self, log: &slog::Logger, config: InstallerConfig) -> Result<()> {
        let (relay, render_loop) =
            OutputRelay::spawn(log, TerminalSink::stdout());

        let node = match (&self.node_config, &self.config_url) {
            (Some(path), _) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("failed to read {path}"))?;
                NodeConfig::from_yaml(&data)
                    .with_context(|| format!("failed to parse {path}"))?
            }
            (None, Some(url)) => {
                ConfigFetcher::new(log, config.http_timeout())?
                    .fetch_config_with_retry(
                        url,
                        config.remote_config_retry,
                        &relay,
                    )
                    .await?
            }
            (None, None) => bail!("one of --node-config or --config-url is required"),
        };
        let os = match &self.os_config {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("failed to read {path}"))?;
                OsConfig::from_yaml(&data)
                    .with_context(|| format!("failed to parse {path}"))?
            }
            None => OsConfig::default(),
        };

        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            let log = log.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(log, "interrupted; the post-install reboot will be skipped");
                    cancel.cancel();
                }
            })
        };

        let disks = LsblkProbe::with_binary(log, &config.lsblk);
        let installer = Installer::new(
            log,
            config,
            relay,
            Arc::new(LogLifecycleHandler::new(log)),
            Arc::new(disks),
        );
        let result = installer.install(node, &os, &cancel).await;
        ctrl_c.abort();

        // Let the render loop drain before anything else hits the terminal.
        drop(installer);
        render_loop.finish().await;

        match result {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::Cancelled => {
                println!("Auto-reboot cancelled");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }
}

async fn upgrade(log: &slog::Logger, config: InstallerConfig) -> Result<()> {
    let (relay, render_loop) = OutputRelay::spawn(log, TerminalSink::stdout());
    let disks = LsblkProbe::with_binary(log, &config.lsblk);
    let installer = Installer::new(
        log,
        config,
        relay,
        Arc::new(LogLifecycleHandler::new(log)),
        Arc::new(disks),
    );
    let result = installer.upgrade().await;
    drop(installer);
    render_loop.finish().await;
    Ok(result?)
}

#[derive(Debug, Args)]
struct ValidateNtpOpts {
    /// NTP servers as `host`, `host:port` or `[v6]:port`.
    #[clap(required = true)]
    servers: Vec<String>,

    /// Also write the servers to the timesyncd config and restart time sync.
    #[clap(long)]
    apply: bool,
}

impl ValidateNtpOpts {
    async fn exec(self, log: &slog::Logger, config: InstallerConfig) -> Result<()> {
        NtpValidator::new(log)
            .with_timeout(config.ntp_timeout())
            .validate_ntp_servers(&self.servers)
            .await?;
        println!("all NTP servers answered");
        if self.apply {
            enable_ntp_servers(log, &config.timesyncd_conf, &self.servers)
                .await?;
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
struct SetDnsOpts {
    #[clap(required = true)]
    servers: Vec<String>,
}

impl SetDnsOpts {
    async fn exec(self, log: &slog::Logger, config: InstallerConfig) -> Result<()> {
        update_dns_servers(log, &config.network_config, &self.servers).await?;
        Ok(())
    }
}

#[derive(Debug, Args)]
struct FetchConfigOpts {
    url: String,

    /// Retry per the configured remote config policy, reporting each failure.
    #[clap(long)]
    retry: bool,
}

impl FetchConfigOpts {
    async fn exec(self, log: &slog::Logger, config: InstallerConfig) -> Result<()> {
        let fetcher = ConfigFetcher::new(log, config.http_timeout())?;
        let node = if self.retry {
            let (relay, render_loop) =
                OutputRelay::spawn(log, TerminalSink::stdout());
            let node = fetcher
                .fetch_config_with_retry(
                    &self.url,
                    config.remote_config_retry,
                    &relay,
                )
                .await;
            drop(relay);
            render_loop.finish().await;
            node?
        } else {
            fetcher.fetch_config(&self.url).await?
        };
        print!("{}", node.to_yaml()?);
        Ok(())
    }
}

async fn check_disk(
    log: &slog::Logger,
    config: &InstallerConfig,
    device: &Utf8Path,
) -> Result<()> {
    let probe = LsblkProbe::with_binary(log, &config.lsblk);
    validate_disk_size(&probe, device).await?;
    match validate_disk_size_soft(&probe, device).await {
        Ok(()) => {}
        Err(error @ DiskError::SmallerThanRecommended { .. }) => {
            warn!(log, "{error}"; "device" => %device);
            println!("warning: {error}");
        }
        Err(error) => return Err(error.into()),
    }
    if system_is_bios() && disk_exceeds_mbr_limit(&probe, device).await? {
        println!(
            "warning: {device} is larger than an MBR partition table can \
             address; only the first 2 TiB will be used"
        );
    }
    info!(log, "disk check passed"; "device" => %device);
    println!("{device} is suitable for installation");
    Ok(())
}

fn ping_url(target: &str) -> Result<String, PreflightError> {
    if target.contains("://") {
        Ok(target.to_owned())
    } else {
        formatted_server_url(target)
    }
}

pub(crate) fn stderr_env_drain(
    env_var: &str,
) -> impl Drain<Ok = (), Err = slog::Never> + use<> {
    let stderr_decorator = slog_term::TermDecorator::new().build();
    let stderr_drain =
        slog_term::FullFormat::new(stderr_decorator).build().fuse();
    let mut builder = slog_envlogger::LogBuilder::new(stderr_drain);
    if let Ok(s) = std::env::var(env_var) {
        builder = builder.parse(&s);
    } else {
        // Log at the info level by default.
        builder = builder.filter(None, slog::FilterLevel::Info);
    }
    builder.build()
}
