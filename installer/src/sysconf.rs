// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Applying validated NTP and DNS settings to the live system.

use camino::{Utf8Path, Utf8PathBuf};
use ini::Ini;
use installer_common::ErrorKind;
use slog::{Logger, info};

use crate::cmd::{Command, ExecutionError};

const TIMESYNCD_SECTION: &str = "Time";
const TIMESYNCD_NTP_KEY: &str = "NTP";
const DNS_STATIC_SERVERS_KEY: &str = "NETCONFIG_DNS_STATIC_SERVERS";

#[derive(Debug, thiserror::Error)]
pub enum SysconfError {
    #[error("failed to load {path}")]
    LoadIni {
        path: Utf8PathBuf,
        #[source]
        err: ini::Error,
    },

    #[error("failed to read {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] ExecutionError),
}

impl SysconfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SysconfError::LoadIni { .. } => ErrorKind::Parse,
            SysconfError::Read { .. }
            | SysconfError::Write { .. }
            | SysconfError::Command(_) => ErrorKind::Process,
        }
    }
}

/// Set `[Time] NTP=` in the timesyncd config and restart time sync so the
/// new servers take effect. Does nothing for an empty list.
pub async fn enable_ntp_servers(
    log: &Logger,
    timesyncd_conf: &Utf8Path,
    servers: &[String],
) -> Result<(), SysconfError> {
    if servers.is_empty() {
        return Ok(());
    }
    write_timesyncd_servers(timesyncd_conf, servers)?;
    info!(log, "configured NTP servers"; "servers" => servers.join(" "));

    // timesyncd only rereads its config when it starts.
    Command::new("timedatectl")
        .args(["set-ntp", "false"])
        .ensure_success(log)
        .await?;
    Command::new("timedatectl")
        .args(["set-ntp", "true"])
        .ensure_success(log)
        .await?;
    Ok(())
}

pub fn write_timesyncd_servers(
    timesyncd_conf: &Utf8Path,
    servers: &[String],
) -> Result<(), SysconfError> {
    let mut conf = Ini::load_from_file(timesyncd_conf).map_err(|err| {
        SysconfError::LoadIni { path: timesyncd_conf.to_owned(), err }
    })?;
    conf.with_section(Some(TIMESYNCD_SECTION))
        .set(TIMESYNCD_NTP_KEY, servers.join(" "));
    conf.write_to_file(timesyncd_conf).map_err(|err| SysconfError::Write {
        path: timesyncd_conf.to_owned(),
        err,
    })
}

/// Set the static DNS servers in the network config and have netconfig
/// regenerate the resolver configuration.
pub async fn update_dns_servers(
    log: &Logger,
    network_config: &Utf8Path,
    servers: &[String],
) -> Result<(), SysconfError> {
    write_static_dns_servers(network_config, servers)?;
    info!(log, "configured DNS servers"; "servers" => servers.join(" "));

    Command::new("netconfig")
        .args(["update", "-m", "dns"])
        .ensure_success(log)
        .await?;
    Ok(())
}

/// Rewrite every `NETCONFIG_DNS_STATIC_SERVERS` line; other lines are left
/// untouched.
pub fn write_static_dns_servers(
    network_config: &Utf8Path,
    servers: &[String],
) -> Result<(), SysconfError> {
    let contents = std::fs::read_to_string(network_config).map_err(|err| {
        SysconfError::Read { path: network_config.to_owned(), err }
    })?;

    let replacement =
        format!("{DNS_STATIC_SERVERS_KEY}=\"{}\"", servers.join(" "));
    let mut updated = String::with_capacity(contents.len());
    for line in contents.split_inclusive('\n') {
        if line.starts_with(DNS_STATIC_SERVERS_KEY) {
            updated.push_str(&replacement);
            if line.ends_with('\n') {
                updated.push('\n');
            }
        } else {
            updated.push_str(line);
        }
    }

    std::fs::write(network_config, updated).map_err(|err| {
        SysconfError::Write { path: network_config.to_owned(), err }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::NamedUtf8TempFile;

    fn servers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn timesyncd_servers() {
        let file = NamedUtf8TempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "[Time]\n#NTP=\nFallbackNTP=time.example.com\n",
        )
        .unwrap();

        write_timesyncd_servers(
            file.path(),
            &servers(&["0.pool.ntp.org", "10.0.0.1:123"]),
        )
        .unwrap();

        let conf = Ini::load_from_file(file.path()).unwrap();
        let time = conf.section(Some(TIMESYNCD_SECTION)).unwrap();
        assert_eq!(time.get("NTP"), Some("0.pool.ntp.org 10.0.0.1:123"));
        assert_eq!(time.get("FallbackNTP"), Some("time.example.com"));
    }

    #[tokio::test]
    async fn empty_ntp_list_touches_nothing() {
        let logctx =
            crate::test_helpers::test_setup_log("empty_ntp_list_touches_nothing");
        // The file does not exist; an empty list must not even look at it.
        enable_ntp_servers(
            &logctx.log,
            Utf8Path::new("/nonexistent/timesyncd.conf"),
            &[],
        )
        .await
        .unwrap();
        logctx.cleanup_successful();
    }

    #[test]
    fn static_dns_servers() {
        let file = NamedUtf8TempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "## comment\nNETCONFIG_DNS_POLICY=\"auto\"\nNETCONFIG_DNS_STATIC_SERVERS=\"\"\nNETCONFIG_NTP_POLICY=\"\"",
        )
        .unwrap();

        write_static_dns_servers(file.path(), &servers(&["1.1.1.1", "8.8.8.8"]))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            "## comment\nNETCONFIG_DNS_POLICY=\"auto\"\n\
             NETCONFIG_DNS_STATIC_SERVERS=\"1.1.1.1 8.8.8.8\"\n\
             NETCONFIG_NTP_POLICY=\"\""
        );
    }
}
