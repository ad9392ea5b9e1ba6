// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checking that NTP servers answer before committing them to the config.
//!
//! The probe is a bare SNTP exchange: send a client-mode request and wait for
//! a 48-byte reply. The reply is not decoded; any well-sized answer within the
//! deadline counts as reachable.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use installer_common::ErrorKind;
use slog::{Logger, info, warn};
use tokio::net::UdpSocket;

pub const DEFAULT_NTP_PORT: u16 = 123;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const NTP_PACKET_LEN: usize = 48;
// LI = 0 (no warning), VN = 4, Mode = 3 (client).
const NTP_CLIENT_REQUEST: u8 = 0x2B;

#[derive(Debug, thiserror::Error)]
pub enum NtpError {
    #[error("invalid NTP server address {server:?}: {reason}")]
    InvalidAddress { server: String, reason: &'static str },

    #[error("failed to look up NTP server {host}")]
    Resolve {
        host: String,
        #[source]
        err: io::Error,
    },

    #[error("fail to validate NTP servers: {ips:?}")]
    Unreachable {
        server: String,
        ips: Vec<IpAddr>,
        #[source]
        err: io::Error,
    },
}

impl NtpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NtpError::InvalidAddress { .. } => ErrorKind::Validation,
            NtpError::Resolve { .. } | NtpError::Unreachable { .. } => {
                ErrorKind::Network
            }
        }
    }
}

/// Resolves host names to addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the system resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        Ok(ips)
    }
}

/// Split `host`, `host:port` or `[v6]:port`, defaulting the port to 123.
pub fn split_host_port(server: &str) -> Result<(&str, u16), NtpError> {
    let invalid = |reason| NtpError::InvalidAddress {
        server: server.to_owned(),
        reason,
    };

    let (host, port) = if let Some(rest) = server.strip_prefix('[') {
        let (host, after) =
            rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        match after {
            "" => (host, None),
            _ => {
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("unexpected text after ']'"))?;
                (host, Some(port))
            }
        }
    } else {
        match server.split_once(':') {
            None => (server, None),
            Some((_, port)) if port.contains(':') => {
                return Err(invalid("too many colons"));
            }
            Some((host, port)) => (host, Some(port)),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = match port {
        None => DEFAULT_NTP_PORT,
        Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
    };
    Ok((host, port))
}

/// Probes NTP servers over UDP.
pub struct NtpValidator<R = SystemResolver> {
    log: Logger,
    resolver: R,
    timeout: Duration,
}

impl NtpValidator<SystemResolver> {
    pub fn new(log: &Logger) -> Self {
        Self::with_resolver(log, SystemResolver)
    }
}

impl<R: HostResolver> NtpValidator<R> {
    pub fn with_resolver(log: &Logger, resolver: R) -> Self {
        Self {
            log: log.new(slog::o!("component" => "NtpValidator")),
            resolver,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Deadline for each request/response exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check every server in order, stopping at the first one that fails.
    ///
    /// A server passes if any of its addresses answers. A lookup failure fails
    /// the whole validation without probing anything.
    pub async fn validate_ntp_servers(
        &self,
        servers: &[String],
    ) -> Result<(), NtpError> {
        for server in servers {
            self.validate_server(server).await?;
        }
        Ok(())
    }

    async fn validate_server(&self, server: &str) -> Result<(), NtpError> {
        let (host, port) = split_host_port(server)?;
        let ips = self.resolver.lookup_ip(host).await.map_err(|err| {
            NtpError::Resolve { host: host.to_owned(), err }
        })?;
        if ips.is_empty() {
            return Err(NtpError::Resolve {
                host: host.to_owned(),
                err: io::Error::new(
                    io::ErrorKind::NotFound,
                    "no addresses found",
                ),
            });
        }

        let mut last_err = io::Error::other("not probed");
        for ip in &ips {
            let addr = SocketAddr::new(*ip, port);
            info!(self.log, "try to validate NTP server"; "addr" => %addr);
            match tokio::time::timeout(self.timeout, probe(addr)).await {
                Ok(Ok(())) => {
                    info!(self.log, "NTP server answered"; "addr" => %addr);
                    return Ok(());
                }
                Ok(Err(err)) => {
                    warn!(
                        self.log, "NTP probe failed";
                        "addr" => %addr,
                        "error" => %err,
                    );
                    last_err = err;
                }
                Err(_) => {
                    warn!(self.log, "NTP probe timed out"; "addr" => %addr);
                    last_err = io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no response within {:?}", self.timeout),
                    );
                }
            }
        }

        Err(NtpError::Unreachable {
            server: server.to_owned(),
            ips,
            err: last_err,
        })
    }
}

async fn probe(addr: SocketAddr) -> io::Result<()> {
    let bind: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let mut request = [0u8; NTP_PACKET_LEN];
    request[0] = NTP_CLIENT_REQUEST;
    socket.send(&request).await?;

    let mut response = [0u8; NTP_PACKET_LEN];
    let n = socket.recv(&mut response).await?;
    if n < NTP_PACKET_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short NTP response: {n} bytes"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_setup_log;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeResolver {
        hosts: BTreeMap<String, Vec<IpAddr>>,
        lookups: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn with_host(mut self, host: &str, ips: &[&str]) -> Self {
            let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
            self.hosts.insert(host.to_owned(), ips);
            self
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostResolver for FakeResolver {
        async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.lookups.lock().unwrap().push(host.to_owned());
            self.hosts.get(host).cloned().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no such host")
            })
        }
    }

    /// Answers one well-formed client request with a 48-byte reply.
    async fn spawn_responder() -> (u16, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, NTP_PACKET_LEN);
            assert_eq!(buf[0], 0x2B);
            assert!(buf[1..n].iter().all(|b| *b == 0));
            socket.send_to(&[0x24; NTP_PACKET_LEN], peer).await.unwrap();
        });
        (port, handle)
    }

    #[test]
    fn splits_host_and_port() {
        assert_eq!(split_host_port("pool.ntp.org").unwrap(), ("pool.ntp.org", 123));
        assert_eq!(split_host_port("10.0.0.1:1123").unwrap(), ("10.0.0.1", 1123));
        assert_eq!(split_host_port("[fd00::1]:124").unwrap(), ("fd00::1", 124));
        assert_eq!(split_host_port("[fd00::1]").unwrap(), ("fd00::1", 123));

        for bad in ["fd00::1", "host:ntp", "host:70000", ":123", "[fd00::1", "[::1]x"]
        {
            assert_matches!(
                split_host_port(bad),
                Err(NtpError::InvalidAddress { .. }),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn lookup_failure_stops_validation() {
        let logctx = test_setup_log("lookup_failure_stops_validation");
        let resolver = FakeResolver::default().with_host("good", &["127.0.0.1"]);
        let validator = NtpValidator::with_resolver(&logctx.log, resolver);

        let error = validator
            .validate_ntp_servers(&["bad.invalid".to_owned(), "good".to_owned()])
            .await
            .unwrap_err();
        assert_matches!(&error, NtpError::Resolve { host, .. } if host == "bad.invalid");
        assert_eq!(error.kind(), ErrorKind::Network);
        assert_eq!(validator.resolver.lookups(), ["bad.invalid"]);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn malformed_entry_is_not_resolved() {
        let logctx = test_setup_log("malformed_entry_is_not_resolved");
        let validator =
            NtpValidator::with_resolver(&logctx.log, FakeResolver::default());
        let error = validator
            .validate_ntp_servers(&["a:b:c".to_owned()])
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(validator.resolver.lookups().is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn any_answering_address_passes() {
        let logctx = test_setup_log("any_answering_address_passes");
        let (port, responder) = spawn_responder().await;
        // Nothing listens on 127.0.0.2, so that probe fails (refused or timed
        // out) and the second address is tried.
        let resolver = FakeResolver::default()
            .with_host("ntp.test", &["127.0.0.2", "127.0.0.1"]);
        let validator = NtpValidator::with_resolver(&logctx.log, resolver)
            .with_timeout(Duration::from_millis(500));

        validator
            .validate_ntp_servers(&[format!("ntp.test:{port}")])
            .await
            .unwrap();
        responder.await.unwrap();
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn silent_server_is_unreachable() {
        let logctx = test_setup_log("silent_server_is_unreachable");
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let resolver = FakeResolver::default().with_host("ntp.test", &["127.0.0.1"]);
        let validator = NtpValidator::with_resolver(&logctx.log, resolver)
            .with_timeout(Duration::from_millis(200));

        let error = validator
            .validate_ntp_servers(&[format!("ntp.test:{port}")])
            .await
            .unwrap_err();
        assert_matches!(&error, NtpError::Unreachable { ips, err, .. } => {
            assert_eq!(ips, &["127.0.0.1".parse::<IpAddr>().unwrap()]);
            assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        });
        assert!(error.to_string().contains("127.0.0.1"), "{error}");
        drop(silent);
        logctx.cleanup_successful();
    }
}
