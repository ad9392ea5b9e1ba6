// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fetching remote node configuration and other operator-supplied URLs.

use std::time::Duration;

use display_error_chain::DisplayErrorChain;
use installer_common::{ErrorKind, NodeConfig, RetryPolicy};
use reqwest::StatusCode;
use slog::{Logger, debug, info, warn};

use crate::relay::{OutputRelay, Panel};
use crate::retry::retry_with_policy;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        err: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: StatusCode, body: String },

    #[error("Fail to fetch config")]
    FetchConfig(#[source] Box<FetchError>),

    #[error("Fail to load config")]
    LoadConfig(#[source] serde_yaml::Error),

    #[error("fail to parse on line {line}: {content}")]
    SshKey { line: usize, content: String },

    #[error("no key found")]
    NoSshKeys,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Client(_)
            | FetchError::Request { .. }
            | FetchError::Status { .. } => ErrorKind::Network,
            FetchError::FetchConfig(err) => err.kind(),
            FetchError::LoadConfig(_) => ErrorKind::Parse,
            FetchError::SshKey { .. } | FetchError::NoSshKeys => {
                ErrorKind::Validation
            }
        }
    }
}

/// HTTP client for operator-supplied URLs. Honors `HTTP_PROXY`,
/// `HTTPS_PROXY` and `NO_PROXY`.
#[derive(Clone, Debug)]
pub struct ConfigFetcher {
    log: Logger,
    client: reqwest::Client,
}

impl ConfigFetcher {
    pub fn new(log: &Logger, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::with_client(log, client))
    }

    pub fn with_client(log: &Logger, client: reqwest::Client) -> Self {
        Self { log: log.new(slog::o!("component" => "ConfigFetcher")), client }
    }

    /// GET `url`. Any status outside `[200, 400)` is an error that carries the
    /// response body.
    pub async fn get_url(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        get_url(&self.log, &self.client, url).await
    }

    pub async fn fetch_config(
        &self,
        url: &str,
    ) -> Result<NodeConfig, FetchError> {
        let body = self.get_url(url).await?;
        NodeConfig::from_yaml(&body).map_err(FetchError::LoadConfig)
    }

    /// Fetch and parse a node configuration, retrying fetch failures per
    /// `policy`.
    ///
    /// Each failed attempt is reported on the install panel together with
    /// how long until the next try and how many tries remain. A body that
    /// fails to parse is not retried.
    pub async fn fetch_config_with_retry(
        &self,
        url: &str,
        policy: RetryPolicy,
        relay: &OutputRelay,
    ) -> Result<NodeConfig, FetchError> {
        let body = retry_with_policy(policy, |attempt| async move {
            match self.get_url(url).await {
                Ok(body) => Ok(body),
                Err(err) => {
                    let message = DisplayErrorChain::new(&err).to_string();
                    warn!(
                        self.log, "failed to fetch config";
                        "url" => url,
                        "attempt" => attempt.number,
                        "remaining" => attempt.remaining,
                        "error" => &message,
                    );
                    let countdown = format!(
                        "Retry after {} seconds (Remaining: {})...",
                        policy.interval_secs, attempt.remaining
                    );
                    for line in [message, countdown] {
                        if let Err(error) = relay.relay(Panel::Install, line).await
                        {
                            warn!(self.log, "failed to relay"; "error" => %error);
                        }
                    }
                    Err(err)
                }
            }
        })
        .await
        .map_err(|err| FetchError::FetchConfig(Box::new(err)))?;

        NodeConfig::from_yaml(&body).map_err(FetchError::LoadConfig)
    }

    /// Fetch an authorized_keys style list and check that every non-empty
    /// line is an OpenSSH public key.
    pub async fn fetch_ssh_keys(
        &self,
        url: &str,
    ) -> Result<Vec<String>, FetchError> {
        let body = self.get_url(url).await?;
        let keys = parse_authorized_keys(&String::from_utf8_lossy(&body))?;
        info!(self.log, "fetched SSH keys"; "url" => url, "count" => keys.len());
        Ok(keys)
    }
}

async fn get_url(
    log: &Logger,
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, FetchError> {
    debug!(log, "GET {url}");
    let response = client.get(url).send().await.map_err(|err| {
        FetchError::Request { url: url.to_owned(), err }
    })?;
    let status = response.status();
    if !(200..400).contains(&status.as_u16()) {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Status { url: url.to_owned(), status, body });
    }
    let body = response.bytes().await.map_err(|err| FetchError::Request {
        url: url.to_owned(),
        err,
    })?;
    Ok(body.to_vec())
}

fn parse_authorized_keys(body: &str) -> Result<Vec<String>, FetchError> {
    let mut keys = Vec::new();
    for (i, line) in body.split('\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        if line.parse::<ssh_key::authorized_keys::Entry>().is_err() {
            return Err(FetchError::SshKey {
                line: i + 1,
                content: line.to_owned(),
            });
        }
        keys.push(line.to_owned());
    }
    if keys.is_empty() {
        return Err(FetchError::NoSshKeys);
    }
    Ok(keys)
}

/// Check that the URL of an existing cluster answers.
///
/// Clusters commonly serve a self-signed certificate at this point, so
/// certificate verification is disabled. No proxy is used and the request is
/// retried per `policy`, since the network may still be settling.
pub async fn validate_ping_server_url(
    log: &Logger,
    url: &str,
    timeout: Duration,
    policy: RetryPolicy,
) -> Result<(), FetchError> {
    let client = reqwest::ClientBuilder::new()
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .timeout(timeout)
        .build()
        .map_err(FetchError::Client)?;
    retry_with_policy(policy, |attempt| {
        let client = &client;
        async move {
            get_url(log, client, url).await.inspect_err(|err| {
                warn!(
                    log, "ping server check failed";
                    "url" => url,
                    "attempt" => attempt.number,
                    "error" => %DisplayErrorChain::new(err),
                );
            })
        }
    })
    .await?;
    Ok(())
}
