// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Small checks and derivations used while collecting the node config.
//!
//! The CLI uses [`formatted_server_url`] and [`system_is_bios`]. The rest are
//! library API for front ends that collect the node config interactively.

use std::net::IpAddr;

use camino::Utf8Path;
use installer_common::ErrorKind;
use rand::Rng;

/// Port on which an existing cluster's management API listens.
pub const MANAGEMENT_PORT: u16 = 8443;

pub const HOSTNAME_PREFIX: &str = "harvester-";
const HOSTNAME_SUFFIX_LEN: usize = 5;
// No vowels, and no characters that are easily confused with one another.
const HOSTNAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

const EFI_FIRMWARE_DIR: &str = "/sys/firmware/efi";

const NETWORK_METHOD_DHCP: &str = "dhcp";

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("{0} is not a valid ip/domain")]
    InvalidServerAddress(String),
}

impl PreflightError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreflightError::InvalidServerAddress(_) => ErrorKind::Validation,
        }
    }
}

/// The management URL of a cluster reachable at `addr`, an IP address or a
/// DNS-1123 domain name.
pub fn formatted_server_url(addr: &str) -> Result<String, PreflightError> {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => Ok(format!("https://[{ip}]:{MANAGEMENT_PORT}")),
        Ok(IpAddr::V4(ip)) => Ok(format!("https://{ip}:{MANAGEMENT_PORT}")),
        Err(_) if is_dns1123_subdomain(addr) => {
            Ok(format!("https://{addr}:{MANAGEMENT_PORT}"))
        }
        Err(_) => Err(PreflightError::InvalidServerAddress(addr.to_owned())),
    }
}

fn is_dns1123_subdomain(name: &str) -> bool {
    fn is_label(label: &str) -> bool {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= 63
            && bytes.iter().all(|b| {
                b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-'
            })
            && bytes[0] != b'-'
            && bytes[bytes.len() - 1] != b'-'
    }
    !name.is_empty() && name.len() <= 253 && name.split('.').all(is_label)
}

/// The `server` entry of a rancherd config document, or an empty string if
/// there is none.
pub fn server_url_from_rancherd_config(
    data: &[u8],
) -> Result<String, serde_yaml::Error> {
    let config: serde_yaml::Value = serde_yaml::from_slice(data)?;
    Ok(config
        .get("server")
        .and_then(serde_yaml::Value::as_str)
        .unwrap_or_default()
        .to_owned())
}

/// A random hostname for nodes whose operator didn't pick one.
pub fn generate_hostname() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..HOSTNAME_SUFFIX_LEN)
        .map(|_| {
            HOSTNAME_ALPHABET[rng.gen_range(0..HOSTNAME_ALPHABET.len())] as char
        })
        .collect();
    format!("{HOSTNAME_PREFIX}{suffix}")
}

/// True if the machine booted through legacy BIOS rather than UEFI.
pub fn system_is_bios() -> bool {
    firmware_is_bios(Utf8Path::new(EFI_FIRMWARE_DIR))
}

fn firmware_is_bios(efi_dir: &Utf8Path) -> bool {
    !efi_dir.exists()
}

/// Whether the cluster VIP still has to be obtained over DHCP: the VIP mode
/// is DHCP and either the VIP or its hardware address is missing.
pub fn need_vip_from_dhcp(mode: &str, vip: &str, hw_addr: &str) -> bool {
    mode.eq_ignore_ascii_case(NETWORK_METHOD_DHCP)
        && (vip.is_empty() || hw_addr.is_empty())
}
