// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Appliance installer: validates what the operator entered, stages the
//! configuration for the OS install executable, and runs the install with
//! its output relayed to the console.

pub mod cmd;
mod config;
mod dispatch;
pub mod disk;
mod events;
pub mod fetch;
pub mod ntp;
mod orchestrator;
pub mod partition;
pub mod preflight;
mod relay;
pub mod retry;
pub mod staging;
pub mod sysconf;
#[cfg(test)]
mod test_helpers;

pub use config::*;
pub use dispatch::*;
pub use disk::{DiskSizeProbe, LsblkProbe};
pub use events::*;
pub use fetch::{ConfigFetcher, FetchError};
pub use ntp::{HostResolver, NtpError, NtpValidator, SystemResolver};
pub use orchestrator::*;
pub use relay::*;
