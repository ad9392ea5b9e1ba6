// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An install phase transition reported to the lifecycle webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    #[serde(rename = "STARTED")]
    InstallStarted,
    #[serde(rename = "FAILED")]
    InstallFailed,
    #[serde(rename = "SUCCEEDED")]
    InstallSucceeded,
}

impl LifecycleEvent {
    /// The name under which webhook receivers know this event.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::InstallStarted => "STARTED",
            LifecycleEvent::InstallFailed => "FAILED",
            LifecycleEvent::InstallSucceeded => "SUCCEEDED",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
