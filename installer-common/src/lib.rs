// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared between the installer and the tools that drive it: the node
//! configuration schema, the partition layout document handed to the install
//! executable, lifecycle events, and retry policies.

mod errors;
mod events;
mod layout;
mod node_config;
mod retry;

pub use errors::*;
pub use events::*;
pub use layout::*;
pub use node_config::*;
pub use retry::*;
