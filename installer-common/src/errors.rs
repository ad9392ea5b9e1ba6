// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// Coarse classification of installer failures.
///
/// Every error type in the installer maps onto one of these so that a UI can
/// decide how to present a failure without matching on each variant. In
/// particular, [`ErrorKind::Cancelled`] must never be shown to the operator as
/// a failed install.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input: disk too small, malformed address, invalid key.
    Validation,
    /// DNS, connection, timeout, or an HTTP status outside `[200, 400)`.
    Network,
    /// A fetched or staged document did not match its schema.
    Parse,
    /// An external executable could not be run or exited unsuccessfully.
    Process,
    /// The operator interrupted the post-install shutdown.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::Process => "process",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
