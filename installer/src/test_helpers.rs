// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use slog::Drain;

/// A per-test logger writing to a file in the temp directory.
///
/// The file is kept around (and its path printed) unless the test calls
/// [`LogContext::cleanup_successful`], so failing tests leave their logs
/// behind.
pub(crate) struct LogContext {
    pub(crate) log: slog::Logger,
    log_path: Utf8PathBuf,
}

impl LogContext {
    pub(crate) fn cleanup_successful(self) {
        std::fs::remove_file(&self.log_path).unwrap_or_else(|err| {
            panic!("failed to remove log file {}: {err}", self.log_path)
        });
    }
}

pub(crate) fn test_setup_log(test_name: &str) -> LogContext {
    let file = camino_tempfile::Builder::new()
        .prefix(&format!("{test_name}."))
        .suffix(".log")
        .tempfile()
        .expect("created temp log file");
    let writer = file.reopen().expect("reopened temp log file");
    let log_path = file.into_temp_path().keep().expect("kept temp log file");
    eprintln!("log file for {test_name}: {log_path}");

    let decorator = slog_term::PlainSyncDecorator::new(writer);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let log = slog::Logger::root(drain, slog::o!("test" => test_name.to_owned()));
    LogContext { log, log_path }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_outlives_a_failed_test() {
        let logctx = test_setup_log("log_file_outlives_a_failed_test");
        slog::info!(logctx.log, "before the failure");
        let path = logctx.log_path.clone();

        // A panicking test drops its context without cleaning up.
        drop(logctx);
        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("before the failure"), "{contents}");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cleanup_removes_the_log_file() {
        let logctx = test_setup_log("cleanup_removes_the_log_file");
        let path = logctx.log_path.clone();
        logctx.cleanup_successful();
        assert!(!path.exists());
    }
}
