// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Temporary files handed to the install executable.

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::NamedUtf8TempFile;
use installer_common::ErrorKind;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to create temporary file {prefix}.* in {dir}")]
    Create {
        dir: Utf8PathBuf,
        prefix: String,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to serialize {prefix} document")]
    Serialize {
        prefix: String,
        #[source]
        err: serde_yaml::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Serialize { .. } => ErrorKind::Parse,
            StageError::Create { .. } | StageError::Write { .. } => {
                ErrorKind::Process
            }
        }
    }
}

/// A uniquely named file in the staging directory. The file is removed when
/// this is dropped.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedUtf8TempFile,
}

impl StagedFile {
    pub fn path(&self) -> &Utf8Path {
        self.file.path()
    }
}

/// Serialize `value` as YAML into a new file named `<prefix>.<random>` under
/// `dir`.
pub fn stage_yaml<T: Serialize>(
    dir: &Utf8Path,
    prefix: &str,
    value: &T,
) -> Result<StagedFile, StageError> {
    let contents = serde_yaml::to_string(value).map_err(|err| {
        StageError::Serialize { prefix: prefix.to_owned(), err }
    })?;

    let mut file = camino_tempfile::Builder::new()
        .prefix(&format!("{prefix}."))
        .tempfile_in(dir)
        .map_err(|err| StageError::Create {
            dir: dir.to_owned(),
            prefix: prefix.to_owned(),
            err,
        })?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| StageError::Write { path: file.path().to_owned(), err })?;

    Ok(StagedFile { file })
}
