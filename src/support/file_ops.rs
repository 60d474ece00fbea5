//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::support::error::Error;

/// Write `data` into the file at `path`, atomically.
///
/// The file will first be staged within `tmp`, which must be on the same file
/// system as `path`.
///
/// If `overwrite` is true, this will replace anything already at `path`. If
/// false, the call will fail if `path` already exists.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    overwrite: bool,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    if overwrite {
        tf.persist(path)?;
    } else {
        tf.persist_noclobber(path)?;
    }
    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    /// Replace `EEXIST` and `ENOTEMPTY` with `error`.
    fn on_exists(self, error: Error) -> Self::Coerced;
    fn on_not_found(self, error: Error) -> Self::Coerced;
}

impl<R, E: Into<Error>> ErrorTransforms for Result<R, E> {
    type Coerced = Result<R, Error>;

    fn on_exists(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::AlreadyExists == e.kind() => {
                Err(error)
            }
            // rename() onto a non-empty directory
            Err(Error::Io(e))
                if Some(nix::libc::ENOTEMPTY) == e.raw_os_error() =>
            {
                Err(error)
            }
            s => s,
        }
    }

    fn on_not_found(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                Err(error)
            }
            s => s,
        }
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn spit_respects_overwrite() {
        let tmpdir = TempDir::new().unwrap();
        let path = tmpdir.path().join("target");

        spit(tmpdir.path(), &path, false, 0o600, b"first").unwrap();
        assert!(spit(tmpdir.path(), &path, false, 0o600, b"second").is_err());
        assert_eq!(b"first".to_vec(), fs::read(&path).unwrap());

        spit(tmpdir.path(), &path, true, 0o600, b"third").unwrap();
        assert_eq!(b"third".to_vec(), fs::read(&path).unwrap());

        // Nothing is left behind in the staging directory
        assert_eq!(1, fs::read_dir(tmpdir.path()).unwrap().count());
    }

    #[test]
    fn error_transforms() {
        let tmpdir = TempDir::new().unwrap();
        let missing = tmpdir.path().join("missing");

        assert_matches!(
            Err(Error::NxMailbox),
            fs::read(&missing).on_not_found(Error::NxMailbox)
        );

        fs::create_dir(tmpdir.path().join("a")).unwrap();
        fs::create_dir(tmpdir.path().join("b")).unwrap();
        fs::create_dir(tmpdir.path().join("b/child")).unwrap();
        assert_matches!(
            Err(Error::MailboxExists),
            fs::rename(tmpdir.path().join("a"), tmpdir.path().join("b"))
                .on_exists(Error::MailboxExists)
        );

        fs::remove_file(&missing).ignore_not_found().unwrap();
        fs::create_dir(tmpdir.path().join("a"))
            .ignore_already_exists()
            .unwrap();
    }
}
