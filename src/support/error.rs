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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe mailbox or user name")]
    UnsafeName,
    #[error("No such mailbox")]
    NxMailbox,
    #[error("No such message")]
    NxMessage,
    #[error("No such user")]
    NxUser,
    #[error("Listener not registered")]
    NxListener,
    #[error("Unknown system flag")]
    NxFlag,
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Invalid message set")]
    InvalidRange,
    #[error("Mailbox metadata is corrupt")]
    CorruptMetadata,
    #[error("Unsupported mailbox metadata version {0}")]
    UnsupportedMetadataVersion(u32),
    #[error("Mailbox cannot be renamed to itself")]
    RenameToSelf,
    #[error("Mailbox cannot be renamed into itself")]
    RenameIntoSelf,
    #[error("Mailbox is full")]
    MailboxFull,
    #[error("Gave up inserting message")]
    GaveUpInsertion,
    #[error("Message too big")]
    MessageTooBig,
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    MailParse(#[from] mailparse::MailParseError),
}

/// The coarse classification of an `Error`, as seen by the protocol layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A mailbox, message, user or listener required to exist is absent.
    NotFound,
    /// An attempt to create something which is already there.
    AlreadyExists,
    /// An operation which is never permitted.
    PermissionDenied,
    /// A message set with non-positive or malformed bounds.
    InvalidRange,
    /// Persisted state could not be understood.
    Corrupted,
    /// A storage failure; may be transient.
    IoFailure,
    /// A request the caller must refuse (bad name, flag, size, etc).
    Rejected,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Error::NxMailbox
            | Error::NxMessage
            | Error::NxUser
            | Error::NxListener => ErrorKind::NotFound,
            Error::MailboxExists => ErrorKind::AlreadyExists,
            Error::PermissionDenied => ErrorKind::PermissionDenied,
            Error::InvalidRange => ErrorKind::InvalidRange,
            Error::CorruptMetadata
            | Error::UnsupportedMetadataVersion(_)
            | Error::Cbor(_)
            | Error::Toml(_)
            | Error::MailParse(_) => ErrorKind::Corrupted,
            Error::Io(_) | Error::GaveUpInsertion | Error::Logging(_) => {
                ErrorKind::IoFailure
            }
            Error::UnsafeName
            | Error::NxFlag
            | Error::RenameToSelf
            | Error::RenameIntoSelf
            | Error::MailboxFull
            | Error::MessageTooBig => ErrorKind::Rejected,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(ErrorKind::NotFound, Error::NxMessage.kind());
        assert_eq!(ErrorKind::AlreadyExists, Error::MailboxExists.kind());
        assert_eq!(ErrorKind::Corrupted, Error::CorruptMetadata.kind());
        assert_eq!(
            ErrorKind::IoFailure,
            Error::from(io::Error::new(io::ErrorKind::Other, "disk on fire"))
                .kind()
        );
        assert_eq!(ErrorKind::Rejected, Error::MessageTooBig.kind());
    }
}
