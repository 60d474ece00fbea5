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

//! Support for working with a single mailbox.
//!
//! A mailbox is a directory holding a `MaildirStore` (`tmp/` and `cur/`) and
//! the mailbox metadata (`metadata.cbor`). It is functionally independent
//! from any other mailbox, including its inferiors.
//!
//! ## Locking
//!
//! All state of an open mailbox sits behind one read-write lock. Queries take
//! the read lock. Anything which changes the metadata takes the write lock
//! and does not release it until the change has been persisted.
//!
//! Messages which arrive in the store are only given UIDs when something
//! needs them. A query which finds unassigned messages does not assign them
//! under its read lock; instead it drops the read lock, takes the write lock,
//! assigns UIDs explicitly, and then answers under that lock.
//!
//! Only one `Mailbox` may be open on a given directory at a time; the
//! `UserAccount` registry ensures this within a process. Nothing coordinates
//! separate processes.
//!
//! ## Sequence numbers
//!
//! The sequence number of a message is its 1-based position in the mailbox
//! listing at the time of the call. The listing is ordered by UID, and new
//! messages are given UIDs in store order after everything already known,
//! so the sequence number is always the rank of the UID.
//!
//! ## About the layout of this module
//!
//! This module is collectively a single abstraction, i.e., it should be
//! thought of as one large rust file. It is simply split apart because it's
//! unwieldy otherwise.

// Basic struct definitions, opening, listeners
mod defs;
pub use defs::{ListenerId, Mailbox, MailboxListener};

mod resolve;
pub use resolve::{resolve, Resolved};

// IMAP commands
mod expunge; // EXPUNGE
mod fetch; // FETCH, UID FETCH, APPEND
mod flags; // STORE, UID STORE
mod status; // SELECT/EXAMINE data, STATUS, subscriptions
pub use status::HIERARCHY_DELIMITER;
pub use fetch::FetchIter;

#[cfg(test)]
mod test_prelude {
    pub(super) use super::defs::*;

    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use crate::account::maildir_store::MaildirStore;
    use crate::account::metadata::MailboxMetadata;
    use crate::account::model::*;
    use crate::support::system_config::StorageConfig;

    pub(super) struct Setup {
        pub root: TempDir,
        pub mailbox: Arc<Mailbox>,
    }

    impl Setup {
        /// Reload the metadata from disk, independently of `mailbox`.
        pub fn fresh_metadata(&self) -> MailboxMetadata {
            let root = self.root.path().join("INBOX");
            MailboxMetadata::load(
                "fresh".to_owned(),
                &root,
                root.join("tmp"),
                0o600,
            )
            .unwrap()
        }
    }

    pub(super) fn set_up() -> Setup {
        crate::init_test_log();
        let root = TempDir::new().unwrap();
        let mbox_root = root.path().join("INBOX");
        std::fs::create_dir(&mbox_root).unwrap();
        MaildirStore::init(&mbox_root).unwrap();

        let mailbox = Mailbox::open(
            "mailbox".to_owned(),
            "INBOX".to_owned(),
            mbox_root,
            &StorageConfig::default(),
        )
        .unwrap();

        Setup { root, mailbox }
    }

    pub(super) fn simple_append(dst: &Mailbox) -> Uid {
        dst.append(b"Subject: foo\r\n\r\nfoobar").unwrap()
    }

    pub(super) fn flags(flags: &[Flag]) -> FlagSet {
        flags.iter().cloned().collect()
    }

    /// Records every notification it receives.
    #[derive(Default)]
    pub(super) struct RecordingListener {
        pub new_messages: Mutex<Vec<(usize, usize)>>,
        pub flags_changed: Mutex<Vec<BTreeMap<Seqnum, FlagSet>>>,
        pub expunged: Mutex<Vec<Vec<Uid>>>,
    }

    impl MailboxListener for RecordingListener {
        fn new_messages(&self, exists: usize, recent: usize) {
            self.new_messages.lock().unwrap().push((exists, recent));
        }

        fn flags_changed(&self, changes: &BTreeMap<Seqnum, FlagSet>) {
            self.flags_changed.lock().unwrap().push(changes.clone());
        }

        fn expunged(&self, uids: &[Uid]) {
            self.expunged.lock().unwrap().push(uids.to_vec());
        }
    }
}
