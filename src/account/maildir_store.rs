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

//! Implements the low-level message store.
//!
//! The message store holds the message files of one mailbox and nothing else.
//! It knows nothing of UIDs, flags, or sequence numbers; messages are
//! identified by their `StoreId`, which is simply their file name.
//!
//! # Layout
//!
//! - `tmp/`. Staging area. A message being delivered is fully written and
//!   synced here before it becomes visible.
//! - `cur/`. The visible set. Each file is exactly one message, and is never
//!   modified after it arrives.
//!
//! # Identities and order
//!
//! A message file is named `<stamp>.<pid>.eml`, where `stamp` is the number
//! of microseconds since the UNIX epoch at delivery in 16 lowercase hex
//! digits and `pid` is the delivering process in hex. Within one process the
//! stamp is forced to be strictly increasing, and `append_after` also forces
//! it past every stamp already in the store, so a clock stepped backwards
//! cannot make a new message sort before an old one. The store order is the
//! lexicographic order of the file names.
//!
//! Moving a staged file into `cur/` uses a non-clobbering rename. If the name
//! is somehow taken, a fresh stamp is drawn and the move retried.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::prelude::*;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms, IgnoreKinds};
use crate::support::safe_name::is_safe_name;

const MAX_DELIVERY_ATTEMPTS: u32 = 1000;
const EXTENSION: &str = ".eml";

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Identifies a message within a `MaildirStore`.
///
/// Ordering of `StoreId`s is the store order.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    /// Wrap a file name found in a store, if it is acceptable as an identity.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if is_safe_name(name) {
            Some(StoreId(name.to_owned()))
        } else {
            None
        }
    }

    /// Generate a fresh identity whose stamp is greater than `floor`.
    fn generate(floor: u64) -> Self {
        StoreId(format!(
            "{:016x}.{:x}{}",
            next_stamp(floor),
            std::process::id(),
            EXTENSION
        ))
    }

    /// The delivery stamp encoded in this identity, if it has one.
    pub fn stamp(&self) -> Option<u64> {
        let hex = self.0.split('.').next()?;
        if 16 != hex.len() {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn next_stamp(floor: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mut last = LAST_STAMP.load(SeqCst);
    loop {
        let next = now.max(last.max(floor).saturating_add(1));
        match LAST_STAMP.compare_exchange(last, next, SeqCst, SeqCst) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// The append-only message store of a single mailbox.
///
/// `MaildirStore` is stateless and cheap to clone; every call reflects the
/// current state on disk.
#[derive(Clone, Debug)]
pub struct MaildirStore {
    log_prefix: String,
    root: PathBuf,
    tmp: PathBuf,
    cur: PathBuf,
    message_mode: u32,
}

impl MaildirStore {
    /// Create a handle on the store rooted at `root`.
    ///
    /// Nothing is checked or created; see `init()`.
    pub fn new(log_prefix: String, root: PathBuf, message_mode: u32) -> Self {
        MaildirStore {
            log_prefix,
            tmp: root.join("tmp"),
            cur: root.join("cur"),
            root,
            message_mode,
        }
    }

    /// Create the store directories under `root` if they do not exist.
    pub fn init(root: &Path) -> io::Result<()> {
        for sub in &["tmp", "cur"] {
            fs::DirBuilder::new()
                .mode(0o750)
                .create(root.join(sub))
                .ignore_already_exists()?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deliver `data` as a new message.
    ///
    /// Either the whole message becomes visible or none of it does.
    pub fn append(&self, data: &[u8]) -> Result<StoreId, Error> {
        self.append_from(data)
    }

    /// Deliver a new message, reading it from `src` through its end.
    pub fn append_from(&self, src: impl Read) -> Result<StoreId, Error> {
        self.append_after(src, &[])
    }

    /// Deliver a new message which sorts after everything in `existing`.
    ///
    /// The wall clock alone cannot guarantee this, since it may have been
    /// stepped back since `existing` was delivered, or `existing` may come
    /// from another process.
    pub fn append_after(
        &self,
        mut src: impl Read,
        existing: &[StoreId],
    ) -> Result<StoreId, Error> {
        let floor = existing
            .iter()
            .filter_map(StoreId::stamp)
            .max()
            .unwrap_or(0);

        let mut staged = tempfile::NamedTempFile::new_in(&self.tmp)
            .on_not_found(Error::NxMailbox)?;
        io::copy(&mut src, &mut staged)?;
        staged.as_file_mut().flush()?;
        file_ops::chmod(staged.path(), self.message_mode)?;
        staged.as_file().sync_all()?;

        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            let id = StoreId::generate(floor);
            match staged.persist_noclobber(self.path_for(&id)) {
                Ok(_) => {
                    info!("{} Delivered message {}", self.log_prefix, id);
                    return Ok(id);
                }
                Err(e) if io::ErrorKind::AlreadyExists == e.error.kind() => {
                    info!(
                        "{} Lost race to deliver {}, trying another name",
                        self.log_prefix, id
                    );
                    staged = e.file;
                }
                Err(e) => {
                    error!(
                        "{} Failed to deliver message: {}",
                        self.log_prefix, e.error
                    );
                    return Err::<StoreId, _>(e.error)
                        .on_not_found(Error::NxMailbox);
                }
            }
        }

        error!(
            "{} Gave up delivering after {} attempts",
            self.log_prefix, MAX_DELIVERY_ATTEMPTS
        );
        Err(Error::GaveUpInsertion)
    }

    /// Return the identities of all visible messages, in store order.
    pub fn list(&self) -> Result<Vec<StoreId>, Error> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.cur).on_not_found(Error::NxMailbox)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(StoreId::from_file_name)
            {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Read the full content of the identified message.
    pub fn read(&self, id: &StoreId) -> Result<Vec<u8>, Error> {
        fs::read(self.path_for(id)).on_not_found(Error::NxMessage)
    }

    /// Return the size, in bytes, of the identified message.
    pub fn size(&self, id: &StoreId) -> Result<u64, Error> {
        Ok(fs::metadata(self.path_for(id))
            .on_not_found(Error::NxMessage)?
            .len())
    }

    /// Return the "internal date" of the identified message.
    ///
    /// This is the time the file was written.
    pub fn internal_date(&self, id: &StoreId) -> Result<DateTime<Utc>, Error> {
        let md =
            fs::metadata(self.path_for(id)).on_not_found(Error::NxMessage)?;
        Ok(DateTime::<Utc>::from(md.modified()?))
    }

    /// Permanently remove the identified message.
    pub fn delete(&self, id: &StoreId) -> Result<(), Error> {
        fs::remove_file(self.path_for(id)).on_not_found(Error::NxMessage)?;
        info!("{} Deleted message {}", self.log_prefix, id);
        Ok(())
    }

    fn path_for(&self, id: &StoreId) -> PathBuf {
        self.cur.join(id.as_str())
    }
}
