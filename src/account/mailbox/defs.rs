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

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;

use crate::account::maildir_store::{MaildirStore, StoreId};
use crate::account::metadata::MailboxMetadata;
use crate::account::model::*;
use crate::support::error::Error;
use crate::support::file_ops::ErrorTransforms;
use crate::support::system_config::StorageConfig;

/// Receives change notifications from a `Mailbox`.
///
/// Notifications are delivered on the thread which made the change, after
/// the mailbox lock has been released. Implementations must not block.
pub trait MailboxListener: Send + Sync {
    /// New messages were discovered. `exists` and `recent` are the resulting
    /// message and `\Recent` counts.
    fn new_messages(&self, exists: usize, recent: usize);
    /// The flags of some messages changed. Only messages whose flags actually
    /// changed are included.
    fn flags_changed(&self, changes: &BTreeMap<Seqnum, FlagSet>);
    /// The messages with the given UIDs were expunged.
    fn expunged(&self, uids: &[Uid]);
}

/// Identifies a listener registered with `Mailbox::add_listener`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A change to report to listeners once the lock is released.
#[derive(Debug)]
pub(super) enum Event {
    NewMessages { exists: usize, recent: usize },
    FlagsChanged(BTreeMap<Seqnum, FlagSet>),
    Expunged(Vec<Uid>),
}

/// An open mailbox.
///
/// Mailboxes are shared through `Arc`; all methods take `&self`.
pub struct Mailbox {
    state: RwLock<MailboxState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn MailboxListener>)>>,
    next_listener_id: AtomicU64,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.state.try_read() {
            Ok(state) => write!(f, "Mailbox({})", state.name),
            Err(_) => write!(f, "Mailbox(<locked>)"),
        }
    }
}

pub(super) struct MailboxState {
    pub(super) log_prefix: String,
    pub(super) name: String,
    pub(super) root: PathBuf,
    pub(super) message_mode: u32,
    pub(super) store: MaildirStore,
    pub(super) metadata: MailboxMetadata,
}

impl MailboxState {
    /// List the store in mailbox order.
    ///
    /// Messages which have UIDs come first, in UID order; the rest follow in
    /// store order, which is the order they will be assigned UIDs in. Thus
    /// sequence numbers always ascend with UIDs, even if a message file
    /// sorts before older ones in the store.
    pub(super) fn list(&self) -> Result<Vec<StoreId>, Error> {
        let mut ids = self.store.list()?;
        ids.sort_by(|a, b| {
            let (ua, ub) = (self.metadata.uid(a), self.metadata.uid(b));
            (ua.is_none(), ua)
                .cmp(&(ub.is_none(), ub))
                .then_with(|| a.cmp(b))
        });
        Ok(ids)
    }

    /// Assign UIDs to everything in `ids` which lacks one.
    ///
    /// If anything was assigned, returns the event to report.
    pub(super) fn ensure_uids_assigned(
        &mut self,
        ids: &[StoreId],
    ) -> Result<Option<Event>, Error> {
        if self.metadata.assign_missing_uids(ids)?.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Event::NewMessages {
                exists: ids.len(),
                recent: self.count_flagged(ids, &Flag::Recent),
            }))
        }
    }

    /// Count the messages in `ids` which have `flag`.
    pub(super) fn count_flagged(&self, ids: &[StoreId], flag: &Flag) -> usize {
        ids.iter()
            .filter_map(|id| self.metadata.uid(id))
            .filter(|&uid| self.metadata.has_flag(uid, flag))
            .count()
    }
}

impl Mailbox {
    /// Open the mailbox whose directory is `root`.
    ///
    /// The store must already exist; metadata is initialised if missing.
    pub fn open(
        log_prefix: String,
        name: String,
        root: PathBuf,
        config: &StorageConfig,
    ) -> Result<Arc<Self>, Error> {
        if !root.join("cur").is_dir() {
            return Err(Error::NxMailbox);
        }

        let store = MaildirStore::new(
            log_prefix.clone(),
            root.clone(),
            config.message_mode,
        );
        let metadata = MailboxMetadata::load(
            log_prefix.clone(),
            &root,
            root.join("tmp"),
            config.metadata_mode,
        )?;

        info!(
            "{} Opened mailbox, UID validity {}",
            log_prefix,
            metadata.uid_validity()
        );

        Ok(Arc::new(Mailbox {
            state: RwLock::new(MailboxState {
                log_prefix,
                name,
                root,
                message_mode: config.message_mode,
                store,
                metadata,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }))
    }

    pub(super) fn read_state(&self) -> RwLockReadGuard<'_, MailboxState> {
        self.state.read().expect("mailbox lock poisoned")
    }

    pub(super) fn write_state(&self) -> RwLockWriteGuard<'_, MailboxState> {
        self.state.write().expect("mailbox lock poisoned")
    }

    /// Run `f` on the current store listing, with every listed message
    /// having a UID.
    ///
    /// `f` runs under the read lock if no assignment is needed, and under the
    /// write lock otherwise.
    pub(super) fn with_snapshot<R>(
        &self,
        f: impl Fn(&MailboxState, &[StoreId]) -> Result<R, Error>,
    ) -> Result<R, Error> {
        {
            let state = self.read_state();
            let ids = state.list()?;
            if state.metadata.all_assigned(&ids) {
                return f(&state, &ids);
            }
        }

        let (ret, event) = {
            let mut state = self.write_state();
            let ids = state.list()?;
            let event = state.ensure_uids_assigned(&ids)?;
            (f(&state, &ids)?, event)
        };

        self.notify(event);
        Ok(ret)
    }

    /// Take the write lock and list the store, assigning UIDs to anything
    /// new.
    ///
    /// Any event from the assignment is pushed onto `events`.
    pub(super) fn write_snapshot(
        &self,
        events: &mut Vec<Event>,
    ) -> Result<(RwLockWriteGuard<'_, MailboxState>, Vec<StoreId>), Error> {
        let mut state = self.write_state();
        let ids = state.list()?;
        events.extend(state.ensure_uids_assigned(&ids)?);
        Ok((state, ids))
    }

    /// Register `listener` to be told about changes to this mailbox.
    pub fn add_listener(&self, listener: Arc<dyn MailboxListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, SeqCst));
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    /// Unregister a listener added by `add_listener`.
    pub fn remove_listener(&self, id: ListenerId) -> Result<(), Error> {
        let mut listeners =
            self.listeners.lock().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|&(lid, _)| lid != id);
        if listeners.len() == before {
            Err(Error::NxListener)
        } else {
            Ok(())
        }
    }

    /// Deliver `events` to every listener.
    ///
    /// Must not be called with the state lock held.
    pub(super) fn notify(&self, events: impl IntoIterator<Item = Event>) {
        let mut events = events.into_iter().peekable();
        if events.peek().is_none() {
            return;
        }

        let listeners: Vec<Arc<dyn MailboxListener>> = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for event in events {
            for listener in &listeners {
                match event {
                    Event::NewMessages { exists, recent } => {
                        listener.new_messages(exists, recent)
                    }
                    Event::FlagsChanged(ref changes) => {
                        listener.flags_changed(changes)
                    }
                    Event::Expunged(ref uids) => listener.expunged(uids),
                }
            }
        }
    }

    /// The canonical name of this mailbox.
    pub fn name(&self) -> String {
        self.read_state().name.clone()
    }

    /// The directory holding this mailbox.
    pub fn path(&self) -> PathBuf {
        self.read_state().root.clone()
    }

    /// Move this mailbox to the directory `new_root` under the name
    /// `new_name`.
    ///
    /// The move happens under the write lock, so no operation sees the
    /// mailbox half-moved.
    pub(crate) fn relocate(
        &self,
        log_prefix: String,
        new_name: String,
        new_root: &Path,
    ) -> Result<(), Error> {
        let mut state = self.write_state();
        fs::rename(&state.root, new_root)
            .on_exists(Error::MailboxExists)
            .on_not_found(Error::NxMailbox)?;

        info!(
            "{} Renamed to {} ({})",
            state.log_prefix,
            new_name,
            new_root.display()
        );

        state.store = MaildirStore::new(
            log_prefix.clone(),
            new_root.to_owned(),
            state.message_mode,
        );
        state.metadata.relocate(
            log_prefix.clone(),
            new_root,
            new_root.join("tmp"),
        );
        state.log_prefix = log_prefix;
        state.name = new_name;
        state.root = new_root.to_owned();
        Ok(())
    }

    /// Destroying mailboxes is not supported.
    pub fn destroy(&self) -> Result<(), Error> {
        Err(Error::PermissionDenied)
    }
}
