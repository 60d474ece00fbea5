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

use std::io::Read;
use std::vec;

use super::defs::*;
use super::resolve::resolve;
use crate::account::maildir_store::{MaildirStore, StoreId};
use crate::account::message::Message;
use crate::account::model::*;
use crate::support::error::Error;

/// The lazy result of `Mailbox::fetch`.
///
/// The message set was resolved, and each message's UID and flags captured,
/// when the fetch was made. Message content is only read from the store as
/// the iterator advances, without holding the mailbox lock. A message
/// expunged in the meantime produces `Err(NxMessage)` in its place; the
/// iterator continues after it.
#[derive(Debug)]
pub struct FetchIter {
    store: MaildirStore,
    items: vec::IntoIter<(Seqnum, Uid, FlagSet, StoreId)>,
}

impl Iterator for FetchIter {
    type Item = Result<(Seqnum, Message), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let (seqnum, uid, flags, id) = self.items.next()?;
        Some(self.load(&id).map(|(raw, internal_date)| {
            (seqnum, Message::new(uid, flags, raw, internal_date))
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for FetchIter {}

impl FetchIter {
    fn load(
        &self,
        id: &StoreId,
    ) -> Result<(Vec<u8>, chrono::DateTime<chrono::Utc>), Error> {
        let internal_date = self.store.internal_date(id)?;
        let raw = self.store.read(id)?;
        Ok((raw, internal_date))
    }
}

impl Mailbox {
    /// Deliver a new message into this mailbox, returning its UID.
    pub fn append(&self, data: &[u8]) -> Result<Uid, Error> {
        self.append_from(data)
    }

    /// Deliver a new message read from `src`, returning its UID.
    ///
    /// Listeners are told about the new message (and any others discovered
    /// along the way).
    pub fn append_from(&self, src: impl Read) -> Result<Uid, Error> {
        let mut events = Vec::new();
        let uid = {
            let mut state = self.write_state();
            let existing = state.store.list()?;
            let id = state.store.append_after(src, &existing)?;
            let ids = state.list()?;
            events.extend(state.ensure_uids_assigned(&ids)?);
            state.metadata.uid(&id).ok_or(Error::NxMessage)?
        };

        self.notify(events);
        Ok(uid)
    }

    /// Fetch the messages in `set`, which is in UID space if `by_uid` and in
    /// sequence number space otherwise.
    ///
    /// Members of `set` which do not name a message are ignored.
    pub fn fetch(
        &self,
        set: &MessageSet,
        by_uid: bool,
    ) -> Result<FetchIter, Error> {
        self.with_snapshot(|state, ids| {
            let items = resolve(set, by_uid, ids, |id| state.metadata.uid(id))?
                .into_iter()
                .map(|r| (r.seqnum, r.uid, state.metadata.flags(r.uid), r.id))
                .collect::<Vec<_>>();

            Ok(FetchIter {
                store: state.store.clone(),
                items: items.into_iter(),
            })
        })
    }
}
