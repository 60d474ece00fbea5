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

//! Resolution of client message sets against a snapshot of the store.

use crate::account::maildir_store::StoreId;
use crate::account::model::*;
use crate::support::error::Error;

/// One message selected by a message set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub seqnum: Seqnum,
    pub uid: Uid,
    pub id: StoreId,
}

/// Resolve `set` against `ids`, which must be the identities currently in
/// the store, in store order.
///
/// `uid_of` looks up the UID of an identity. UIDs are expected to already be
/// assigned to everything in `ids`; an identity without one cannot be
/// addressed and is skipped.
///
/// If `by_uid` is false, `set` is in sequence number space: `*` is the number
/// of messages, and numbers past that are dropped. If `by_uid` is true, `set`
/// is in UID space: `*` is the greatest UID in the mailbox, or 0 if the
/// mailbox is empty, and UIDs not in the mailbox are dropped.
///
/// The result is in store order. It may be empty; the only error is
/// `InvalidRange`, for sets which are malformed regardless of the mailbox.
pub fn resolve(
    set: &MessageSet,
    by_uid: bool,
    ids: &[StoreId],
    uid_of: impl Fn(&StoreId) -> Option<Uid>,
) -> Result<Vec<Resolved>, Error> {
    set.validate()?;

    if by_uid {
        let largest = ids
            .iter()
            .filter_map(|id| uid_of(id))
            .max()
            .map_or(0, u32::from);
        let range = set.to_seq_range::<Uid>(largest);

        Ok(ids
            .iter()
            .enumerate()
            .filter_map(|(ix, id)| {
                uid_of(id).filter(|&uid| range.contains(uid)).map(|uid| {
                    Resolved {
                        seqnum: Seqnum::from_index(ix),
                        uid,
                        id: id.clone(),
                    }
                })
            })
            .collect())
    } else {
        let count = ids.len() as u32;
        let range = set.to_seq_range::<Seqnum>(count);

        Ok(range
            .items(count)
            .filter_map(|seqnum| {
                let id = &ids[seqnum.to_index()];
                uid_of(id).map(|uid| Resolved {
                    seqnum,
                    uid,
                    id: id.clone(),
                })
            })
            .collect())
    }
}
