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

use lazy_static::lazy_static;

use super::defs::*;
use crate::account::model::*;
use crate::support::error::Error;

lazy_static! {
    static ref PERMANENT_FLAGS: Vec<Flag> = vec![
        Flag::Seen,
        Flag::Answered,
        Flag::Flagged,
        Flag::Deleted,
        Flag::Draft,
        Flag::Recent,
    ];
}

/// The separator between components of a mailbox name.
pub const HIERARCHY_DELIMITER: char = '.';

impl Mailbox {
    pub fn hierarchical_delimiter(&self) -> char {
        HIERARCHY_DELIMITER
    }

    /// The fixed flag vocabulary advertised for every mailbox.
    pub fn flags(&self) -> &'static [Flag] {
        &PERMANENT_FLAGS
    }

    /// Whether clients may treat this mailbox as read-write.
    ///
    /// Mailboxes are always advertised read-only; `store_flags` and
    /// `expunge` work regardless.
    pub fn is_writeable(&self) -> bool {
        false
    }

    pub fn message_count(&self) -> Result<usize, Error> {
        self.with_snapshot(|_, ids| Ok(ids.len()))
    }

    /// The number of messages without `\Seen`.
    pub fn unseen_count(&self) -> Result<usize, Error> {
        self.with_snapshot(|state, ids| {
            Ok(ids.len() - state.count_flagged(ids, &Flag::Seen))
        })
    }

    /// The number of messages with `\Recent`.
    pub fn recent_count(&self) -> Result<usize, Error> {
        self.with_snapshot(|state, ids| {
            Ok(state.count_flagged(ids, &Flag::Recent))
        })
    }

    pub fn uid_validity(&self) -> u32 {
        self.read_state().metadata.uid_validity()
    }

    /// The UID the next message will get, or `None` if the UID space is
    /// exhausted.
    pub fn uid_next(&self) -> Option<Uid> {
        self.read_state().metadata.uid_next()
    }

    /// Return the UID of the message currently at `seqnum`.
    pub fn uid_of(&self, seqnum: Seqnum) -> Result<Uid, Error> {
        self.with_snapshot(|state, ids| {
            ids.get(seqnum.to_index())
                .and_then(|id| state.metadata.uid(id))
                .ok_or(Error::NxMessage)
        })
    }

    /// Answer a `STATUS` request, filling in only the requested items.
    pub fn request_status(
        &self,
        request: &StatusRequest,
    ) -> Result<StatusResponse, Error> {
        self.with_snapshot(|state, ids| {
            let count_if = |wanted: bool, flag: &Flag| {
                if wanted {
                    Some(state.count_flagged(ids, flag))
                } else {
                    None
                }
            };

            Ok(StatusResponse {
                name: state.name.clone(),
                messages: Some(ids.len()).filter(|_| request.messages),
                recent: count_if(request.recent, &Flag::Recent),
                uid_next: state.metadata.uid_next().filter(|_| request.uid_next),
                uid_validity: Some(state.metadata.uid_validity())
                    .filter(|_| request.uid_validity),
                unseen: count_if(request.unseen, &Flag::Seen)
                    .map(|seen| ids.len() - seen),
            })
        })
    }

    pub fn is_subscribed(&self) -> bool {
        self.read_state().metadata.is_subscribed()
    }

    pub fn subscribe(&self) -> Result<(), Error> {
        self.write_state().metadata.set_subscribed(true)
    }

    pub fn unsubscribe(&self) -> Result<(), Error> {
        self.write_state().metadata.set_subscribed(false)
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;
    use super::*;

    #[test]
    fn counts() {
        let setup = set_up();
        assert_eq!(0, setup.mailbox.message_count().unwrap());
        assert_eq!(0, setup.mailbox.unseen_count().unwrap());
        assert_eq!(0, setup.mailbox.recent_count().unwrap());
        assert_eq!(Some(Uid::MIN), setup.mailbox.uid_next());

        for _ in 0..4 {
            simple_append(&setup.mailbox);
        }
        setup
            .mailbox
            .store_flags(
                &MessageSet::range(1, 2),
                &flags(&[Flag::Seen]),
                StoreMode::Add,
                false,
            )
            .unwrap();
        setup
            .mailbox
            .store_flags(
                &MessageSet::just(4),
                &flags(&[Flag::Recent]),
                StoreMode::Remove,
                true,
            )
            .unwrap();

        assert_eq!(4, setup.mailbox.message_count().unwrap());
        assert_eq!(2, setup.mailbox.unseen_count().unwrap());
        assert_eq!(3, setup.mailbox.recent_count().unwrap());
        assert_eq!(Some(Uid::u(5)), setup.mailbox.uid_next());
        assert_eq!(Uid::u(3), setup.mailbox.uid_of(Seqnum::u(3)).unwrap());
        assert_matches!(
            Err(Error::NxMessage),
            setup.mailbox.uid_of(Seqnum::u(5))
        );
    }

    #[test]
    fn status_fills_only_requested_items() {
        let setup = set_up();
        simple_append(&setup.mailbox);

        let status = setup
            .mailbox
            .request_status(&StatusRequest {
                messages: true,
                unseen: true,
                ..StatusRequest::default()
            })
            .unwrap();
        assert_eq!(
            StatusResponse {
                name: "INBOX".to_owned(),
                messages: Some(1),
                unseen: Some(1),
                ..StatusResponse::default()
            },
            status
        );

        let status = setup
            .mailbox
            .request_status(&StatusRequest::all())
            .unwrap();
        assert_eq!(Some(1), status.recent);
        assert_eq!(Some(Uid::u(2)), status.uid_next);
        assert_eq!(Some(setup.mailbox.uid_validity()), status.uid_validity);
    }

    #[test]
    fn uid_validity_is_stable_across_opens() {
        let setup = set_up();
        simple_append(&setup.mailbox);
        let validity = setup.mailbox.uid_validity();
        assert_ne!(0, validity);
        assert_eq!(validity, setup.fresh_metadata().uid_validity());
    }

    #[test]
    fn subscription() {
        let setup = set_up();
        assert!(!setup.mailbox.is_subscribed());
        setup.mailbox.subscribe().unwrap();
        assert!(setup.mailbox.is_subscribed());
        assert!(setup.fresh_metadata().is_subscribed());
        setup.mailbox.unsubscribe().unwrap();
        assert!(!setup.fresh_metadata().is_subscribed());
    }

    #[test]
    fn fixed_attributes() {
        let setup = set_up();
        assert_eq!('.', setup.mailbox.hierarchical_delimiter());
        assert!(!setup.mailbox.is_writeable());
        assert_eq!(6, setup.mailbox.flags().len());
        assert!(setup.mailbox.flags().contains(&Flag::Deleted));
    }
}
