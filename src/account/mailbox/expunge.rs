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

use log::{error, info};

use super::defs::*;
use crate::account::model::*;
use crate::support::error::Error;

impl Mailbox {
    /// Permanently remove every message with the `\Deleted` flag.
    ///
    /// Message files are removed first; a file which is already gone counts
    /// as removed. The UIDs and flags of the removed messages are then
    /// forgotten and the metadata persisted. UIDs of the survivors are
    /// unchanged, though their sequence numbers shift down.
    ///
    /// Returns the UIDs that were removed, in ascending order.
    ///
    /// If removing a file fails, expunging stops there and the error is
    /// returned. The messages removed before the failure are still forgotten
    /// and persisted, and their UIDs reach the caller only through the
    /// `expunged` notification to listeners. A caller which must report them
    /// should keep a listener registered; the messages not yet removed keep
    /// `\Deleted` and are picked up by the next `expunge`.
    ///
    /// This is the `EXPUNGE` operation from RFC 3501, and is also used for
    /// `CLOSE`.
    pub fn expunge(&self) -> Result<Vec<Uid>, Error> {
        let mut events = Vec::new();
        let result = self.expunge_locked(&mut events);
        self.notify(events);
        result
    }

    fn expunge_locked(&self, events: &mut Vec<Event>) -> Result<Vec<Uid>, Error> {
        let (mut state, ids) = self.write_snapshot(events)?;

        let doomed = ids
            .iter()
            .filter_map(|id| state.metadata.uid(id).map(|uid| (uid, id)))
            .filter(|&(uid, _)| state.metadata.has_flag(uid, &Flag::Deleted))
            .collect::<Vec<_>>();

        let mut removed_ids = Vec::with_capacity(doomed.len());
        let mut removed_uids = Vec::with_capacity(doomed.len());
        let mut failure = None;
        for (uid, id) in doomed {
            match state.store.delete(id) {
                Ok(()) | Err(Error::NxMessage) => {
                    info!("{} Expunged UID {}", state.log_prefix, uid);
                    removed_ids.push(id.clone());
                    removed_uids.push(uid);
                }
                Err(e) => {
                    error!(
                        "{} Failed to expunge UID {}: {}",
                        state.log_prefix, uid, e
                    );
                    failure = Some(e);
                    break;
                }
            }
        }

        // Whatever was removed is gone for good, so the metadata must catch
        // up even if something else failed.
        let live = ids
            .iter()
            .filter(|id| !removed_ids.contains(id))
            .cloned()
            .collect::<Vec<_>>();
        state.metadata.forget(&removed_ids);
        let stale = state.metadata.prune(&live);
        if !removed_uids.is_empty() || !stale.is_empty() {
            state.metadata.commit()?;
        }
        if !removed_uids.is_empty() {
            removed_uids.sort_unstable();
            events.push(Event::Expunged(removed_uids.clone()));
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(removed_uids),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::super::test_prelude::*;
    use super::*;

    #[test]
    fn expunge_scenario() {
        let setup = set_up();
        let uids = (0..3)
            .map(|_| simple_append(&setup.mailbox))
            .collect::<Vec<_>>();
        assert_eq!(vec![Uid::u(1), Uid::u(2), Uid::u(3)], uids);

        setup
            .mailbox
            .store_flags(
                &MessageSet::just(2),
                &flags(&[Flag::Deleted]),
                StoreMode::Add,
                true,
            )
            .unwrap();

        let listener = Arc::new(RecordingListener::default());
        setup.mailbox.add_listener(listener.clone());

        assert_eq!(vec![Uid::u(2)], setup.mailbox.expunge().unwrap());
        assert_eq!(vec![vec![Uid::u(2)]], *listener.expunged.lock().unwrap());

        assert_eq!(2, setup.mailbox.message_count().unwrap());
        assert_eq!(Uid::u(1), setup.mailbox.uid_of(Seqnum::u(1)).unwrap());
        assert_eq!(Uid::u(3), setup.mailbox.uid_of(Seqnum::u(2)).unwrap());
        assert_matches!(
            Err(Error::NxMessage),
            setup.mailbox.uid_of(Seqnum::u(3))
        );

        // The UID is gone and never reused
        assert_eq!(
            0,
            setup
                .mailbox
                .fetch(&MessageSet::just(2), true)
                .unwrap()
                .count()
        );
        assert_eq!(Uid::u(4), simple_append(&setup.mailbox));

        let md = setup.fresh_metadata();
        assert_eq!(3, md.record().uids.len());
        assert!(md.flags(Uid::u(2)).is_empty());
        assert!(!md.record().uids.values().any(|&u| u == Uid::u(2)));
    }

    #[test]
    fn expunge_removes_exactly_the_deleted() {
        let setup = set_up();
        for _ in 0..6 {
            simple_append(&setup.mailbox);
        }
        setup
            .mailbox
            .store_flags(
                &MessageSet::parse("1,3,5:6").unwrap(),
                &flags(&[Flag::Deleted]),
                StoreMode::Add,
                false,
            )
            .unwrap();

        assert_eq!(
            vec![Uid::u(1), Uid::u(3), Uid::u(5), Uid::u(6)],
            setup.mailbox.expunge().unwrap()
        );

        let survivors = setup
            .mailbox
            .fetch(&MessageSet::all(), false)
            .unwrap()
            .map(|r| r.unwrap())
            .map(|(seqnum, msg)| {
                assert!(!msg.flags().contains(&Flag::Deleted));
                (seqnum.0.get(), msg.uid().0.get())
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(1, 2), (2, 4)], survivors);

        assert!(setup.mailbox.expunge().unwrap().is_empty());
    }

    #[test]
    fn expunge_of_missing_file_succeeds_quietly() {
        let setup = set_up();
        simple_append(&setup.mailbox);
        setup
            .mailbox
            .store_flags(
                &MessageSet::all(),
                &flags(&[Flag::Deleted]),
                StoreMode::Add,
                false,
            )
            .unwrap();

        // Delete the file out from under the mailbox
        let cur = setup.mailbox.path().join("cur");
        for entry in std::fs::read_dir(&cur).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }

        assert!(setup.mailbox.expunge().unwrap().is_empty());
        assert!(setup.fresh_metadata().record().uids.is_empty());
    }

    #[test]
    fn expunge_empty_mailbox() {
        let setup = set_up();
        assert!(setup.mailbox.expunge().unwrap().is_empty());
        assert_eq!(0, setup.mailbox.message_count().unwrap());
    }

    #[test]
    fn failed_removal_keeps_earlier_progress() {
        let setup = set_up();
        for _ in 0..3 {
            simple_append(&setup.mailbox);
        }
        setup
            .mailbox
            .store_flags(
                &MessageSet::parse("1,3").unwrap(),
                &flags(&[Flag::Deleted]),
                StoreMode::Add,
                false,
            )
            .unwrap();

        // Make the third message impossible to unlink
        let cur = setup.mailbox.path().join("cur");
        let mut files = std::fs::read_dir(&cur)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect::<Vec<_>>();
        files.sort();
        std::fs::remove_file(&files[2]).unwrap();
        std::fs::create_dir(&files[2]).unwrap();
        std::fs::write(files[2].join("blocker"), b"x").unwrap();

        let listener = Arc::new(RecordingListener::default());
        setup.mailbox.add_listener(listener.clone());

        assert_matches!(Err(Error::Io(_)), setup.mailbox.expunge());
        assert_eq!(vec![vec![Uid::u(1)]], *listener.expunged.lock().unwrap());

        let md = setup.fresh_metadata();
        assert!(!md.record().uids.values().any(|&u| u == Uid::u(1)));
        assert!(md.has_flag(Uid::u(3), &Flag::Deleted));
        assert_eq!(2, setup.mailbox.message_count().unwrap());

        // Once the obstacle is gone, the rest is expunged
        std::fs::remove_dir_all(&files[2]).unwrap();
        assert!(setup.mailbox.expunge().unwrap().is_empty());
        assert_eq!(1, setup.fresh_metadata().record().uids.len());
    }
}
