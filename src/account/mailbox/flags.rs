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

use log::info;

use super::defs::*;
use super::resolve::resolve;
use crate::account::model::*;
use crate::support::error::Error;

impl Mailbox {
    /// Change the flags of every message in `set`.
    ///
    /// `set` is in UID space if `by_uid` and in sequence number space
    /// otherwise. Members which do not name a message are skipped.
    ///
    /// All changes are applied together and persisted atomically before this
    /// returns, whichever way the set was addressed.
    ///
    /// Returns the resulting flags of every message in the set, keyed by
    /// sequence number. Listeners are only told about messages whose flags
    /// actually changed.
    pub fn store_flags(
        &self,
        set: &MessageSet,
        flags: &FlagSet,
        mode: StoreMode,
        by_uid: bool,
    ) -> Result<BTreeMap<Seqnum, FlagSet>, Error> {
        let mut events = Vec::new();
        let result = {
            let (mut state, ids) = self.write_snapshot(&mut events)?;
            let resolved =
                resolve(set, by_uid, &ids, |id| state.metadata.uid(id))?;

            let mut result = BTreeMap::new();
            let mut changed = BTreeMap::new();
            for r in resolved {
                let (new_flags, did_change) =
                    state.metadata.apply_flags(r.uid, flags, mode);
                if did_change {
                    changed.insert(r.seqnum, new_flags.clone());
                }
                result.insert(r.seqnum, new_flags);
            }

            if !changed.is_empty() {
                state.metadata.commit()?;
                info!(
                    "{} Changed flags of {} message(s)",
                    state.log_prefix,
                    changed.len()
                );
                events.push(Event::FlagsChanged(changed));
            }

            result
        };

        self.notify(events);
        Ok(result)
    }
}
