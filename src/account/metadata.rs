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

//! Durable per-mailbox bookkeeping: UIDs, flags, UID validity and
//! subscription.
//!
//! The whole state lives in one file, `metadata.cbor`, in the mailbox
//! directory. It is CBOR of `MetadataFile`, which wraps the actual
//! `MetadataRecord` with a format version. Every field of the record has a
//! default so that fields added later can be read by older files.
//!
//! The file is only ever replaced whole, by staging the new content in the
//! mailbox's `tmp/` directory and renaming it over the old one, so a reader
//! sees either the old or the new state.
//!
//! In-memory state is changed first and persisted before anything is
//! reported to the caller. If persisting fails, the in-memory state is rolled
//! back by reloading the file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};

use super::maildir_store::StoreId;
use super::model::*;
use crate::support::error::Error;
use crate::support::file_ops;

pub const METADATA_FILE: &str = "metadata.cbor";
const CORRUPT_SUFFIX: &str = ".corrupt";
const CURRENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug)]
struct MetadataFile {
    version: u32,
    #[serde(default)]
    record: MetadataRecord,
}

/// The persisted state of a mailbox.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataRecord {
    pub flags: BTreeMap<Uid, FlagSet>,
    pub uids: BTreeMap<StoreId, Uid>,
    /// The next UID to assign, or 0 once `Uid::MAX` has been assigned.
    pub uidnext: u32,
    pub uidvalidity: u32,
    pub subscribed: bool,
}

impl Default for MetadataRecord {
    fn default() -> Self {
        MetadataRecord {
            flags: BTreeMap::new(),
            uids: BTreeMap::new(),
            uidnext: 1,
            uidvalidity: 0,
            subscribed: false,
        }
    }
}

impl MetadataRecord {
    /// A fresh record for a new mailbox generation.
    pub fn fresh() -> Self {
        MetadataRecord {
            uidvalidity: new_uid_validity(),
            ..MetadataRecord::default()
        }
    }

    /// Encode this record in the current file format.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        #[derive(Serialize)]
        struct MetadataFileRef<'a> {
            version: u32,
            record: &'a MetadataRecord,
        }

        Ok(serde_cbor::to_vec(&MetadataFileRef {
            version: CURRENT_VERSION,
            record: self,
        })?)
    }

    /// Decode a record from the file format.
    ///
    /// Anything that does not decode is `CorruptMetadata`. Files written by a
    /// newer format version are refused with `UnsupportedMetadataVersion`.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let file: MetadataFile =
            serde_cbor::from_slice(data).map_err(|_| Error::CorruptMetadata)?;
        if file.version > CURRENT_VERSION {
            return Err(Error::UnsupportedMetadataVersion(file.version));
        }
        if 0 == file.record.uidvalidity {
            return Err(Error::CorruptMetadata);
        }
        Ok(file.record)
    }
}

fn new_uid_validity() -> u32 {
    OsRng.gen::<u32>().max(1)
}

/// The live metadata of one open mailbox.
#[derive(Debug)]
pub struct MailboxMetadata {
    log_prefix: String,
    path: PathBuf,
    tmp: PathBuf,
    mode: u32,
    record: MetadataRecord,
}

impl MailboxMetadata {
    /// Load the metadata stored in the mailbox directory `root`, whose
    /// staging directory is `tmp`.
    ///
    /// If there is no metadata yet, defaults are synthesised and persisted
    /// immediately. If the metadata is corrupt, it is moved aside and replaced
    /// by defaults with a new UID validity; all prior flags are lost and UIDs
    /// will be reassigned.
    pub fn load(
        log_prefix: String,
        root: &Path,
        tmp: PathBuf,
        mode: u32,
    ) -> Result<Self, Error> {
        let mut this = MailboxMetadata {
            log_prefix,
            path: root.join(METADATA_FILE),
            tmp,
            mode,
            record: MetadataRecord::default(),
        };

        match this.read_record() {
            Ok(record) => this.record = record,
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                this.record = MetadataRecord::fresh();
                info!(
                    "{} Initialised mailbox metadata, UID validity {}",
                    this.log_prefix, this.record.uidvalidity
                );
                this.persist()?;
            }
            Err(Error::CorruptMetadata) => {
                this.recover_from_corruption()?;
            }
            Err(e) => return Err(e),
        }

        Ok(this)
    }

    /// Write a fresh metadata file into the mailbox directory `root`, failing
    /// if one already exists.
    pub fn create(root: &Path, tmp: &Path, mode: u32) -> Result<u32, Error> {
        let record = MetadataRecord::fresh();
        file_ops::spit(
            tmp,
            root.join(METADATA_FILE),
            false,
            mode,
            &record.encode()?,
        )?;
        Ok(record.uidvalidity)
    }

    fn read_record(&self) -> Result<MetadataRecord, Error> {
        MetadataRecord::decode(&fs::read(&self.path)?)
    }

    fn recover_from_corruption(&mut self) -> Result<(), Error> {
        let mut aside = self.path.clone().into_os_string();
        aside.push(CORRUPT_SUFFIX);
        fs::rename(&self.path, &aside)?;

        self.record = MetadataRecord::fresh();
        warn!(
            "{} Mailbox metadata was corrupt and has been moved to {}; \
             all flags are lost and UIDs will be reassigned under new \
             UID validity {}",
            self.log_prefix,
            PathBuf::from(aside).display(),
            self.record.uidvalidity
        );
        self.persist()
    }

    /// Atomically write the current state.
    pub fn persist(&self) -> Result<(), Error> {
        file_ops::spit(
            &self.tmp,
            &self.path,
            true,
            self.mode,
            &self.record.encode()?,
        )?;
        Ok(())
    }

    /// Discard in-memory state and re-read it from storage.
    pub fn reload(&mut self) -> Result<(), Error> {
        self.record = self.read_record()?;
        Ok(())
    }

    /// Persist the current state. On failure, roll the in-memory state back
    /// to what is in storage and return the original error.
    pub fn commit(&mut self) -> Result<(), Error> {
        match self.persist() {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "{} Failed to persist metadata, rolling back: {}",
                    self.log_prefix, e
                );
                if let Err(e2) = self.reload() {
                    error!(
                        "{} Rollback of metadata failed too: {}",
                        self.log_prefix, e2
                    );
                }
                Err(e)
            }
        }
    }

    pub fn record(&self) -> &MetadataRecord {
        &self.record
    }

    pub fn uid_validity(&self) -> u32 {
        self.record.uidvalidity
    }

    /// The UID the next new message will get, or `None` if the mailbox is
    /// full.
    pub fn uid_next(&self) -> Option<Uid> {
        Uid::of(self.record.uidnext)
    }

    pub fn is_subscribed(&self) -> bool {
        self.record.subscribed
    }

    /// Look up the UID of `id` without assigning anything.
    pub fn uid(&self, id: &StoreId) -> Option<Uid> {
        self.record.uids.get(id).copied()
    }

    /// Return whether every identity in `ids` has a UID.
    pub fn all_assigned(&self, ids: &[StoreId]) -> bool {
        ids.iter().all(|id| self.record.uids.contains_key(id))
    }

    /// Return the flags on the message with the given UID.
    pub fn flags(&self, uid: Uid) -> FlagSet {
        self.record.flags.get(&uid).cloned().unwrap_or_default()
    }

    /// Return whether the message with the given UID has `flag`.
    pub fn has_flag(&self, uid: Uid, flag: &Flag) -> bool {
        self.record
            .flags
            .get(&uid)
            .map_or(false, |flags| flags.contains(flag))
    }

    /// Assign UIDs to every identity in `ids` (which must be in store order)
    /// which does not yet have one.
    ///
    /// UIDs are handed out from `uidnext` in store order, and each new
    /// message is marked `\Recent`. The whole batch is persisted before this
    /// returns; on failure nothing is assigned.
    ///
    /// Returns the newly assigned UIDs.
    pub fn assign_missing_uids(
        &mut self,
        ids: &[StoreId],
    ) -> Result<Vec<Uid>, Error> {
        let mut assigned = Vec::new();
        for id in ids {
            if self.record.uids.contains_key(id) {
                continue;
            }

            let uid = match Uid::of(self.record.uidnext) {
                Some(uid) => uid,
                None => {
                    error!(
                        "{} Mailbox is full! Can't assign any more UIDs!",
                        self.log_prefix
                    );
                    self.rollback_assignment(&assigned);
                    return Err(Error::MailboxFull);
                }
            };

            self.record.uids.insert(id.clone(), uid);
            self.record.uidnext = uid.next().map_or(0, u32::from);
            self.record
                .flags
                .entry(uid)
                .or_insert_with(FlagSet::new)
                .insert(Flag::Recent);
            assigned.push(uid);
        }

        if !assigned.is_empty() {
            self.commit()?;
            info!(
                "{} Assigned UIDs {}..={}",
                self.log_prefix,
                assigned[0],
                assigned[assigned.len() - 1]
            );
        }

        Ok(assigned)
    }

    fn rollback_assignment(&mut self, assigned: &[Uid]) {
        if assigned.is_empty() {
            return;
        }

        let assigned: BTreeSet<Uid> = assigned.iter().copied().collect();
        self.record.uids.retain(|_, uid| !assigned.contains(uid));
        for uid in &assigned {
            self.record.flags.remove(uid);
        }
        self.record.uidnext = assigned.iter().next().map_or(0, |&u| u.into());
    }

    /// Return the UID of `id`, assigning UIDs to every unassigned identity in
    /// `ids` first if it has none.
    ///
    /// `id` must be one of `ids`.
    pub fn get_uid(
        &mut self,
        id: &StoreId,
        ids: &[StoreId],
    ) -> Result<Uid, Error> {
        if let Some(uid) = self.uid(id) {
            return Ok(uid);
        }

        self.assign_missing_uids(ids)?;
        self.uid(id).ok_or(Error::NxMessage)
    }

    /// Change the flags of one message in memory only, returning its
    /// resulting flags and whether anything changed.
    ///
    /// The caller is responsible for calling `commit()`.
    pub fn apply_flags(
        &mut self,
        uid: Uid,
        requested: &FlagSet,
        mode: StoreMode,
    ) -> (FlagSet, bool) {
        let current = self.record.flags.entry(uid).or_insert_with(FlagSet::new);
        let changed = mode.apply(current, requested);
        let result = current.clone();
        if current.is_empty() {
            self.record.flags.remove(&uid);
        }
        (result, changed)
    }

    /// Change the flags of one message and persist the result.
    pub fn set_flags(
        &mut self,
        uid: Uid,
        requested: &FlagSet,
        mode: StoreMode,
    ) -> Result<FlagSet, Error> {
        let (result, changed) = self.apply_flags(uid, requested, mode);
        if changed {
            self.commit()?;
        }
        Ok(result)
    }

    /// Forget the UIDs and flags of the given identities, in memory only.
    ///
    /// The caller is responsible for calling `commit()`.
    pub fn forget(&mut self, gone: &[StoreId]) {
        for id in gone {
            if let Some(uid) = self.record.uids.remove(id) {
                self.record.flags.remove(&uid);
            }
        }
    }

    /// Forget every identity which is not in `live`, in memory only.
    ///
    /// Returns the UIDs that were dropped. The caller is responsible for
    /// calling `commit()`.
    pub fn prune(&mut self, live: &[StoreId]) -> Vec<Uid> {
        let live: BTreeSet<&StoreId> = live.iter().collect();
        let mut dropped = Vec::new();
        self.record.uids.retain(|id, uid| {
            if live.contains(id) {
                true
            } else {
                dropped.push(*uid);
                false
            }
        });
        for uid in &dropped {
            self.record.flags.remove(uid);
        }
        dropped
    }

    /// Set the subscription flag and persist it.
    pub fn set_subscribed(&mut self, subscribed: bool) -> Result<(), Error> {
        if subscribed == self.record.subscribed {
            return Ok(());
        }

        self.record.subscribed = subscribed;
        self.commit()?;
        info!(
            "{} {}",
            self.log_prefix,
            if subscribed { "Subscribed" } else { "Unsubscribed" }
        );
        Ok(())
    }

    /// Point this metadata at a new mailbox directory after the mailbox has
    /// been renamed.
    pub fn relocate(&mut self, log_prefix: String, root: &Path, tmp: PathBuf) {
        self.log_prefix = log_prefix;
        self.path = root.join(METADATA_FILE);
        self.tmp = tmp;
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    struct Setup {
        root: TempDir,
    }

    impl Setup {
        fn load(&self) -> MailboxMetadata {
            MailboxMetadata::load(
                "metadata".to_owned(),
                self.root.path(),
                self.root.path().join("tmp"),
                0o600,
            )
            .unwrap()
        }
    }

    fn set_up() -> Setup {
        crate::init_test_log();
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("tmp")).unwrap();
        Setup { root }
    }

    fn ids(n: usize) -> Vec<StoreId> {
        (0..n)
            .map(|i| StoreId::from_file_name(&format!("{:016x}.eml", i)).unwrap())
            .collect()
    }

    fn flags(flags: &[Flag]) -> FlagSet {
        flags.iter().cloned().collect()
    }

    #[test]
    fn defaults_are_persisted_on_first_load() {
        let setup = set_up();
        let md = setup.load();
        assert!(setup.root.path().join(METADATA_FILE).is_file());
        assert_ne!(0, md.uid_validity());
        assert_eq!(Some(Uid::MIN), md.uid_next());
        assert!(!md.is_subscribed());
        assert!(md.record().uids.is_empty());

        // Stable across loads
        let md2 = setup.load();
        assert_eq!(md.record(), md2.record());
    }

    #[test]
    fn uid_assignment_is_monotonic_and_durable() {
        let setup = set_up();
        let ids = ids(5);

        let mut md = setup.load();
        assert_eq!(
            vec![Uid::u(1), Uid::u(2), Uid::u(3)],
            md.assign_missing_uids(&ids[..3]).unwrap()
        );
        assert_eq!(Some(Uid::u(4)), md.uid_next());
        assert!(md.assign_missing_uids(&ids[..3]).unwrap().is_empty());

        let mut md = setup.load();
        assert_eq!(Some(Uid::u(2)), md.uid(&ids[1]));
        assert_eq!(None, md.uid(&ids[3]));
        assert!(!md.all_assigned(&ids));
        assert_eq!(Uid::u(5), md.get_uid(&ids[4], &ids).unwrap());
        assert_eq!(Uid::u(4), md.get_uid(&ids[3], &ids).unwrap());
        assert!(md.all_assigned(&ids));
        assert_eq!(Some(Uid::u(6)), md.uid_next());

        // New messages are \Recent
        assert!(md.has_flag(Uid::u(5), &Flag::Recent));
    }

    #[test]
    fn flag_changes_are_durable() {
        let setup = set_up();
        let ids = ids(1);
        let mut md = setup.load();
        let uid = md.get_uid(&ids[0], &ids).unwrap();

        assert_eq!(
            flags(&[Flag::Flagged, Flag::Recent]),
            md.set_flags(uid, &flags(&[Flag::Flagged]), StoreMode::Add)
                .unwrap()
        );
        assert_eq!(flags(&[Flag::Flagged, Flag::Recent]), setup.load().flags(uid));

        md.set_flags(uid, &flags(&[Flag::Recent]), StoreMode::Remove)
            .unwrap();
        assert_eq!(flags(&[Flag::Flagged]), setup.load().flags(uid));

        md.set_flags(uid, &FlagSet::new(), StoreMode::Replace).unwrap();
        assert!(setup.load().flags(uid).is_empty());
    }

    #[test]
    fn subscription_is_durable() {
        let setup = set_up();
        let mut md = setup.load();
        md.set_subscribed(true).unwrap();
        assert!(setup.load().is_subscribed());
        md.set_subscribed(false).unwrap();
        assert!(!setup.load().is_subscribed());
    }

    #[test]
    fn forget_and_prune_drop_uids_and_flags() {
        let setup = set_up();
        let ids = ids(3);
        let mut md = setup.load();
        md.assign_missing_uids(&ids).unwrap();

        md.forget(&ids[1..2]);
        assert_eq!(vec![Uid::u(3)], md.prune(&ids[..2]));
        md.commit().unwrap();

        let md = setup.load();
        assert_eq!(Some(Uid::u(1)), md.uid(&ids[0]));
        assert_eq!(None, md.uid(&ids[1]));
        assert_eq!(None, md.uid(&ids[2]));
        assert!(md.flags(Uid::u(2)).is_empty());
        // uidnext never goes backwards
        assert_eq!(Some(Uid::u(4)), md.uid_next());
    }

    #[test]
    fn corrupt_metadata_is_replaced() {
        let setup = set_up();
        let ids = ids(2);
        let old_validity = {
            let mut md = setup.load();
            md.assign_missing_uids(&ids).unwrap();
            md.uid_validity()
        };

        fs::write(setup.root.path().join(METADATA_FILE), b"garbage").unwrap();

        let mut md = setup.load();
        assert_ne!(old_validity, md.uid_validity());
        assert_eq!(None, md.uid(&ids[0]));
        assert!(setup
            .root
            .path()
            .join(format!("{}{}", METADATA_FILE, CORRUPT_SUFFIX))
            .is_file());

        assert_eq!(
            vec![Uid::u(1), Uid::u(2)],
            md.assign_missing_uids(&ids).unwrap()
        );
    }

    #[test]
    fn newer_version_is_refused() {
        let setup = set_up();
        #[derive(Serialize)]
        struct Future {
            version: u32,
            record: MetadataRecord,
        }

        let data = serde_cbor::to_vec(&Future {
            version: CURRENT_VERSION + 1,
            record: MetadataRecord::fresh(),
        })
        .unwrap();
        let path = setup.root.path().join(METADATA_FILE);
        fs::write(&path, &data).unwrap();

        assert_matches!(
            Err(Error::UnsupportedMetadataVersion(2)),
            MailboxMetadata::load(
                "metadata".to_owned(),
                setup.root.path(),
                setup.root.path().join("tmp"),
                0o600,
            )
        );
        // Left untouched
        assert_eq!(data, fs::read(&path).unwrap());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        #[derive(Serialize)]
        struct Extended {
            version: u32,
            record: ExtendedRecord,
        }

        #[derive(Serialize)]
        struct ExtendedRecord {
            uidnext: u32,
            uidvalidity: u32,
            subscribed: bool,
            shiny_new_thing: String,
        }

        let data = serde_cbor::to_vec(&Extended {
            version: 1,
            record: ExtendedRecord {
                uidnext: 42,
                uidvalidity: 1234,
                subscribed: true,
                shiny_new_thing: "hello".to_owned(),
            },
        })
        .unwrap();

        let record = MetadataRecord::decode(&data).unwrap();
        assert_eq!(42, record.uidnext);
        assert_eq!(1234, record.uidvalidity);
        assert!(record.subscribed);
        assert!(record.uids.is_empty());
    }

    #[test]
    fn full_mailbox_refuses_assignment() {
        let setup = set_up();
        let ids = ids(3);
        let mut md = setup.load();
        md.record.uidnext = u32::MAX;
        md.commit().unwrap();

        assert_matches!(Err(Error::MailboxFull), md.assign_missing_uids(&ids));
        assert_eq!(None, md.uid(&ids[0]));
        assert_eq!(u32::MAX, md.record().uidnext);

        md.assign_missing_uids(&ids[..1]).unwrap();
        assert_eq!(Some(Uid::MAX), md.uid(&ids[0]));
        assert_eq!(None, md.uid_next());
        assert_matches!(
            Err(Error::MailboxFull),
            md.assign_missing_uids(&ids[1..])
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn uidnext_advances_by_assignment_count(
            batches in prop::collection::vec(0usize..5, 1..6)
        ) {
            let setup = set_up();
            let mut md = setup.load();
            let all = ids(batches.iter().sum());
            let mut seen = 0;
            let mut last_uid = 0u32;

            for n in batches {
                let before = md.record().uidnext;
                let assigned =
                    md.assign_missing_uids(&all[..seen + n]).unwrap();
                seen += n;

                assert_eq!(n, assigned.len());
                assert_eq!(before + n as u32, md.record().uidnext);
                for uid in assigned {
                    assert!(uid.0.get() > last_uid);
                    last_uid = uid.0.get();
                }
            }

            for id in &all {
                assert!(md.uid(id).unwrap().0.get() < md.record().uidnext);
            }
        }
    }
}
