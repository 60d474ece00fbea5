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

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::info;

use crate::account::mailbox::Mailbox;
use crate::account::mailbox_path::*;
use crate::support::error::Error;
use crate::support::file_ops::{ErrorTransforms, IgnoreKinds};
use crate::support::system_config::StorageConfig;

/// The open mailboxes of one account, keyed by canonical name.
///
/// There is at most one `Mailbox` per mailbox directory: as long as anything
/// still holds a handle on a mailbox, every lookup of its name gets that same
/// instance. The registry itself does not keep mailboxes alive.
#[derive(Debug, Default)]
struct MailboxRegistry {
    open: HashMap<MailboxName, Weak<Mailbox>>,
}

impl MailboxRegistry {
    fn get(&self, name: &MailboxName) -> Option<Arc<Mailbox>> {
        self.open.get(name).and_then(Weak::upgrade)
    }

    fn insert(&mut self, name: MailboxName, mailbox: &Arc<Mailbox>) {
        self.open.insert(name, Arc::downgrade(mailbox));
    }

    /// Drop entries whose mailbox is no longer held by anyone.
    fn prune(&mut self) -> usize {
        let before = self.open.len();
        self.open.retain(|_, mailbox| mailbox.strong_count() > 0);
        before - self.open.len()
    }
}

/// The mailboxes of one user.
///
/// # Layout
///
/// - `mail/`. One directory per mailbox; see `mailbox_path`.
/// - `tmp/`. Staging area for creating mailboxes.
#[derive(Debug)]
pub struct UserAccount {
    log_prefix: String,
    root: PathBuf,
    mail_root: PathBuf,
    tmp: PathBuf,
    config: StorageConfig,
    registry: Mutex<MailboxRegistry>,
}

impl UserAccount {
    pub fn new(log_prefix: String, root: PathBuf, config: StorageConfig) -> Self {
        UserAccount {
            log_prefix,
            mail_root: root.join("mail"),
            tmp: root.join("tmp"),
            root,
            config,
            registry: Mutex::new(MailboxRegistry::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Perform minimal initialisation of the account.
    ///
    /// This ensures that critical paths exist, including INBOX. It should be
    /// called whenever the user logs in.
    pub fn init(&self) -> Result<(), Error> {
        fs::DirBuilder::new()
            .mode(0o770)
            .create(&self.tmp)
            .ignore_already_exists()?;
        fs::DirBuilder::new()
            .mode(0o750)
            .create(&self.mail_root)
            .ignore_already_exists()?;
        self.ensure_inbox()
    }

    fn ensure_inbox(&self) -> Result<(), Error> {
        match create_mailbox(
            &self.log_prefix,
            &self.mail_root,
            &self.tmp,
            &MailboxName::inbox(),
            &self.config,
        ) {
            Ok(_) | Err(Error::MailboxExists) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn registry(&self) -> MutexGuard<'_, MailboxRegistry> {
        self.registry.lock().expect("registry lock poisoned")
    }

    fn open_in(
        &self,
        registry: &mut MailboxRegistry,
        name: &MailboxName,
    ) -> Result<Arc<Mailbox>, Error> {
        if let Some(mailbox) = registry.get(name) {
            return Ok(mailbox);
        }

        let mailbox = Mailbox::open(
            self.mailbox_log_prefix(name),
            name.to_string(),
            name.path_in(&self.mail_root),
            &self.config,
        )?;
        registry.insert(name.clone(), &mailbox);
        Ok(mailbox)
    }

    fn mailbox_log_prefix(&self, name: &MailboxName) -> String {
        format!("{}:{}", self.log_prefix, name)
    }

    /// The IMAP `LIST` command.
    ///
    /// `reference` is prepended to `pattern` as RFC 3501 describes. Returns
    /// every matching mailbox, sorted by name.
    pub fn list_mailboxes(
        &self,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<(String, Arc<Mailbox>)>, Error> {
        // Wildcards in the reference have no significance, and no mailbox
        // can contain them, so nothing can match.
        if reference.contains('%') || reference.contains('*') {
            return Ok(vec![]);
        }

        let matcher = mailbox_path_matcher(&join_reference(reference, pattern));
        let mut registry = self.registry();
        let mut ret = Vec::new();
        for name in list_mailbox_names(&self.mail_root)? {
            if matcher(name.as_str()) {
                let mailbox = self.open_in(&mut registry, &name)?;
                ret.push((name.to_string(), mailbox));
            }
        }

        Ok(ret)
    }

    /// Open the named mailbox, or return the already-open instance.
    pub fn select(&self, name: &str) -> Result<Arc<Mailbox>, Error> {
        let name = MailboxName::parse(name)?;
        self.open_in(&mut self.registry(), &name)
    }

    /// The IMAP `CREATE` command.
    ///
    /// Fails with `MailboxExists` if the mailbox already exists. Superiors
    /// are not created.
    pub fn create(&self, name: &str) -> Result<(), Error> {
        let name = MailboxName::parse(name)?;
        // Hold the registry so a concurrent rename cannot race this
        let _registry = self.registry();
        create_mailbox(
            &self.log_prefix,
            &self.mail_root,
            &self.tmp,
            &name,
            &self.config,
        )?;
        Ok(())
    }

    /// The IMAP `DELETE` command, which is not supported.
    pub fn delete(&self, _name: &str) -> Result<(), Error> {
        Err(Error::PermissionDenied)
    }

    /// The IMAP `RENAME` command.
    ///
    /// The mailbox and all its inferiors are renamed. Renaming INBOX instead
    /// moves INBOX alone (not its inferiors) and leaves a new, empty INBOX in
    /// its place.
    ///
    /// Mailboxes which are open stay valid and follow the rename.
    pub fn rename(&self, src: &str, dst: &str) -> Result<(), Error> {
        let src = MailboxName::parse(src)?;
        let dst = MailboxName::parse(dst)?;

        if src == dst {
            return Err(Error::RenameToSelf);
        }
        if dst.is_inferior_of(&src) {
            return Err(Error::RenameIntoSelf);
        }

        let mut registry = self.registry();
        let existing = list_mailbox_names(&self.mail_root)?;
        if !existing.contains(&src) {
            return Err(Error::NxMailbox);
        }

        let moves = existing
            .iter()
            .filter(|name| !src.is_inbox() || *name == &src)
            .filter_map(|name| {
                name.rebase(&src, &dst).map(|new| (name.clone(), new))
            })
            .collect::<Vec<_>>();

        for (_, new) in &moves {
            if new.path_in(&self.mail_root).exists() {
                return Err(Error::MailboxExists);
            }
        }

        for (old, new) in moves {
            let new_path = new.path_in(&self.mail_root);
            if let Some(mailbox) = registry.get(&old) {
                mailbox.relocate(
                    self.mailbox_log_prefix(&new),
                    new.to_string(),
                    &new_path,
                )?;
                registry.open.remove(&old);
                registry.insert(new.clone(), &mailbox);
            } else {
                registry.open.remove(&old);
                fs::rename(old.path_in(&self.mail_root), &new_path)
                    .on_exists(Error::MailboxExists)
                    .on_not_found(Error::NxMailbox)?;
            }

            info!("{} Renamed {} to {}", self.log_prefix, old, new);
        }

        if src.is_inbox() {
            self.ensure_inbox()?;
        }

        Ok(())
    }

    /// The IMAP `SUBSCRIBE` command.
    pub fn subscribe(&self, name: &str) -> Result<(), Error> {
        self.select(name)?.subscribe()
    }

    /// The IMAP `UNSUBSCRIBE` command.
    pub fn unsubscribe(&self, name: &str) -> Result<(), Error> {
        self.select(name)?.unsubscribe()
    }

    pub fn is_subscribed(&self, name: &str) -> Result<bool, Error> {
        Ok(self.select(name)?.is_subscribed())
    }

    /// Forget every mailbox which is no longer in use.
    ///
    /// A mailbox some session still holds stays registered, so that a later
    /// lookup shares its lock and in-memory state instead of opening a second
    /// instance on the same directory.
    pub fn close(&self) {
        let closed = self.registry().prune();
        if closed > 0 {
            info!("{} Closed {} mailbox(es)", self.log_prefix, closed);
        }
    }
}
