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

//! Mapping of authenticated users and mail recipients onto accounts.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{error, info};

use super::account::UserAccount;
use super::model::Uid;
use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;
use crate::support::safe_name::is_safe_name;
use crate::support::system_config::{DeliveryConfig, SystemConfig};

/// A local delivery destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// The user name the message is delivered to.
    pub normalised: String,
    /// The address as given.
    pub smtp: String,
}

impl Recipient {
    /// Map the address `smtp` to a user name according to `config`.
    ///
    /// Returns `None` if the address is malformed or would map to an unsafe
    /// user name.
    pub fn normalise(config: &DeliveryConfig, smtp: &str) -> Option<Self> {
        let mut split = smtp.split('@');
        let (mut local, domain) =
            match (split.next(), split.next(), split.next()) {
                (Some(l), None, _) => (l.to_owned(), None),
                (Some(l), Some(d), None) => {
                    (l.to_owned(), Some(d.to_lowercase()))
                }
                _ => return None,
            };

        if !config.verbatim_user_names {
            local = local.to_lowercase();
            let mut has_plus = false;
            local.retain(|c| {
                has_plus |= '+' == c;
                !has_plus && c != '.'
            });
        }

        let normalised = match (config.keep_recipient_domain, domain) {
            (false, _) | (_, None) => local,
            (true, Some(domain)) => format!("{}@{}", local, domain),
        };

        if !is_safe_name(&normalised) {
            return None;
        }

        Some(Recipient {
            smtp: smtp.to_owned(),
            normalised,
        })
    }
}

/// Hands out the `UserAccount` of each user.
///
/// Each user directory is `users_dir/<user>`. Accounts are cached, so that
/// every session and every delivery for a user share the same open
/// mailboxes.
pub struct MailUserRealm {
    config: SystemConfig,
    users_dir: PathBuf,
    accounts: Mutex<HashMap<String, Arc<UserAccount>>>,
}

impl MailUserRealm {
    pub fn new(config: &SystemConfig) -> Self {
        MailUserRealm {
            users_dir: config.storage.users_dir.clone(),
            config: config.clone(),
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Return the account of the already-authenticated `user`.
    ///
    /// Fails with `NxUser` if the user has no directory.
    pub fn account_for(&self, user: &str) -> Result<Arc<UserAccount>, Error> {
        if !is_safe_name(user) {
            return Err(Error::UnsafeName);
        }

        let mut accounts = self.accounts.lock().expect("realm lock poisoned");
        if let Some(account) = accounts.get(user) {
            return Ok(Arc::clone(account));
        }

        let root = self.users_dir.join(user);
        if !root.is_dir() {
            return Err(Error::NxUser);
        }

        let account = Arc::new(UserAccount::new(
            user.to_owned(),
            root,
            self.config.storage.clone(),
        ));
        account.init()?;
        info!("{} Account opened", user);
        accounts.insert(user.to_owned(), Arc::clone(&account));
        Ok(account)
    }

    /// Deliver `data` into the INBOX of `recipient`, returning its UID.
    ///
    /// The user directory and INBOX are created if they do not exist yet.
    pub fn deliver_local(
        &self,
        recipient: &Recipient,
        data: &[u8],
    ) -> Result<Uid, Error> {
        if data.len() as u64 > self.config.storage.max_message_size {
            info!(
                "{} Rejected {}-byte message for {}",
                recipient.normalised,
                data.len(),
                recipient.smtp
            );
            return Err(Error::MessageTooBig);
        }

        fs::DirBuilder::new()
            .mode(0o750)
            .create(self.users_dir.join(&recipient.normalised))
            .ignore_already_exists()?;

        self.account_for(&recipient.normalised)
            .and_then(|account| account.select("INBOX"))
            .and_then(|inbox| inbox.append(data))
            .map_err(|e| {
                error!(
                    "{} Unexpected error delivering to {}: {}",
                    recipient.normalised, recipient.smtp, e
                );
                e
            })
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::account::model::*;

    #[test]
    fn user_normalisation() {
        fn normalise(smtp: &str, keep_domain: bool, verbatim: bool) -> String {
            Recipient::normalise(
                &DeliveryConfig {
                    keep_recipient_domain: keep_domain,
                    verbatim_user_names: verbatim,
                },
                smtp,
            )
            .map(|r| r.normalised)
            .unwrap_or_else(|| "<None>".to_owned())
        }

        assert_eq!("foobar", normalise("foobar", false, false));
        assert_eq!("foobar", normalise("Foo.Bar", false, false));
        assert_eq!("Foo.Bar", normalise("Foo.Bar", false, true));
        assert_eq!("foo", normalise("foo+bar", false, false));
        assert_eq!("foo+bar", normalise("foo+bar", true, true));
        assert_eq!("foo", normalise("foo@bar.com", false, false));
        assert_eq!("foo@bar.com", normalise("foo@BAR.COM", true, false));
        assert_eq!("<None>", normalise("a@b@c", false, false));
        assert_eq!("<None>", normalise("", false, false));
        assert_eq!("<None>", normalise("../x", false, true));
        assert_eq!("<None>", normalise(".hidden", false, true));
    }

    fn set_up(max_message_size: u64) -> (TempDir, MailUserRealm) {
        crate::init_test_log();
        let root = TempDir::new().unwrap();
        let mut config = SystemConfig::default();
        config.storage.users_dir = root.path().to_owned();
        config.storage.max_message_size = max_message_size;
        let realm = MailUserRealm::new(&config);
        (root, realm)
    }

    #[test]
    fn account_lookup() {
        let (root, realm) = set_up(1024);
        assert_matches!(Err(Error::NxUser), realm.account_for("alice"));
        assert_matches!(Err(Error::UnsafeName), realm.account_for("../alice"));

        fs::create_dir(root.path().join("alice")).unwrap();
        let a = realm.account_for("alice").unwrap();
        let b = realm.account_for("alice").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        a.select("INBOX").unwrap();
    }

    #[test]
    fn local_delivery() {
        let (root, realm) = set_up(64);
        let recipient = Recipient::normalise(
            &DeliveryConfig::default(),
            "Bob.Smith+lists@example.com",
        )
        .unwrap();
        assert_eq!("bobsmith", recipient.normalised);

        assert_eq!(
            Uid::u(1),
            realm.deliver_local(&recipient, b"Subject: 1\r\n\r\nhi").unwrap()
        );
        assert!(root.path().join("bobsmith").is_dir());

        // A session sees deliveries through the same instance
        let inbox = realm
            .account_for("bobsmith")
            .unwrap()
            .select("INBOX")
            .unwrap();
        assert_eq!(
            Uid::u(2),
            realm.deliver_local(&recipient, b"Subject: 2\r\n\r\nhi").unwrap()
        );
        assert_eq!(2, inbox.message_count().unwrap());
        assert_eq!(2, inbox.recent_count().unwrap());

        assert_matches!(
            Err(Error::MessageTooBig),
            realm.deliver_local(&recipient, &[b'x'; 65][..])
        );
        assert_eq!(2, inbox.message_count().unwrap());
    }
}
