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

//! Mailbox names and their mapping onto the filesystem.
//!
//! Mailbox names are hierarchical, with components separated by `.`. The
//! first component is case-insensitively `INBOX` for the inbox and its
//! inferiors, and is always written `INBOX` in the canonical form.
//!
//! Every mailbox, regardless of depth, is one directory directly under the
//! account's `mail/` directory, named by its canonical name. Inferiors are
//! thus siblings of their parent on disk, and a mailbox can exist without its
//! parent.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use super::maildir_store::MaildirStore;
use super::mailbox::HIERARCHY_DELIMITER;
use super::metadata::MailboxMetadata;
use crate::support::error::Error;
use crate::support::file_ops::ErrorTransforms;
use crate::support::safe_name::is_safe_name;
use crate::support::system_config::StorageConfig;

/// A validated mailbox name in canonical form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxName(String);

impl MailboxName {
    /// Validate and canonicalise `raw`.
    ///
    /// A single trailing delimiter is ignored, as IMAP clients use it to
    /// signal that they intend to create inferiors. Every component must be
    /// non-empty and a safe name.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.strip_suffix(HIERARCHY_DELIMITER).unwrap_or(raw);
        let mut canonical = String::with_capacity(raw.len());
        for (ix, part) in raw.split(HIERARCHY_DELIMITER).enumerate() {
            if !is_safe_name(part) {
                return Err(Error::UnsafeName);
            }

            if ix > 0 {
                canonical.push(HIERARCHY_DELIMITER);
            }

            if 0 == ix && "inbox".eq_ignore_ascii_case(part) {
                canonical.push_str("INBOX");
            } else {
                canonical.push_str(part);
            }
        }

        Ok(MailboxName(canonical))
    }

    pub fn inbox() -> Self {
        MailboxName("INBOX".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_inbox(&self) -> bool {
        "INBOX" == self.0
    }

    /// Return whether `self` is a strict inferior of `other`.
    pub fn is_inferior_of(&self, other: &MailboxName) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(&other.0)
            && self.0[other.0.len()..].starts_with(HIERARCHY_DELIMITER)
    }

    /// If `self` is `from` or one of its inferiors, return the corresponding
    /// name under `to`.
    pub fn rebase(
        &self,
        from: &MailboxName,
        to: &MailboxName,
    ) -> Option<MailboxName> {
        if self == from {
            Some(to.clone())
        } else if self.is_inferior_of(from) {
            Some(MailboxName(format!("{}{}", to.0, &self.0[from.0.len()..])))
        } else {
            None
        }
    }

    /// The directory holding this mailbox under `mail_root`.
    pub fn path_in(&self, mail_root: &Path) -> PathBuf {
        mail_root.join(&self.0)
    }
}

impl fmt::Display for MailboxName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Given a raw mailbox pattern, emit the parts that comprise it.
///
/// This accounts for the path delimiter, empty segments, and the required
/// case-insensitivity of the root `inbox` mailbox.
///
/// It does not check for name safety.
pub fn parse_mailbox_path<'a>(
    path: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    path.split(HIERARCHY_DELIMITER)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(ix, s)| {
            if 0 == ix && "inbox".eq_ignore_ascii_case(s) {
                "INBOX"
            } else {
                s
            }
        })
}

/// Creates a predicate which identifies which canonical mailbox names match
/// `pattern`, with pattern matching performed as per RFC 3501.
///
/// The pattern is first normalised by `parse_mailbox_path`. `*` matches
/// anything; `%` matches anything but the hierarchy delimiter.
///
/// This design means that any `LIST` operation needs to fetch all mailboxes
/// and then narrow it down. Since mailboxes are all in one directory anyway,
/// that costs nothing extra.
pub fn mailbox_path_matcher(pattern: &str) -> impl Fn(&str) -> bool {
    let delim = regex::escape(&HIERARCHY_DELIMITER.to_string());
    let mut rx = "^".to_owned();
    for (part_ix, part) in parse_mailbox_path(pattern).enumerate() {
        if part_ix > 0 {
            rx.push_str(&delim);
        }

        let mut start = 0;
        for end in part
            .match_indices(|c| '%' == c || '*' == c)
            .map(|(ix, _)| ix)
            .chain(part.len()..=part.len())
        {
            let chunk = &part[start..end];
            start = (end + 1).min(part.len());

            rx.push_str(&regex::escape(chunk));
            match part.get(end..end + 1) {
                Some("*") => rx.push_str(".*"),
                Some("%") => {
                    rx.push_str("[^");
                    rx.push_str(&delim);
                    rx.push_str("]*");
                }
                _ => (),
            }
        }
    }
    rx.push('$');

    let rx = regex::Regex::new(&rx).expect("Built invalid regex?");
    move |s| rx.is_match(s)
}

/// Combine an IMAP `LIST` reference and pattern into one pattern.
pub fn join_reference(reference: &str, pattern: &str) -> String {
    if reference.is_empty() {
        pattern.to_owned()
    } else if reference.ends_with(HIERARCHY_DELIMITER)
        || pattern.starts_with(HIERARCHY_DELIMITER)
    {
        format!("{}{}", reference, pattern)
    } else {
        format!("{}{}{}", reference, HIERARCHY_DELIMITER, pattern)
    }
}

/// Create a new, empty mailbox called `name` under `mail_root`.
///
/// The mailbox is fully assembled in `tmp` and then renamed into place, so
/// it either exists completely or not at all. Fails with `MailboxExists` if
/// there is already a mailbox of that name.
///
/// Returns the UID validity of the new mailbox.
pub fn create_mailbox(
    log_prefix: &str,
    mail_root: &Path,
    tmp: &Path,
    name: &MailboxName,
    config: &StorageConfig,
) -> Result<u32, Error> {
    let target = name.path_in(mail_root);
    if target.exists() {
        return Err(Error::MailboxExists);
    }

    let stage = tempfile::Builder::new()
        .prefix("mailbox")
        .tempdir_in(tmp)?;
    MaildirStore::init(stage.path())?;
    let uid_validity = MailboxMetadata::create(
        stage.path(),
        &stage.path().join("tmp"),
        config.metadata_mode,
    )?;

    // The target is non-empty if it exists, so renaming onto it fails rather
    // than clobbering it.
    fs::rename(stage.path(), &target).on_exists(Error::MailboxExists)?;

    info!(
        "{} Created mailbox {} with UID validity {}",
        log_prefix, name, uid_validity
    );
    Ok(uid_validity)
}

/// List the names of all mailboxes under `mail_root`, sorted.
///
/// Directory entries which are not canonical mailbox names or which have no
/// store are ignored.
pub fn list_mailbox_names(mail_root: &Path) -> Result<Vec<MailboxName>, Error> {
    let mut names = Vec::new();
    for entry in fs::read_dir(mail_root)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };

        match MailboxName::parse(&name) {
            Ok(parsed) if parsed.as_str() == name => {
                if entry.path().join("cur").is_dir() {
                    names.push(parsed);
                }
            }
            _ => (),
        }
    }

    names.sort();
    Ok(names)
}
