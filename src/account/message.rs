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

use chrono::prelude::*;
use mailparse::{MailHeader, MailHeaderMap};

use super::model::*;
use crate::support::error::Error;

/// A message as returned by `fetch`: its content together with the
/// bookkeeping of the mailbox at the time it was resolved.
#[derive(Clone, Debug)]
pub struct Message {
    uid: Uid,
    flags: FlagSet,
    raw: Vec<u8>,
    internal_date: DateTime<Utc>,
}

impl Message {
    pub fn new(
        uid: Uid,
        flags: FlagSet,
        raw: Vec<u8>,
        internal_date: DateTime<Utc>,
    ) -> Self {
        Message {
            uid,
            flags,
            raw,
            internal_date,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    /// The size of the message, in bytes.
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn internal_date(&self) -> DateTime<Utc> {
        self.internal_date
    }

    /// The full message, headers included.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn parse_headers(&self) -> Result<(Vec<MailHeader>, usize), Error> {
        Ok(mailparse::parse_headers(&self.raw)?)
    }

    /// Return the message headers selected by `names`, keyed by lower-case
    /// header name.
    ///
    /// If `negate` is false, exactly the headers in `names` are returned
    /// (matched case-insensitively), with missing ones mapped to the empty
    /// string; if `names` is empty, all headers are returned. If `negate` is
    /// true, all headers not in `names` are returned.
    ///
    /// Where a header occurs more than once, the first occurrence wins.
    pub fn headers(
        &self,
        names: &[&str],
        negate: bool,
    ) -> Result<BTreeMap<String, String>, Error> {
        let (headers, _) = self.parse_headers()?;
        let mut ret = BTreeMap::new();

        if negate {
            for header in &headers {
                let key = header.get_key();
                if !names.iter().any(|n| n.eq_ignore_ascii_case(&key)) {
                    ret.entry(key.to_lowercase())
                        .or_insert_with(|| header.get_value());
                }
            }
        } else if names.is_empty() {
            for header in &headers {
                ret.entry(header.get_key().to_lowercase())
                    .or_insert_with(|| header.get_value());
            }
        } else {
            for name in names {
                ret.insert(
                    name.to_lowercase(),
                    headers.get_first_value(name).unwrap_or_default(),
                );
            }
        }

        Ok(ret)
    }

    /// The message body, i.e., everything after the header block.
    pub fn body(&self) -> Result<&[u8], Error> {
        let (_, offset) = self.parse_headers()?;
        Ok(&self.raw[offset.min(self.raw.len())..])
    }

    /// Whether the message declares a `multipart/*` content type.
    pub fn is_multipart(&self) -> Result<bool, Error> {
        let (headers, _) = self.parse_headers()?;
        Ok(headers
            .get_first_value("Content-Type")
            .map(|ct| mailparse::parse_content_type(&ct))
            .map_or(false, |ct| ct.mimetype.starts_with("multipart/")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SIMPLE: &str = "From: foo@bar.com\r\n\
                          To: baz@bar.com\r\n\
                          Subject: Hello\r\n\
                          Received: first\r\n\
                          Received: second\r\n\
                          \r\n\
                          Body text\r\n";

    const MULTIPART: &str = "Subject: Parts\r\n\
                             Content-Type: Multipart/Mixed; boundary=\"b\"\r\n\
                             \r\n\
                             --b\r\n\
                             \r\n\
                             one\r\n\
                             --b--\r\n";

    fn message(raw: &str) -> Message {
        let mut flags = FlagSet::new();
        flags.insert(Flag::Seen);
        Message::new(Uid::u(7), flags, raw.as_bytes().to_vec(), Utc::now())
    }

    #[test]
    fn header_selection() {
        let msg = message(SIMPLE);

        let all = msg.headers(&[], false).unwrap();
        assert_eq!(4, all.len());
        assert_eq!("Hello", all["subject"]);
        assert_eq!("first", all["received"]);

        let some = msg.headers(&["SUBJECT", "x-missing"], false).unwrap();
        assert_eq!(2, some.len());
        assert_eq!("Hello", some["subject"]);
        assert_eq!("", some["x-missing"]);

        let not = msg.headers(&["subject", "received"], true).unwrap();
        assert_eq!(
            vec!["from", "to"],
            not.keys().map(|k| k.as_str()).collect::<Vec<_>>()
        );

        assert!(msg.headers(&[], true).unwrap().len() == 4);
    }

    #[test]
    fn body_and_attributes() {
        let msg = message(SIMPLE);
        assert_eq!(b"Body text\r\n", msg.body().unwrap());
        assert!(!msg.is_multipart().unwrap());
        assert_eq!(Uid::u(7), msg.uid());
        assert!(msg.flags().contains(&Flag::Seen));
        assert_eq!(SIMPLE.len(), msg.size());
    }

    #[test]
    fn multipart_detection() {
        assert!(message(MULTIPART).is_multipart().unwrap());
    }

    #[test]
    fn headerless_message() {
        let msg = message("\r\njust a body");
        assert!(msg.headers(&[], false).unwrap().is_empty());
        assert_eq!(b"just a body", msg.body().unwrap());
    }
}
