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

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::ops::Bound::*;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Uniquely identifies a message within a single mailbox generation.
///
/// UIDs start at 1 and increase monotonically as messages are discovered in
/// the mailbox. UIDs are never reused; a mailbox which can no longer assign
/// a fresh one is full.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    pub const MIN: Self = Uid(unsafe { NonZeroU32::new_unchecked(1) });
    pub const MAX: Self = Uid(unsafe { NonZeroU32::new_unchecked(u32::MAX) });

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u32> for Uid {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Uid::of(v).ok_or(())
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// The sequence number of a message is its 1-based position in the current
/// store order of the mailbox. It is recomputed on every access and never
/// persisted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqnum(pub NonZeroU32);

impl Seqnum {
    pub const MIN: Self = Seqnum(unsafe { NonZeroU32::new_unchecked(1) });

    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    pub fn from_index(ix: usize) -> Self {
        Seqnum::of((ix + 1) as u32).expect("Sequence number out of range")
    }
}

impl TryFrom<u32> for Seqnum {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Seqnum::of(v).ok_or(())
    }
}

impl From<Seqnum> for u32 {
    fn from(seqnum: Seqnum) -> u32 {
        seqnum.0.get()
    }
}

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0.get())
    }
}

/// A "sequence set range" of sequence numbers or UIDs.
///
/// Internally, this is maintained as a minimal sorted set of inclusive ranges.
/// It does not maintain information on the original fragmentation, ordering,
/// or duplication.
///
/// There is no support for removal.
///
/// The `Display` format puts this into minimal IMAP wire format.
#[derive(Clone, PartialEq, Eq)]
pub struct SeqRange<T> {
    parts: BTreeMap<u32, u32>,
    _t: PhantomData<T>,
}

impl<T> SeqRange<T> {
    /// Create a new, empty range.
    pub fn new() -> Self {
        SeqRange {
            parts: BTreeMap::new(),
            _t: PhantomData,
        }
    }

    /// Return whether this range is empty.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn insert_raw(&mut self, start_incl: u32, mut end_incl: u32) {
        // If this range overlaps any later ranges, fuse them.
        loop {
            let following = self
                .parts
                .range((Excluded(start_incl), Unbounded))
                .next()
                .map(|(&start, &end)| (start, end));

            if let Some((following_start, following_end)) = following {
                if following_start - 1 <= end_incl {
                    end_incl = end_incl.max(following_end);
                    self.parts.remove(&following_start);
                    continue;
                }
            }

            break;
        }

        let preceding = self
            .parts
            .range((Unbounded, Included(end_incl)))
            .next_back()
            .map(|(&start, &end)| (start, end));
        if let Some((preceding_start, preceding_end)) = preceding {
            if preceding_end.saturating_add(1) >= start_incl {
                // Overlap with the new range
                if start_incl < preceding_start {
                    self.parts.remove(&preceding_start);
                    self.parts.insert(start_incl, end_incl.max(preceding_end));
                } else {
                    self.parts
                        .insert(preceding_start, end_incl.max(preceding_end));
                }
                return;
            }
        }

        // No overlap
        self.parts.insert(start_incl, end_incl);
    }
}

impl<T: TryFrom<u32> + Into<u32> + PartialOrd> SeqRange<T> {
    /// Insert the given inclusive range (which must be in the correct order)
    /// into this sequence set.
    pub fn insert(&mut self, start_incl: T, end_incl: T) {
        assert!(end_incl >= start_incl);
        self.insert_raw(start_incl.into(), end_incl.into());
    }

    /// Return whether the given item is present in this set.
    pub fn contains(&self, v: T) -> bool {
        let v: u32 = v.into();
        self.parts
            .range(..=v)
            .next_back()
            .filter(|&(_, &end)| end >= v)
            .is_some()
    }

    /// Return an iterator to the items in this set.
    ///
    /// Invalid items and items greater than `max` are silently excluded.
    ///
    /// Items are delivered in strictly ascending order.
    pub fn items<'a>(
        &'a self,
        max: impl Into<u32>,
    ) -> impl Iterator<Item = T> + 'a {
        let max: u32 = max.into();
        self.parts
            .iter()
            .map(|(&start, &end)| (start, end))
            .filter(move |&(start, _)| start <= max)
            .flat_map(move |(start, end)| start..=end.min(max))
            .filter_map(|v| T::try_from(v).ok())
    }

    /// Return the total size of the sequence set.
    pub fn len(&self) -> usize {
        self.parts
            .iter()
            .map(|(&start, &end)| (end - start) as usize + 1)
            .sum()
    }

    /// Return the maximum value in this sequence set, raw.
    pub fn max(&self) -> Option<u32> {
        self.parts.values().rev().copied().next()
    }
}

impl<T> fmt::Display for SeqRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, (&start, &end)) in self.parts.iter().enumerate() {
            let delim = if 0 == ix { "" } else { "," };

            if start == end {
                write!(f, "{}{}", delim, start)?;
            } else {
                write!(f, "{}{}:{}", delim, start, end)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SeqRange<Seqnum> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[Seqnum {}]", self)
    }
}

impl fmt::Debug for SeqRange<Uid> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[Uid {}]", self)
    }
}

impl<T> Default for SeqRange<T> {
    fn default() -> Self {
        SeqRange::new()
    }
}

/// One endpoint of a `SetRange`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetBound {
    Value(u32),
    /// `*` in IMAP: the largest sequence number or UID currently in use.
    Largest,
}

impl SetBound {
    fn resolve(self, largest: u32) -> u32 {
        match self {
            SetBound::Value(v) => v,
            SetBound::Largest => largest,
        }
    }
}

/// An inclusive range in a `MessageSet`.
///
/// As in IMAP, the endpoints may be given in either order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetRange {
    pub start: SetBound,
    pub end: SetBound,
}

/// A client-specified selection of messages, by sequence number or by UID
/// depending on how it is used.
///
/// A `MessageSet` is a list of ranges, each of which may be open-ended
/// through `SetBound::Largest`. Nothing about the mailbox is known until the
/// set is resolved against it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSet {
    ranges: Vec<SetRange>,
}

impl MessageSet {
    pub fn new() -> Self {
        MessageSet::default()
    }

    /// A set containing exactly `value`.
    pub fn just(value: u32) -> Self {
        let mut this = MessageSet::new();
        this.push(SetBound::Value(value), SetBound::Value(value));
        this
    }

    /// A set containing `start..=end`.
    pub fn range(start: u32, end: u32) -> Self {
        let mut this = MessageSet::new();
        this.push(SetBound::Value(start), SetBound::Value(end));
        this
    }

    /// A set containing `start:*`.
    pub fn from_start(start: u32) -> Self {
        let mut this = MessageSet::new();
        this.push(SetBound::Value(start), SetBound::Largest);
        this
    }

    /// The set `1:*`, i.e., every message.
    pub fn all() -> Self {
        MessageSet::from_start(1)
    }

    pub fn push(&mut self, start: SetBound, end: SetBound) {
        self.ranges.push(SetRange { start, end });
    }

    pub fn ranges(&self) -> &[SetRange] {
        &self.ranges
    }

    /// Parse the IMAP wire format of a sequence set, e.g. `1:4,7,9:*`.
    ///
    /// The result is validated as by `validate()`.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        fn bound(r: &str) -> Result<SetBound, Error> {
            if "*" == r {
                Ok(SetBound::Largest)
            } else if !r.is_empty() && r.bytes().all(|b| b.is_ascii_digit()) {
                r.parse().map(SetBound::Value).map_err(|_| Error::InvalidRange)
            } else {
                Err(Error::InvalidRange)
            }
        }

        let mut this = MessageSet::new();
        for part in raw.split(',') {
            let mut subs = part.split(':');
            match (subs.next(), subs.next(), subs.next()) {
                (Some(only), None, None) => {
                    let only = bound(only)?;
                    this.push(only, only);
                }
                (Some(start), Some(end), None) => {
                    this.push(bound(start)?, bound(end)?);
                }
                _ => return Err(Error::InvalidRange),
            }
        }

        this.validate()?;
        Ok(this)
    }

    /// Reject sets which cannot be resolved: the empty set, and any set
    /// mentioning 0.
    pub fn validate(&self) -> Result<(), Error> {
        if self.ranges.is_empty() {
            return Err(Error::InvalidRange);
        }

        for range in &self.ranges {
            for &bound in &[range.start, range.end] {
                if SetBound::Value(0) == bound {
                    return Err(Error::InvalidRange);
                }
            }
        }

        Ok(())
    }

    /// Substitute `largest` for every `Largest` bound and collapse the result
    /// into a `SeqRange`.
    ///
    /// `largest` may be 0 for an empty mailbox, in which case a range ending
    /// in `*` degenerates to one including 0, which no item can match.
    pub fn to_seq_range<T>(&self, largest: u32) -> SeqRange<T> {
        let mut seq_range = SeqRange::new();
        for range in &self.ranges {
            let start = range.start.resolve(largest);
            let end = range.end.resolve(largest);
            seq_range.insert_raw(start.min(end), start.max(end));
        }
        seq_range
    }
}

impl fmt::Display for MessageSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn bound(f: &mut fmt::Formatter, b: SetBound) -> fmt::Result {
            match b {
                SetBound::Value(v) => write!(f, "{}", v),
                SetBound::Largest => write!(f, "*"),
            }
        }

        for (ix, range) in self.ranges.iter().enumerate() {
            if ix > 0 {
                write!(f, ",")?;
            }
            bound(f, range.start)?;
            if range.start != range.end {
                write!(f, ":")?;
                bound(f, range.end)?;
            }
        }

        Ok(())
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Keywords are in the
/// `Keyword` case.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags. Flags are persisted
/// in their wire format.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Recent,
    Seen,
    Keyword(String),
}

/// The set of flags on one message.
pub type FlagSet = BTreeSet<Flag>;

impl Flag {
    fn rank(&self) -> u8 {
        match *self {
            Flag::Answered => 0,
            Flag::Deleted => 1,
            Flag::Draft => 2,
            Flag::Flagged => 3,
            Flag::Recent => 4,
            Flag::Seen => 5,
            Flag::Keyword(_) => 6,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Flag::Answered => write!(f, "\\Answered"),
            &Flag::Deleted => write!(f, "\\Deleted"),
            &Flag::Draft => write!(f, "\\Draft"),
            &Flag::Flagged => write!(f, "\\Flagged"),
            &Flag::Recent => write!(f, "\\Recent"),
            &Flag::Seen => write!(f, "\\Seen"),
            &Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\recent") {
            Ok(Flag::Recent)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.starts_with('\\') {
            Err(Error::NxFlag)
        } else if !s.is_empty() && s.as_bytes().iter().copied().all(is_atom_char)
        {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::UnsafeName)
        }
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> String {
        flag.to_string()
    }
}

impl TryFrom<String> for Flag {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

fn is_atom_char(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}

// Keywords are compared ASCII-case-insensitively, so Eq, Ord and Hash are all
// written out by hand to agree with each other.

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        Ordering::Equal == self.cmp(other)
    }
}

impl Eq for Flag {}

impl PartialOrd for Flag {
    fn partial_cmp(&self, other: &Flag) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Flag {
    fn cmp(&self, other: &Flag) -> Ordering {
        match (self, other) {
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => a
                .bytes()
                .map(|c| c.to_ascii_lowercase())
                .cmp(b.bytes().map(|c| c.to_ascii_lowercase())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Flag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        if let Flag::Keyword(ref kw) = *self {
            for c in kw.bytes() {
                c.to_ascii_lowercase().hash(state);
            }
        }
    }
}

/// How `Mailbox::store_flags` combines the requested flags with those
/// already on a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    /// `FLAGS`: the message ends up with exactly the requested flags.
    Replace,
    /// `+FLAGS`
    Add,
    /// `-FLAGS`
    Remove,
}

impl StoreMode {
    /// Apply this mode to `current`, returning whether anything changed.
    pub fn apply(self, current: &mut FlagSet, requested: &FlagSet) -> bool {
        match self {
            StoreMode::Replace => {
                if current == requested {
                    false
                } else {
                    *current = requested.clone();
                    true
                }
            }
            StoreMode::Add => requested
                .iter()
                .fold(false, |changed, f| current.insert(f.clone()) || changed),
            StoreMode::Remove => requested
                .iter()
                .fold(false, |changed, f| current.remove(f) || changed),
        }
    }
}

/// Request information for `STATUS`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusRequest {
    pub messages: bool,
    pub recent: bool,
    pub uid_next: bool,
    pub uid_validity: bool,
    pub unseen: bool,
}

impl StatusRequest {
    /// Request every item.
    pub fn all() -> Self {
        StatusRequest {
            messages: true,
            recent: true,
            uid_next: true,
            uid_validity: true,
            unseen: true,
        }
    }
}

/// Response information for `STATUS`. Only the requested fields are set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub name: String,
    pub messages: Option<usize>,
    pub recent: Option<usize>,
    pub uid_next: Option<Uid>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<usize>,
}
