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

/// Determine whether the given name is "safe".
///
/// This is used to validate user names and the individual components of
/// mailbox names, both of which become file system elements. It excludes
/// empty names and patterns that cause directory traversal or other unwanted
/// behaviours, as well as things that have special meaning within IMAP.
///
/// The `.` hierarchy delimiter is permitted inside a name but not at its
/// start, so a joined mailbox path such as `INBOX.Lists` is still safe while
/// `..` and hidden files are not.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() &&
        // Block directory traversal through .. and creation of hidden files on
        // UNIX
        !name.starts_with('.') &&
        !name.contains('/') &&
        // Only a path separator on Windows, but always block since it has high
        // potential of causing problems
        !name.contains('\\') &&
        // Names beginning with # have special meaning in IMAP
        !name.starts_with('#') &&
        // Don't allow any ASCII control characters
        !name.contains(|c| c < ' ' || c == '\x7F') &&
        // * and % are IMAP LIST wildcards, so forbid everywhere
        !name.contains(|c| c == '*' || c == '%')
}
