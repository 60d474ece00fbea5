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

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The system-wide configuration for Pigeonhole.
///
/// This is stored in a file named `pigeonhole.toml`, typically under
/// `/usr/local/etc/pigeonhole` or `/etc/pigeonhole`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Where and how mail is stored.
    #[serde(default)]
    pub storage: StorageConfig,

    /// How recipients of local deliveries are mapped to users.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SystemConfig {
    /// Load the configuration from the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The directory containing one directory per user.
    pub users_dir: PathBuf,

    /// The largest message, in bytes, accepted for delivery.
    pub max_message_size: u64,

    /// Permission bits for metadata files.
    pub metadata_mode: u32,

    /// Permission bits for message files. Messages are never modified after
    /// delivery, so this normally excludes write permission.
    pub message_mode: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            users_dir: PathBuf::from("users"),
            max_message_size: 64 * 1024 * 1024,
            metadata_mode: 0o600,
            message_mode: 0o440,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// If true, the domain part of destination email addresses is kept.
    ///
    /// When false, `user@foo.com` and `user@bar.com` are both delivered to a
    /// user named `user`. When true, they are delivered to separate users
    /// called `user@foo.com` and `user@bar.com`, respectively.
    pub keep_recipient_domain: bool,

    /// If true, no modification of the user name is performed.
    ///
    /// By default, all periods are removed, everything after and including a
    /// `+` is deleted, and the user name is converted to lower case.
    pub verbatim_user_names: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// If set, a log4rs configuration file used instead of the built-in
    /// console logger.
    pub config_file: Option<PathBuf>,

    /// The level for the built-in console logger.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            config_file: None,
            level: "info".to_owned(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_partial_config() {
        let config: SystemConfig = toml::from_str(
            r#"
[storage]
users_dir = "/var/mail/users"
max_message_size = 1024

[delivery]
verbatim_user_names = true
"#,
        )
        .unwrap();

        assert_eq!(PathBuf::from("/var/mail/users"), config.storage.users_dir);
        assert_eq!(1024, config.storage.max_message_size);
        assert_eq!(0o600, config.storage.metadata_mode);
        assert_eq!(0o440, config.storage.message_mode);
        assert!(config.delivery.verbatim_user_names);
        assert!(!config.delivery.keep_recipient_domain);
        assert_eq!("info", config.logging.level);
        assert!(config.logging.config_file.is_none());
    }

    #[test]
    fn load_from_file() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let path = tmpdir.path().join("pigeonhole.toml");
        fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!("debug", config.logging.level);
        assert_eq!(PathBuf::from("users"), config.storage.users_dir);

        fs::write(&path, "[storage]\nmax_message_size = \"lots\"\n").unwrap();
        assert_matches!(Err(Error::Toml(_)), SystemConfig::load(&path));
    }
}
