/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! CLI and TOML configuration for `murmurd`, merged through
//! `structopt_toml`: flags passed on the command line always win over
//! the config file, and the config file wins over the built-in default.

use std::time::Duration;

use serde::Deserialize;
use structopt::StructOpt;
use structopt_toml::StructOptToml;
use url::Url;

use crate::{
    error::{Error, Result},
    net::engine::{DEFAULT_POLL_MEAN, TESTING_POLL_MEAN},
};

pub const CONFIG_FILE: &str = "murmurd_config.toml";
pub const CONFIG_FILE_CONTENTS: &str = include_str!("../murmurd_config.toml");

/// murmurd cli
#[derive(Clone, Deserialize, StructOpt, StructOptToml)]
#[serde(default)]
#[structopt(name = "murmurd")]
pub struct Args {
    /// Sets a custom config file
    #[structopt(long)]
    pub config: Option<String>,

    /// Our home pondserver, where outgoing deliveries, fetches, and
    /// account creation all go
    #[structopt(long)]
    pub home_server: Option<Url>,

    /// Local SOCKS5 proxy used to reach the home server anonymously
    #[structopt(long, default_value = "127.0.0.1:9050")]
    pub socks_addr: String,

    /// Directory holding the encrypted state blob and any in-progress
    /// detachment transfers
    #[structopt(long, default_value = "~/.local/share/murmur")]
    pub data_dir: String,

    /// Run in a testing profile: shrinks the Poisson polling mean and
    /// relaxes pondserver url production checks
    #[structopt(long)]
    pub testing: bool,

    /// Set log file to output into
    #[structopt(short, long)]
    pub log: Option<String>,

    /// Increase verbosity
    #[structopt(short, parse(from_occurrences))]
    pub verbose: u8,
}

impl Args {
    /// Parses CLI arguments merged with the on-disk config file
    /// (`--config`, falling back to `CONFIG_FILE` in `data_dir`), which
    /// in turn falls back to the built-in defaults in
    /// `CONFIG_FILE_CONTENTS`.
    pub fn load() -> Result<Self> {
        let cli = Self::from_args();
        let config_path = cli.config.clone();

        let contents = match config_path {
            Some(path) => std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("failed to read config file {path}: {e}")))?,
            None => CONFIG_FILE_CONTENTS.to_string(),
        };

        Self::from_args_with_toml(&contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    pub fn poll_mean(&self) -> Duration {
        if self.testing {
            TESTING_POLL_MEAN
        } else {
            DEFAULT_POLL_MEAN
        }
    }

    pub fn home_server(&self) -> Result<Url> {
        self.home_server
            .clone()
            .ok_or_else(|| Error::Config("home_server is not set".into()))
    }

    pub fn data_dir(&self) -> Result<std::path::PathBuf> {
        let expanded = shellexpand(&self.data_dir);
        Ok(std::path::PathBuf::from(expanded))
    }
}

/// Expands a leading `~` to the user's home directory. `structopt-toml`
/// gives us no hook for this so it happens on first use instead.
fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy())
        }
    }
    path.to_string()
}
