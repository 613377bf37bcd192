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

//! `murmur`: the client-side core of a privacy-preserving asynchronous
//! messaging system. A home pondserver stores sealed messages until
//! recipients fetch them over Tor; this crate holds the double-ratchet
//! sealing, the group-signature membership scheme used to authorize
//! deliveries without naming the sender, and the orchestrator that ties
//! contacts, inbox, outbox, and drafts together for a host application
//! to drive.

pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod rng;
pub mod state;
pub mod system;
pub mod transfer;

pub use error::{Error, Result};
pub use rng::Csprng;
pub use state::{Contact, Draft, GroupAuthority, Identity, InboxMessage, Orchestrator, Outbox, OutboxKind, OutboxMessage};
