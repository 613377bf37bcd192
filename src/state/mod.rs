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

//! Everything the orchestrator owns: identity, contacts, the group
//! authority, the inbox/outbox/draft lists, and the plaintext shape of
//! the persisted record. No network I/O lives here.

pub mod contact;
pub mod draft;
pub mod group;
pub mod identity;
pub mod inbox;
pub mod orchestrator;
pub mod outbox;
pub mod persist;

pub use contact::Contact;
pub use draft::Draft;
pub use group::GroupAuthority;
pub use identity::Identity;
pub use inbox::InboxMessage;
pub use orchestrator::Orchestrator;
pub use outbox::{Outbox, OutboxKind, OutboxMessage};
