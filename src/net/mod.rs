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

//! Everything that touches a socket: the wire protocol, URL handling,
//! the SOCKS5 dialer, the authenticated transport session, and the
//! network transaction engine that drives them all from a single task.

pub mod engine;
pub mod session;
pub mod socks;
pub mod url;
pub mod wire;

pub use engine::{NetworkEngine, NetworkEvent, RevocationUpdate};
