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

/// `sender == 0` marks a server announcement: no contact, no decode step.
pub const SENDER_SERVER_ANNOUNCE: u64 = 0;

pub enum Body {
    /// Still sealed; the sender's key exchange hasn't completed yet.
    Sealed(Vec<u8>),
    Decoded(Vec<u8>),
}

pub struct InboxMessage {
    pub id: u64,
    pub sender: u64,
    pub received_at: u64,
    pub read: bool,
    pub acked: bool,
    pub body: Body,
    /// `SHA256(sealed)` as received, kept after decode too so duplicate
    /// deliveries from the same contact can still be recognized.
    pub digest: [u8; 32],
    /// If this message is a reply acknowledgement, the outbox id it acks.
    pub in_reply_to: Option<u64>,
}

impl InboxMessage {
    pub fn is_announcement(&self) -> bool {
        self.sender == SENDER_SERVER_ANNOUNCE
    }
}
