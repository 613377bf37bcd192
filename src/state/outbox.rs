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

use url::Url;

use crate::net::wire::Request;

pub enum OutboxKind {
    Delivery { sealed: Vec<u8>, signature: Vec<u8>, plaintext: Vec<u8> },
    Revocation { signed_revocation: Vec<u8> },
}

/// A queued request, FIFO with head-rotation: the network worker takes
/// the head, rotates it to the tail, and only removes it on a successful
/// (non-`GENERATION_REVOKED`) reply. This keeps one stuck recipient from
/// starving delivery to everyone else.
pub struct OutboxMessage {
    pub id: u64,
    pub to: u64,
    /// The recipient's identity public key, captured at enqueue time
    /// (when the orchestrator still has the `Contact` at hand) so the
    /// network worker never needs to look contacts up by id.
    pub recipient_identity: [u8; 32],
    pub server: Url,
    pub created_at: u64,
    pub sent_at: Option<u64>,
    pub acked_at: Option<u64>,
    pub kind: OutboxKind,
    /// The generation the current signature was produced under; bumped
    /// by the network worker whenever a revocation update re-signs this
    /// entry.
    pub generation_hint: u64,
}

impl OutboxMessage {
    pub fn to_request(&self) -> Request {
        match &self.kind {
            OutboxKind::Delivery { sealed, signature, .. } => Request::Deliver {
                to: self.recipient_identity,
                signature: signature.clone(),
                generation: self.generation_hint,
                message: sealed.clone(),
            },
            OutboxKind::Revocation { signed_revocation } => {
                Request::Revocation { signed_revocation: signed_revocation.clone() }
            }
        }
    }
}

/// FIFO queue shared between the orchestrator and the network worker
/// under a single mutex (the only shared mutable state in the system).
#[derive(Default)]
pub struct Outbox {
    queue: std::collections::VecDeque<OutboxMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self { queue: std::collections::VecDeque::new() }
    }

    pub fn push(&mut self, msg: OutboxMessage) {
        debug_assert!(
            !self.queue.iter().any(|m| m.id == msg.id),
            "duplicate outbox id is a programmer error"
        );
        self.queue.push_back(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Rotates the head to the tail and returns a reference to it in its
    /// new position, for the network worker to send.
    pub fn rotate_head(&mut self) -> Option<&OutboxMessage> {
        if let Some(front) = self.queue.pop_front() {
            self.queue.push_back(front);
            self.queue.back()
        } else {
            None
        }
    }

    /// Removes the (now-tail) entry with the given id after a successful
    /// send.
    pub fn remove_sent(&mut self, id: u64) -> Option<OutboxMessage> {
        let pos = self.queue.iter().position(|m| m.id == id)?;
        self.queue.remove(pos)
    }

    /// Removes every queued entry addressed to `to`, used when `to`
    /// revokes us and further delivery would be pointless.
    pub fn drop_all_to(&mut self, to: u64) -> Vec<OutboxMessage> {
        let (keep, removed): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.queue).into_iter().partition(|m| m.to != to);
        self.queue = keep.into();
        removed
    }

    pub fn iter_mut_to(&mut self, to: u64) -> impl Iterator<Item = &mut OutboxMessage> {
        self.queue.iter_mut().filter(move |m| m.to == to)
    }

    pub fn mark_acked(&mut self, id: u64, at: u64) {
        if let Some(m) = self.queue.iter_mut().find(|m| m.id == id) {
            m.acked_at = Some(at);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboxMessage> {
        self.queue.iter()
    }
}
