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

use crate::crypto::{boxes, group_sig, sign};

/// A known correspondent. Addressed everywhere by `id`, never by a
/// pointer, so references survive map rehashing and persistence
/// round-trips.
pub struct Contact {
    pub id: u64,
    pub name: String,

    pub their_identity_public: boxes::PublicKey,
    pub their_server: Url,
    pub their_signing_public: sign::PublicKey,

    /// The member credential we issued to this contact under our own
    /// group authority. Used to recognize and revoke messages *from*
    /// them: `Orchestrator::contact_for_tag` matches this key's tag
    /// against whatever our own `GroupAuthority` opens, and
    /// `revoke_contact` feeds it to our authority's revocation.
    pub my_group_member_key: group_sig::MemberKey,

    /// The member credential *this contact* issued to us under *their*
    /// group authority, received once key exchange completes. Used to
    /// sign deliveries addressed to them, and re-bound (or invalidated)
    /// if they later revoke us.
    pub their_issued_member_key: Option<group_sig::MemberKey>,

    pub their_group_public: group_sig::GroupPublic,
    pub generation: u64,

    pub last_dh_private: boxes::SecretKey,
    pub current_dh_private: boxes::SecretKey,
    pub their_last_dh_public: boxes::PublicKey,
    pub their_current_dh_public: boxes::PublicKey,

    /// Tags recognized from before a revocation, paired with the time
    /// they were superseded.
    pub previous_tags: Vec<(group_sig::Tag, u64)>,

    pub supported_version: u8,
    pub is_pending: bool,
    pub revoked: bool,
    pub revoked_us: bool,

    /// Handshake material retained only until key exchange completes.
    pub kxs_bytes: Option<Vec<u8>>,
}

impl Contact {
    /// Whether an outbound message may still be enqueued to this contact.
    pub fn can_send(&self) -> bool {
        !self.is_pending && !self.revoked && !self.revoked_us
    }

    /// Advances the ratchet: called whenever an unseal succeeds using
    /// `current_dh_private`, acknowledging the peer has seen it.
    pub fn ratchet_advance(&mut self, rng: &crate::rng::Csprng) {
        let (new_secret, _new_public) = boxes::generate_dh_keypair(rng);
        self.last_dh_private = std::mem::replace(&mut self.current_dh_private, new_secret);
    }

    /// Our own next DH public value to advertise to this contact.
    pub fn my_next_dh_public(&self) -> boxes::PublicKey {
        self.current_dh_private.public_key()
    }

    /// Applies a freshly-observed DH public from the peer, shifting our
    /// record of their last/current values if it changed.
    pub fn observe_their_dh(&mut self, next: boxes::PublicKey) {
        if next.as_bytes() != self.their_current_dh_public.as_bytes() {
            self.their_last_dh_public = std::mem::replace(&mut self.their_current_dh_public, next);
        }
    }
}
