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

//! The user's own long-term identity: an X25519 key pair used to prove
//! possession during the transport handshake, an Ed25519 signing key
//! used for revocation authentication, and the home server URL.

use url::Url;

use crate::{
    crypto::{boxes, sign},
    rng::Csprng,
};

pub struct Identity {
    pub dh_secret: boxes::SecretKey,
    pub dh_public: boxes::PublicKey,
    pub signing: sign::KeyPair,
    pub server: Url,
}

impl Identity {
    pub fn generate(rng: &Csprng, server: Url) -> Self {
        let (dh_secret, dh_public) = boxes::generate_dh_keypair(rng);
        let signing = sign::generate_signing_keypair(rng);
        Self { dh_secret, dh_public, signing, server }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.dh_public.as_bytes()
    }
}

/// A freshly sampled key pair used once for a single delivery connection
/// so that the home-server identity is never linkable to the connections
/// it makes to deliver outgoing mail.
pub fn random_connection_identity(rng: &Csprng) -> (boxes::SecretKey, boxes::PublicKey) {
    boxes::generate_dh_keypair(rng)
}
