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

//! The message cryptographic engine: fixed-length sealing with an
//! optional ephemeral outer block, and the four-combination unsealing
//! ladder with ratchet advance. No group-signature or network code
//! lives here — this module only ever touches a single contact's DH
//! state.

use crate::{
    crypto::{boxes, sha256},
    error::{CryptoError, Error, Result, StateError},
    rng::Csprng,
    state::Contact,
};

/// Total padded application-payload capacity, before the 4-byte length
/// prefix. The sender's advertised next DH public occupies the first
/// 32 bytes of that capacity (see `DESIGN.md` — the source only
/// describes `my_next_dh` as a field of the inbound message, not its
/// placement; embedding it in the authenticated plaintext keeps it
/// confidential rather than sending it in the clear alongside the
/// ciphertext).
pub const MAX_SERIALIZED: usize = 8192;
const DH_PREFIX_LEN: usize = 32;
/// `outer_nonce(24) || box_seal(ephemeral_pub)(32 + AEAD)`.
const EPHEMERAL_BLOCK_LEN: usize = boxes::NONCE_LEN + 32 + boxes::AEAD_OVERHEAD;

pub struct SealedMessage {
    pub digest: [u8; 32],
    pub sealed: Vec<u8>,
}

pub struct UnsealedMessage {
    pub plaintext: Vec<u8>,
    pub their_next_dh: [u8; 32],
    /// Whether unsealing succeeded using `current_dh_private`, meaning
    /// the caller must ratchet.
    pub ratcheted: bool,
}

/// Seals `body` for delivery to `to`. `body.len()` must leave room for
/// the embedded DH-advertisement prefix.
pub fn seal(rng: &Csprng, to: &Contact, body: &[u8]) -> Result<SealedMessage> {
    let capacity = MAX_SERIALIZED - DH_PREFIX_LEN;
    if body.len() > capacity {
        return Err(Error::Crypto(CryptoError::MessageTooLarge))
    }

    let mut inner = Vec::with_capacity(DH_PREFIX_LEN + body.len());
    inner.extend_from_slice(to.my_next_dh_public().as_bytes());
    inner.extend_from_slice(body);

    let mut pt = Vec::with_capacity(4 + MAX_SERIALIZED);
    pt.extend_from_slice(&(inner.len() as u32).to_le_bytes());
    pt.extend_from_slice(&inner);
    let mut pad = vec![0u8; MAX_SERIALIZED - inner.len()];
    rng.fill(&mut pad);
    pt.extend_from_slice(&pad);
    debug_assert_eq!(pt.len(), 4 + MAX_SERIALIZED);

    let inner_nonce = boxes::random_nonce(rng);
    let mut sealed = Vec::new();

    if to.supported_version >= 1 {
        let (e_priv, e_pub) = boxes::generate_dh_keypair(rng);
        let outer_nonce = boxes::random_nonce(rng);
        let outer = boxes::box_seal(
            e_pub.as_bytes(),
            &outer_nonce,
            &to.their_current_dh_public,
            &to.last_dh_private,
        );
        sealed.extend_from_slice(&outer_nonce);
        sealed.extend_from_slice(&outer);
        sealed.extend_from_slice(&inner_nonce);
        sealed.extend_from_slice(&boxes::box_seal(
            &pt,
            &inner_nonce,
            &to.their_current_dh_public,
            &e_priv,
        ));
    } else {
        sealed.extend_from_slice(&inner_nonce);
        sealed.extend_from_slice(&boxes::box_seal(
            &pt,
            &inner_nonce,
            &to.their_current_dh_public,
            &to.last_dh_private,
        ));
    }

    let digest = sha256(&sealed);
    Ok(SealedMessage { digest, sealed })
}

fn parse_inner_plaintext(pt: &[u8]) -> Result<(Vec<u8>, [u8; 32])> {
    if pt.len() < 4 + DH_PREFIX_LEN {
        return Err(Error::Crypto(CryptoError::BadFraming))
    }
    let inner_len = u32::from_le_bytes(pt[0..4].try_into().unwrap()) as usize;
    if inner_len < DH_PREFIX_LEN || 4 + inner_len > pt.len() {
        return Err(Error::Crypto(CryptoError::BadFraming))
    }
    let inner = &pt[4..4 + inner_len];
    let mut their_next_dh = [0u8; 32];
    their_next_dh.copy_from_slice(&inner[..DH_PREFIX_LEN]);
    let body = inner[DH_PREFIX_LEN..].to_vec();
    Ok((body, their_next_dh))
}

/// Tries the four-combination DH ladder on `ciphertext` with `nonce`,
/// in the order the protocol requires, returning the decrypted bytes
/// and whether `current_dh_private` was the key that worked.
fn try_ladder(
    from: &Contact,
    nonce: &[u8; boxes::NONCE_LEN],
    ciphertext: &[u8],
) -> Option<(Vec<u8>, bool)> {
    let attempts = [
        (&from.their_last_dh_public, &from.last_dh_private, false),
        (&from.their_current_dh_public, &from.last_dh_private, false),
        (&from.their_last_dh_public, &from.current_dh_private, true),
        (&from.their_current_dh_public, &from.current_dh_private, true),
    ];
    for (their_pub, my_priv, used_current) in attempts {
        if let Ok(pt) = boxes::box_open(ciphertext, nonce, their_pub, my_priv) {
            return Some((pt, used_current))
        }
    }
    None
}

/// Unseals `sealed` from `from`, advancing the ratchet if warranted.
/// Mutates `from`'s DH state in place; the caller is responsible for
/// applying the returned `their_next_dh` via `observe_their_dh`.
pub fn unseal(rng: &Csprng, from: &mut Contact, sealed: &[u8]) -> Result<UnsealedMessage> {
    if from.is_pending {
        return Err(Error::State(StateError::ContactPending))
    }
    if sealed.len() < boxes::NONCE_LEN {
        return Err(Error::Crypto(CryptoError::BadFraming))
    }

    let nonce: [u8; boxes::NONCE_LEN] = sealed[0..boxes::NONCE_LEN].try_into().unwrap();
    let rest = &sealed[boxes::NONCE_LEN..];

    let (pt, used_current) = if let Some(hit) = try_ladder(from, &nonce, rest) {
        hit
    } else if sealed.len() >= EPHEMERAL_BLOCK_LEN {
        let outer_ct = &sealed[boxes::NONCE_LEN..EPHEMERAL_BLOCK_LEN];
        let (e_pub_bytes, _used_current_outer) =
            try_ladder(from, &nonce, outer_ct).ok_or(Error::Crypto(CryptoError::OpenFailed))?;
        let e_pub_bytes: [u8; 32] =
            e_pub_bytes.try_into().map_err(|_| Error::Crypto(CryptoError::BadFraming))?;
        let e_pub = boxes::PublicKey::from(e_pub_bytes);

        if sealed.len() < EPHEMERAL_BLOCK_LEN + boxes::NONCE_LEN {
            return Err(Error::Crypto(CryptoError::BadFraming))
        }
        let inner_nonce: [u8; boxes::NONCE_LEN] = sealed
            [EPHEMERAL_BLOCK_LEN..EPHEMERAL_BLOCK_LEN + boxes::NONCE_LEN]
            .try_into()
            .unwrap();
        let inner_ct = &sealed[EPHEMERAL_BLOCK_LEN + boxes::NONCE_LEN..];

        if let Ok(pt) = boxes::box_open(inner_ct, &inner_nonce, &e_pub, &from.last_dh_private) {
            (pt, false)
        } else if let Ok(pt) =
            boxes::box_open(inner_ct, &inner_nonce, &e_pub, &from.current_dh_private)
        {
            (pt, true)
        } else {
            return Err(Error::Crypto(CryptoError::OpenFailed))
        }
    } else {
        return Err(Error::Crypto(CryptoError::OpenFailed))
    };

    if used_current {
        from.ratchet_advance(rng);
    }

    let (plaintext, their_next_dh) = parse_inner_plaintext(&pt)?;
    Ok(UnsealedMessage { plaintext, their_next_dh, ratcheted: used_current })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{group_sig::GroupPrivate, sign};
    use url::Url;

    /// Builds a pair of `Contact` records, each side's view of the
    /// other, with independent ratchet keys so the four-combination
    /// ladder is genuinely exercised rather than trivially matching the
    /// first attempt.
    fn make_pair(rng: &Csprng) -> (Contact, Contact) {
        let mut authority = GroupPrivate::generate(rng);
        let a_key = authority.issue_member(rng);
        let b_key = authority.issue_member(rng);
        let group_pub = authority.public();

        let (a_last_secret, a_last_pub) = boxes::generate_dh_keypair(rng);
        let (a_current_secret, a_current_pub) = boxes::generate_dh_keypair(rng);
        let (b_last_secret, b_last_pub) = boxes::generate_dh_keypair(rng);
        let (b_current_secret, b_current_pub) = boxes::generate_dh_keypair(rng);
        let a_signing = sign::generate_signing_keypair(rng);
        let b_signing = sign::generate_signing_keypair(rng);
        let a_identity_pub = boxes::generate_dh_keypair(rng).1;
        let b_identity_pub = boxes::generate_dh_keypair(rng).1;

        // Alice's own record of her relationship with Bob.
        let alice_view_of_bob = Contact {
            id: 2,
            name: "bob".into(),
            their_identity_public: b_identity_pub,
            their_server: Url::parse(
                "pondserver://bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb@localhost:16333",
            )
            .unwrap(),
            their_signing_public: b_signing.pk,
            my_group_member_key: a_key,
            their_issued_member_key: None,
            their_group_public: group_pub.clone(),
            generation: 0,
            last_dh_private: a_last_secret,
            current_dh_private: a_current_secret,
            their_last_dh_public: b_last_pub.clone(),
            their_current_dh_public: b_current_pub.clone(),
            previous_tags: Vec::new(),
            supported_version: 1,
            is_pending: false,
            revoked: false,
            revoked_us: false,
            kxs_bytes: None,
        };

        // Bob's own record of his relationship with Alice.
        let bob_view_of_alice = Contact {
            id: 1,
            name: "alice".into(),
            their_identity_public: a_identity_pub,
            their_server: Url::parse(
                "pondserver://aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa@localhost:16333",
            )
            .unwrap(),
            their_signing_public: a_signing.pk,
            my_group_member_key: b_key,
            their_issued_member_key: None,
            their_group_public: group_pub,
            generation: 0,
            last_dh_private: b_last_secret,
            current_dh_private: b_current_secret,
            their_last_dh_public: a_last_pub,
            their_current_dh_public: a_current_pub,
            previous_tags: Vec::new(),
            supported_version: 1,
            is_pending: false,
            revoked: false,
            revoked_us: false,
            kxs_bytes: None,
        };

        (alice_view_of_bob, bob_view_of_alice)
    }

    #[test]
    fn seal_unseal_round_trips() {
        let rng = Csprng::new();
        let (alice_view_of_bob, bob_view_of_alice) = make_pair(&rng);

        let sealed = seal(&rng, &alice_view_of_bob, b"hello bob").unwrap();
        let mut bob_view_of_alice = bob_view_of_alice;
        let out = unseal(&rng, &mut bob_view_of_alice, &sealed.sealed).unwrap();
        assert_eq!(out.plaintext, b"hello bob");
    }

    #[test]
    fn zero_length_body_round_trips() {
        let rng = Csprng::new();
        let (alice_view_of_bob, bob_view_of_alice) = make_pair(&rng);
        let sealed = seal(&rng, &alice_view_of_bob, b"").unwrap();
        let mut bob_view_of_alice = bob_view_of_alice;
        let out = unseal(&rng, &mut bob_view_of_alice, &sealed.sealed).unwrap();
        assert_eq!(out.plaintext, b"");
    }

    #[test]
    fn oversized_body_is_rejected() {
        let rng = Csprng::new();
        let (alice_view_of_bob, _bob_view_of_alice) = make_pair(&rng);
        let too_big = vec![0u8; MAX_SERIALIZED];
        assert!(seal(&rng, &alice_view_of_bob, &too_big).is_err());
    }

    #[test]
    fn version_zero_peer_uses_shorter_envelope() {
        let rng = Csprng::new();
        let (mut alice_view_of_bob, mut bob_view_of_alice) = make_pair(&rng);
        alice_view_of_bob.supported_version = 0;
        bob_view_of_alice.supported_version = 0;

        let sealed = seal(&rng, &alice_view_of_bob, b"v0").unwrap();
        assert_eq!(sealed.sealed.len(), boxes::NONCE_LEN + 4 + MAX_SERIALIZED + boxes::AEAD_OVERHEAD);

        let out = unseal(&rng, &mut bob_view_of_alice, &sealed.sealed).unwrap();
        assert_eq!(out.plaintext, b"v0");
    }
}
