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

//! The local user's group authority: the current group private key plus
//! every previous one, retained so messages signed before a revocation
//! can still be opened. Never pruned (see Design Notes on retention).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::group_sig::{GroupPrivate, GroupPublic, GroupSignature, Revocation, Tag};

pub struct PreviousGroupKey {
    pub group: GroupPrivate,
    pub expired_at: u64,
}

pub struct GroupAuthority {
    pub current: GroupPrivate,
    pub previous: Vec<PreviousGroupKey>,
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl GroupAuthority {
    pub fn new(current: GroupPrivate) -> Self {
        Self { current, previous: Vec::new() }
    }

    pub fn public(&self) -> GroupPublic {
        self.current.public()
    }

    pub fn generation(&self) -> u64 {
        self.current.generation
    }

    /// Verifies a signature against the current group key, falling back
    /// to every retained previous key in order. Returns the public key
    /// generation the signature actually verified under.
    pub fn verify_any(&self, digest: &[u8], sig: &GroupSignature) -> Option<u64> {
        let current_pub = self.current.public();
        if crate::crypto::group_sig::group_verify(&current_pub, digest, sig).is_ok() {
            return Some(current_pub.generation)
        }
        for prev in &self.previous {
            let prev_pub = prev.group.public();
            if crate::crypto::group_sig::group_verify(&prev_pub, digest, sig).is_ok() {
                return Some(prev_pub.generation)
            }
        }
        None
    }

    /// Opening always happens against the current private key, per the
    /// source's behavior even for signatures that verified under a
    /// previous generation (member identifiers are stable across
    /// generations, so the current table still resolves them).
    pub fn open(&self, sig: &GroupSignature) -> Result<Tag, crate::error::CryptoError> {
        self.current.open(sig)
    }

    /// Revokes `member`, retaining a snapshot of the pre-revocation key
    /// so in-flight messages from before this point remain verifiable.
    pub fn revoke(
        &mut self,
        member: &crate::crypto::group_sig::MemberKey,
    ) -> Revocation {
        let snapshot = self.current.snapshot();
        self.previous.push(PreviousGroupKey { group: snapshot, expired_at: now() });
        self.current.generate_revocation(member)
    }
}
