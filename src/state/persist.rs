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

//! The plaintext shape of the persisted state blob. Encryption-at-rest
//! and the actual file write/read are the host application's job; this
//! module only owns the wire-encodable record and the conversions to
//! and from the live in-memory types the orchestrator mutates.

use darkfi_serial::{SerialDecodable, SerialEncodable};

#[derive(Clone, SerialEncodable, SerialDecodable)]
pub struct PersistedContact {
    pub id: u64,
    pub name: String,
    pub their_identity_public: [u8; 32],
    pub their_server: String,
    pub their_signing_public: Vec<u8>,
    pub my_group_member_key: Vec<u8>,
    /// Empty until key exchange completes, matching `kxs_bytes`'s
    /// empty-means-absent convention.
    pub their_issued_member_key: Vec<u8>,
    pub their_group_public: Vec<u8>,
    pub generation: u64,
    pub last_dh_private: [u8; 32],
    pub current_dh_private: [u8; 32],
    pub their_last_dh_public: [u8; 32],
    pub their_current_dh_public: [u8; 32],
    pub previous_tags: Vec<(Vec<u8>, u64)>,
    pub supported_version: u8,
    pub is_pending: bool,
    pub revoked: bool,
    pub revoked_us: bool,
    pub kxs_bytes: Vec<u8>,
}

#[derive(Clone, SerialEncodable, SerialDecodable)]
pub struct PersistedInbox {
    pub id: u64,
    pub sender: u64,
    pub received_at: u64,
    pub read: bool,
    pub acked: bool,
    pub decoded: bool,
    pub body: Vec<u8>,
    pub digest: [u8; 32],
    pub in_reply_to: Option<u64>,
}

#[derive(Clone, SerialEncodable, SerialDecodable)]
pub struct PersistedOutbox {
    pub id: u64,
    pub to: u64,
    pub recipient_identity: [u8; 32],
    pub server: String,
    pub created_at: u64,
    pub sent_at: Option<u64>,
    pub acked_at: Option<u64>,
    pub is_revocation: bool,
    pub sealed_or_signed_revocation: Vec<u8>,
    pub signature: Vec<u8>,
    pub plaintext: Vec<u8>,
    pub generation_hint: u64,
}

#[derive(Clone, SerialEncodable, SerialDecodable)]
pub struct PersistedDraft {
    pub id: u64,
    pub to: u64,
    pub body: String,
    pub last_edited_at: u64,
}

#[derive(Clone, SerialEncodable, SerialDecodable)]
pub struct PersistedPreviousGroupKey {
    /// `GroupPrivate::to_bytes()`, the full secret plus its private
    /// opening table (needed to open signatures issued under it).
    pub group_private: Vec<u8>,
    pub expired_at: u64,
}

#[derive(Clone, SerialEncodable, SerialDecodable)]
pub struct PersistedState {
    pub dh_secret: [u8; 32],
    /// Raw `ed25519_compact::SecretKey` bytes (seed + public key).
    pub signing_sk: Vec<u8>,
    pub server: String,
    /// `GroupPrivate::to_bytes()`; carries its own generation counter.
    pub group_private: Vec<u8>,
    pub previous_group_keys: Vec<PersistedPreviousGroupKey>,
    pub contacts: Vec<PersistedContact>,
    pub inbox: Vec<PersistedInbox>,
    pub outbox: Vec<PersistedOutbox>,
    pub drafts: Vec<PersistedDraft>,
    pub next_contact_id: u64,
    pub next_inbox_id: u64,
    pub next_outbox_id: u64,
    pub next_draft_id: u64,
}
