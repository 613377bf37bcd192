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

//! The single-threaded state owner. Everything that touches a contact,
//! the inbox, the outbox, or a draft goes through here; the network
//! worker only ever sees the outbox queue, under its shared mutex.
//! Every mutating method flips `dirty`, which the host application
//! polls to decide when to persist.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use smol::{channel::Sender, lock::Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::{
    crypto::{
        boxes,
        group_sig::{self, GroupPrivate, GroupPublic, Tag},
        sha256, sign,
    },
    error::{CryptoError, Error, Result, StateError},
    net::engine::{NetworkEvent, RevocationUpdate},
    rng::Csprng,
    state::{
        contact::Contact,
        draft::Draft,
        group::{GroupAuthority, PreviousGroupKey},
        identity::Identity,
        inbox::{Body, InboxMessage, SENDER_SERVER_ANNOUNCE},
        outbox::{Outbox, OutboxKind, OutboxMessage},
        persist::{
            PersistedContact, PersistedDraft, PersistedInbox, PersistedOutbox,
            PersistedPreviousGroupKey, PersistedState,
        },
        seal,
    },
};

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

const BODY_KIND_TEXT: u8 = 0;
const BODY_KIND_REPLY_ACK: u8 = 1;

/// The application-level body carried inside `seal`'s plaintext: a
/// one-byte kind tag, and for a reply ack the 8-byte little-endian
/// outbox id being acknowledged ahead of the display bytes.
fn encode_message_body(display: &[u8], in_reply_to: Option<u64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + display.len());
    match in_reply_to {
        Some(id) => {
            out.push(BODY_KIND_REPLY_ACK);
            out.extend_from_slice(&id.to_le_bytes());
        }
        None => out.push(BODY_KIND_TEXT),
    }
    out.extend_from_slice(display);
    out
}

fn decode_message_body(raw: &[u8]) -> (Option<u64>, Vec<u8>) {
    match raw.split_first() {
        Some((&BODY_KIND_REPLY_ACK, rest)) if rest.len() >= 8 => {
            let id = u64::from_le_bytes(rest[0..8].try_into().unwrap());
            (Some(id), rest[8..].to_vec())
        }
        Some((_, rest)) => (None, rest.to_vec()),
        None => (None, Vec::new()),
    }
}

/// `{ revocation, generation }`, signed over `"revocation\0" || serialize(...)`
/// per the revocation domain-separation requirement. The struct only
/// exists to give that serialization a name; it is never kept around
/// after `build`/`parse`.
fn serialize_revocation_body(rev_bytes: &[u8], generation: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 4 + rev_bytes.len());
    out.extend_from_slice(&generation.to_le_bytes());
    out.extend_from_slice(&(rev_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(rev_bytes);
    out
}

fn build_signed_revocation(
    signing_secret: &sign::SecretKey,
    rev: &group_sig::Revocation,
    generation: u64,
) -> Vec<u8> {
    let rev_bytes = rev.to_bytes();
    let body = serialize_revocation_body(&rev_bytes, generation);
    let mut transcript = Vec::with_capacity(sign::REVOCATION_DOMAIN.len() + body.len());
    transcript.extend_from_slice(sign::REVOCATION_DOMAIN);
    transcript.extend_from_slice(&body);
    let sig = sign::sign(signing_secret, &transcript);

    let mut out = body;
    out.extend_from_slice(&sig.to_vec());
    out
}

/// The inverse of `build_signed_revocation`: returns the parsed
/// revocation and generation once the signature has verified.
fn parse_signed_revocation(
    their_signing_public: &sign::PublicKey,
    bytes: &[u8],
) -> Result<(group_sig::Revocation, u64)> {
    if bytes.len() < 64 {
        return Err(Error::Crypto(CryptoError::BadSignatureLength))
    }
    let (body, sig_bytes) = bytes.split_at(bytes.len() - 64);

    let mut transcript = Vec::with_capacity(sign::REVOCATION_DOMAIN.len() + body.len());
    transcript.extend_from_slice(sign::REVOCATION_DOMAIN);
    transcript.extend_from_slice(body);
    let sig = sign::signature_from_bytes(sig_bytes)?;
    sign::verify(their_signing_public, &transcript, &sig)?;

    if body.len() < 12 {
        return Err(Error::Crypto(CryptoError::BadFraming))
    }
    let generation = u64::from_le_bytes(body[0..8].try_into().unwrap());
    let rev_len = u32::from_le_bytes(body[8..12].try_into().unwrap()) as usize;
    if body.len() < 12 + rev_len {
        return Err(Error::Crypto(CryptoError::BadFraming))
    }
    let rev = group_sig::Revocation::from_bytes(&body[12..12 + rev_len])?;
    Ok((rev, generation))
}

/// The outcome of handing a freshly arrived inbox entry to the UI layer,
/// returned so callers (tests, a future UI binding) can react without
/// re-deriving it from `Orchestrator`'s private state.
pub enum Delivered {
    Message { inbox_id: u64, sender: u64, plaintext: Vec<u8> },
    Announcement { inbox_id: u64, plaintext: Vec<u8> },
    Duplicate,
    UnknownSender,
    Undecodable,
}

pub struct Orchestrator {
    pub identity: Identity,
    pub group: GroupAuthority,

    contacts: HashMap<u64, Contact>,
    contacts_by_name: HashSet<String>,
    next_contact_id: u64,

    inbox: Vec<InboxMessage>,
    next_inbox_id: u64,
    seen_digests: HashSet<(u64, [u8; 32])>,

    outbox: Arc<Mutex<Outbox>>,
    next_outbox_id: u64,

    drafts: Vec<Draft>,
    next_draft_id: u64,

    revocations: Sender<RevocationUpdate>,
    rng: Csprng,

    dirty: bool,
}

impl Orchestrator {
    pub fn new(
        identity: Identity,
        group: GroupAuthority,
        outbox: Arc<Mutex<Outbox>>,
        revocations: Sender<RevocationUpdate>,
        rng: Csprng,
    ) -> Self {
        Self {
            identity,
            group,
            contacts: HashMap::new(),
            contacts_by_name: HashSet::new(),
            next_contact_id: 1,
            inbox: Vec::new(),
            next_inbox_id: 1,
            seen_digests: HashSet::new(),
            outbox,
            next_outbox_id: 1,
            drafts: Vec::new(),
            next_draft_id: 1,
            revocations,
            rng,
            dirty: false,
        }
    }

    /// Whether any mutation has happened since the last `clear_dirty`.
    /// The host is expected to persist and call `clear_dirty` in
    /// response; this module never performs I/O itself.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn contact(&self, id: u64) -> Option<&Contact> {
        self.contacts.get(&id)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn inbox(&self) -> &[InboxMessage] {
        &self.inbox
    }

    pub fn drafts(&self) -> &[Draft] {
        &self.drafts
    }

    /// Adds a new contact in the `pending` state: we've issued them a
    /// member credential under our current group, but their half of the
    /// DH key exchange hasn't arrived yet.
    pub fn add_pending_contact(
        &mut self,
        name: String,
        their_identity_public: crate::crypto::boxes::PublicKey,
        their_server: Url,
        their_signing_public: sign::PublicKey,
    ) -> Result<u64> {
        if self.contacts_by_name.contains(&name) {
            return Err(Error::State(StateError::DuplicateName(name)))
        }

        let id = self.next_contact_id;
        self.next_contact_id += 1;

        let member_key = self.group.current.issue_member(&self.rng);
        let (last_secret, last_public) = crate::crypto::boxes::generate_dh_keypair(&self.rng);
        let (current_secret, current_public) = crate::crypto::boxes::generate_dh_keypair(&self.rng);

        let contact = Contact {
            id,
            name: name.clone(),
            their_identity_public,
            their_server,
            their_signing_public,
            my_group_member_key: member_key,
            their_issued_member_key: None,
            their_group_public: self.group.public(),
            generation: 0,
            last_dh_private: last_secret,
            current_dh_private: current_secret,
            their_last_dh_public: last_public,
            their_current_dh_public: current_public,
            previous_tags: Vec::new(),
            supported_version: 1,
            is_pending: true,
            revoked: false,
            revoked_us: false,
            kxs_bytes: None,
        };

        self.contacts.insert(id, contact);
        self.contacts_by_name.insert(name);
        self.dirty = true;
        Ok(id)
    }

    /// Completes key exchange for a pending contact once their DH and
    /// group-signature material has been received out of band: their
    /// group/DH public keys, the member credential *they* issued to us
    /// (the credential we'll sign outgoing deliveries with), and the
    /// negotiated protocol version.
    pub fn complete_key_exchange(
        &mut self,
        contact_id: u64,
        their_group_public: GroupPublic,
        their_current_dh_public: crate::crypto::boxes::PublicKey,
        their_issued_member_key: group_sig::MemberKey,
        negotiated_version: u8,
    ) -> Result<()> {
        let contact = self
            .contacts
            .get_mut(&contact_id)
            .ok_or(Error::State(StateError::UnknownContact(contact_id)))?;
        contact.their_group_public = their_group_public;
        contact.their_current_dh_public = their_current_dh_public;
        contact.their_issued_member_key = Some(their_issued_member_key);
        contact.supported_version = negotiated_version;
        contact.is_pending = false;
        contact.kxs_bytes = None;
        self.dirty = true;
        Ok(())
    }

    // -- Drafts (§2.2, §3) ---------------------------------------------

    pub fn save_draft(&mut self, id: Option<u64>, to: u64, body: String) -> u64 {
        let at = now();
        if let Some(id) = id {
            if let Some(d) = self.drafts.iter_mut().find(|d| d.id == id) {
                d.to = to;
                d.body = body;
                d.last_edited_at = at;
                self.dirty = true;
                return id
            }
        }
        let id = self.next_draft_id;
        self.next_draft_id += 1;
        self.drafts.push(Draft { id, to, body, last_edited_at: at });
        self.dirty = true;
        id
    }

    pub fn discard_draft(&mut self, id: u64) -> Result<()> {
        let pos = self.drafts.iter().position(|d| d.id == id).ok_or(Error::State(StateError::UnknownDraft(id)))?;
        self.drafts.remove(pos);
        self.dirty = true;
        Ok(())
    }

    /// Seals a draft's body, enqueues the delivery, and removes the
    /// draft. Returns the new outbox entry's id.
    pub async fn send_draft(&mut self, id: u64) -> Result<u64> {
        let pos = self.drafts.iter().position(|d| d.id == id).ok_or(Error::State(StateError::UnknownDraft(id)))?;
        let draft = self.drafts.remove(pos);
        let outbox_id = self.enqueue_delivery(draft.to, draft.body.into_bytes(), None).await?;
        self.dirty = true;
        Ok(outbox_id)
    }

    /// Seals `body` for `to` and pushes the delivery onto the shared
    /// outbox queue. Used directly by `send_draft` and available for
    /// one-off sends that never went through a draft. `in_reply_to`, if
    /// given, is carried inside the sealed body so the recipient can
    /// mark the referenced outbox entry acked on receipt.
    pub async fn enqueue_delivery(&mut self, to: u64, body: Vec<u8>, in_reply_to: Option<u64>) -> Result<u64> {
        let contact = self.contacts.get(&to).ok_or(Error::State(StateError::UnknownContact(to)))?;
        if !contact.can_send() {
            return Err(Error::State(StateError::ContactRevoked(to)))
        }

        let their_member_key =
            contact.their_issued_member_key.as_ref().ok_or(Error::State(StateError::ContactPending))?;
        let wire_body = encode_message_body(&body, in_reply_to);
        let sealed = seal::seal(&self.rng, contact, &wire_body)?;
        let signature = group_sig::group_sign(their_member_key, &contact.their_group_public, &sealed.digest)
            .map_err(Error::Crypto)?;

        let id = self.next_outbox_id;
        self.next_outbox_id += 1;

        let msg = OutboxMessage {
            id,
            to,
            recipient_identity: *contact.their_identity_public.as_bytes(),
            server: contact.their_server.clone(),
            created_at: now(),
            sent_at: None,
            acked_at: None,
            kind: OutboxKind::Delivery { sealed: sealed.sealed, signature: signature.to_bytes(), plaintext: body },
            generation_hint: contact.generation,
        };

        self.outbox.lock().await.push(msg);
        self.dirty = true;
        Ok(id)
    }

    // -- Revocation (C3, §4.3) -------------------------------------------

    /// Revokes `to`: re-keys our group away from their member credential,
    /// re-binds every other contact's credential to the new secret, and
    /// enqueues a signed revocation delivery to `to`'s server.
    pub async fn revoke_contact(&mut self, to: u64) -> Result<()> {
        let target_member_key = {
            let contact = self.contacts.get(&to).ok_or(Error::State(StateError::UnknownContact(to)))?;
            contact.my_group_member_key.clone()
        };

        let rev = self.group.revoke(&target_member_key);
        let new_generation = self.group.generation();

        for (id, other) in self.contacts.iter_mut() {
            if *id == to {
                continue
            }
            other.previous_tags.push((other.my_group_member_key.tag(), now()));
            let updated = other.my_group_member_key.update(&rev);
            debug_assert!(updated, "revocation must re-bind every unrevoked member's key");
        }

        let (to_server, to_identity) = {
            let contact = self.contacts.get_mut(&to).unwrap();
            contact.revoked = true;
            (contact.their_server.clone(), *contact.their_identity_public.as_bytes())
        };

        let signed_revocation = build_signed_revocation(&self.identity.signing.sk, &rev, new_generation);

        let outbox_id = self.next_outbox_id;
        self.next_outbox_id += 1;
        let msg = OutboxMessage {
            id: outbox_id,
            to,
            recipient_identity: to_identity,
            server: to_server,
            created_at: now(),
            sent_at: None,
            acked_at: None,
            kind: OutboxKind::Revocation { signed_revocation },
            generation_hint: new_generation,
        };
        self.outbox.lock().await.push(msg);
        self.dirty = true;
        Ok(())
    }

    /// Handles a `GENERATION_REVOKED` reply naming `to` as the recipient
    /// whose generation has moved. `to.generation` here is our last
    /// known generation for them; a revocation only ever moves an
    /// authority forward by one step, so it's only applied if it's
    /// exactly the next generation after ours.
    async fn receive_revocation_for_us(&mut self, to: u64, signed_revocation: &[u8]) -> Result<()> {
        let their_signing_public = self
            .contacts
            .get(&to)
            .ok_or(Error::State(StateError::UnknownContact(to)))?
            .their_signing_public;

        let last_known_generation = self.contacts.get(&to).unwrap().generation;
        let (rev, generation) = parse_signed_revocation(&their_signing_public, signed_revocation)?;
        let expected_generation = last_known_generation + 1;
        if generation != expected_generation {
            warn!("revocation generation mismatch for contact {to}: expected {expected_generation}, got {generation}");
            return Err(Error::State(StateError::GenerationMismatch { expected: expected_generation, got: generation }))
        }

        let contact = self.contacts.get_mut(&to).unwrap();
        contact.generation = generation;
        let survived = match contact.their_issued_member_key.as_mut() {
            Some(key) => key.update(&rev),
            None => false,
        };

        if !survived {
            contact.revoked_us = true;
            contact.their_issued_member_key = None;
            let removed = self.outbox.lock().await.drop_all_to(to);
            debug!("contact {to} revoked us; dropped {} queued deliveries", removed.len());
        } else {
            let update = RevocationUpdate {
                contact: to,
                member_key: contact.their_issued_member_key.clone().unwrap(),
                group_public: contact.their_group_public.clone(),
                generation: contact.generation,
            };
            let _ = self.revocations.send(update).await;
        }

        self.dirty = true;
        Ok(())
    }

    // -- Inbound message processing (C3 "processing a fetched message") --

    /// Resolves the anonymous group signature on a fetched message to
    /// the contact that sent it, unseals it, and records it in the
    /// inbox. Never panics on malformed or unverifiable input: anything
    /// that fails crypto or tag resolution is dropped per §7.
    pub async fn process_fetched(&mut self, signature: Vec<u8>, message: Vec<u8>) -> Delivered {
        match self.process_fetched_inner(signature, message).await {
            Ok(d) => d,
            Err(e) => {
                debug!("dropped fetched message: {e}");
                Delivered::Undecodable
            }
        }
    }

    async fn process_fetched_inner(&mut self, signature: Vec<u8>, message: Vec<u8>) -> Result<Delivered> {
        let digest = sha256(&message);
        let sig = group_sig::GroupSignature::from_bytes(&signature).map_err(Error::Crypto)?;

        let tag = self.resolve_tag(&digest, &sig)?;
        let sender = self.contact_for_tag(tag);

        let Some(sender_id) = sender else { return Ok(Delivered::UnknownSender) };

        if self.seen_digests.contains(&(sender_id, digest)) {
            return Ok(Delivered::Duplicate)
        }

        let contact = self.contacts.get(&sender_id).ok_or(Error::State(StateError::UnknownContact(sender_id)))?;
        if contact.revoked {
            return Ok(Delivered::UnknownSender)
        }
        if contact.is_pending {
            // Key exchange hasn't completed; keep the ciphertext for
            // later instead of dropping it outright.
            let id = self.next_inbox_id;
            self.next_inbox_id += 1;
            self.inbox.push(InboxMessage {
                id,
                sender: sender_id,
                received_at: now(),
                read: false,
                acked: false,
                body: Body::Sealed(message),
                digest,
                in_reply_to: None,
            });
            self.seen_digests.insert((sender_id, digest));
            self.dirty = true;
            return Ok(Delivered::Undecodable)
        }

        let contact = self.contacts.get_mut(&sender_id).unwrap();
        let unsealed = seal::unseal(&self.rng, contact, &message)?;
        contact.observe_their_dh(crate::crypto::boxes::PublicKey::from(unsealed.their_next_dh));

        let (in_reply_to, display) = decode_message_body(&unsealed.plaintext);
        if let Some(outbox_id) = in_reply_to {
            self.outbox.lock().await.mark_acked(outbox_id, now());
        }

        let id = self.next_inbox_id;
        self.next_inbox_id += 1;
        self.inbox.push(InboxMessage {
            id,
            sender: sender_id,
            received_at: now(),
            read: false,
            acked: false,
            body: Body::Decoded(display.clone()),
            digest,
            in_reply_to,
        });
        self.seen_digests.insert((sender_id, digest));
        self.dirty = true;

        Ok(Delivered::Message { inbox_id: id, sender: sender_id, plaintext: display })
    }

    fn resolve_tag(&self, digest: &[u8; 32], sig: &group_sig::GroupSignature) -> Result<Tag> {
        if group_sig::group_verify(&self.group.public(), digest, sig).is_ok() {
            return self.group.open(sig).map_err(Error::Crypto)
        }
        for prev in &self.group.previous {
            let prev_pub = prev.group.public();
            if group_sig::group_verify(&prev_pub, digest, sig).is_ok() {
                // Opened against the *current* private key, matching the
                // preserved source behavior noted in the design docs.
                return self.group.open(sig).map_err(Error::Crypto)
            }
        }
        Err(Error::Crypto(CryptoError::BadGroupSignature))
    }

    fn contact_for_tag(&self, tag: Tag) -> Option<u64> {
        for contact in self.contacts.values() {
            if contact.my_group_member_key.tag() == tag {
                return Some(contact.id)
            }
            if contact.previous_tags.iter().any(|(t, _)| *t == tag) {
                return Some(contact.id)
            }
        }
        None
    }

    /// Records a server announcement (sender id 0, no decode step).
    pub fn record_announcement(&mut self, message: Vec<u8>) -> u64 {
        let id = self.next_inbox_id;
        self.next_inbox_id += 1;
        let digest = sha256(&message);
        self.inbox.push(InboxMessage {
            id,
            sender: SENDER_SERVER_ANNOUNCE,
            received_at: now(),
            read: false,
            acked: false,
            body: Body::Decoded(message),
            digest,
            in_reply_to: None,
        });
        self.dirty = true;
        id
    }

    // -- Network worker event dispatch -----------------------------------

    /// Consumes one event from the network worker. This is the single
    /// entry point the daemon's main loop feeds `NetworkEvent`s into.
    pub async fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Fetched { signature, message } => {
                let _ = self.process_fetched(signature, message).await;
            }
            NetworkEvent::Announce { message } => {
                let _ = self.record_announcement(message);
            }
            NetworkEvent::MessageSent { id } => {
                let mut outbox = self.outbox.lock().await;
                outbox.mark_acked(id, now());
                self.dirty = true;
            }
            NetworkEvent::MessageRevoked { id: _, to, revocation } => {
                if let Err(e) = self.receive_revocation_for_us(to, &revocation.signed_revocation).await {
                    warn!("failed to process revocation targeting us: {e}");
                }
            }
        }
    }

    // -- Persistence (host-driven; see module docs) -----------------------

    /// Snapshots everything needed to reconstruct this orchestrator,
    /// plaintext. Encrypting and writing the result is the host's job.
    pub async fn to_persisted(&self) -> PersistedState {
        let contacts = self.contacts.values().map(persist_contact).collect();
        let inbox = self.inbox.iter().map(persist_inbox).collect();
        let drafts = self.drafts.iter().map(persist_draft).collect();
        let outbox = self.outbox.lock().await.iter().map(persist_outbox).collect();

        let previous_group_keys = self
            .group
            .previous
            .iter()
            .map(|p| PersistedPreviousGroupKey {
                group_private: p.group.to_bytes(),
                expired_at: p.expired_at,
            })
            .collect();

        PersistedState {
            dh_secret: self.identity.dh_secret.to_bytes(),
            signing_sk: self.identity.signing.sk.as_ref().to_vec(),
            server: self.identity.server.to_string(),
            group_private: self.group.current.to_bytes(),
            previous_group_keys,
            contacts,
            inbox,
            outbox,
            drafts,
            next_contact_id: self.next_contact_id,
            next_inbox_id: self.next_inbox_id,
            next_outbox_id: self.next_outbox_id,
            next_draft_id: self.next_draft_id,
        }
    }

    /// Rebuilds an orchestrator from a snapshot written by `to_persisted`.
    /// `outbox` is the shared queue the network worker already holds a
    /// handle to; its contents are replaced with the persisted ones.
    pub async fn from_persisted(
        state: PersistedState,
        outbox: Arc<Mutex<Outbox>>,
        revocations: Sender<RevocationUpdate>,
        rng: Csprng,
    ) -> Result<Self> {
        let dh_secret = boxes::SecretKey::from(state.dh_secret);
        let dh_public = dh_secret.public_key();
        let signing_sk = sign::SecretKey::from_slice(&state.signing_sk)
            .map_err(|_| Error::Malformed("bad persisted signing secret key"))?;
        let signing_pk = signing_sk.public_key();
        let server = state
            .server
            .parse()
            .map_err(|_| Error::Malformed("bad persisted identity server url"))?;

        let identity = Identity {
            dh_secret,
            dh_public,
            signing: sign::KeyPair { pk: signing_pk, sk: signing_sk },
            server,
        };

        let current = GroupPrivate::from_bytes(&state.group_private).map_err(Error::Crypto)?;
        let mut previous = Vec::with_capacity(state.previous_group_keys.len());
        for p in &state.previous_group_keys {
            let group = GroupPrivate::from_bytes(&p.group_private).map_err(Error::Crypto)?;
            previous.push(PreviousGroupKey { group, expired_at: p.expired_at });
        }
        let group = GroupAuthority { current, previous };

        {
            let mut locked = outbox.lock().await;
            for p in &state.outbox {
                locked.push(unpersist_outbox(p)?);
            }
        }

        let mut contacts = HashMap::with_capacity(state.contacts.len());
        let mut contacts_by_name = HashSet::with_capacity(state.contacts.len());
        let mut seen_digests = HashSet::new();
        for p in &state.contacts {
            let contact = unpersist_contact(p)?;
            contacts_by_name.insert(contact.name.clone());
            contacts.insert(contact.id, contact);
        }

        let mut inbox = Vec::with_capacity(state.inbox.len());
        for p in &state.inbox {
            let msg = unpersist_inbox(p)?;
            seen_digests.insert((msg.sender, msg.digest));
            inbox.push(msg);
        }

        let drafts = state.drafts.iter().map(unpersist_draft).collect();

        Ok(Self {
            identity,
            group,
            contacts,
            contacts_by_name,
            next_contact_id: state.next_contact_id,
            inbox,
            next_inbox_id: state.next_inbox_id,
            seen_digests,
            outbox,
            next_outbox_id: state.next_outbox_id,
            drafts,
            next_draft_id: state.next_draft_id,
            revocations,
            rng,
            dirty: false,
        })
    }
}

fn persist_contact(c: &Contact) -> PersistedContact {
    PersistedContact {
        id: c.id,
        name: c.name.clone(),
        their_identity_public: *c.their_identity_public.as_bytes(),
        their_server: c.their_server.to_string(),
        their_signing_public: c.their_signing_public.as_ref().to_vec(),
        my_group_member_key: c.my_group_member_key.to_bytes(),
        their_issued_member_key: c.their_issued_member_key.as_ref().map(|k| k.to_bytes()).unwrap_or_default(),
        their_group_public: c.their_group_public.to_bytes(),
        generation: c.generation,
        last_dh_private: c.last_dh_private.to_bytes(),
        current_dh_private: c.current_dh_private.to_bytes(),
        their_last_dh_public: *c.their_last_dh_public.as_bytes(),
        their_current_dh_public: *c.their_current_dh_public.as_bytes(),
        previous_tags: c.previous_tags.iter().map(|(t, at)| (t.0.to_vec(), *at)).collect(),
        supported_version: c.supported_version,
        is_pending: c.is_pending,
        revoked: c.revoked,
        revoked_us: c.revoked_us,
        kxs_bytes: c.kxs_bytes.clone().unwrap_or_default(),
    }
}

fn unpersist_contact(p: &PersistedContact) -> Result<Contact> {
    let mut previous_tags = Vec::with_capacity(p.previous_tags.len());
    for (bytes, at) in &p.previous_tags {
        let tag: [u8; 32] =
            bytes.as_slice().try_into().map_err(|_| Error::Malformed("bad persisted tag length"))?;
        previous_tags.push((Tag(tag), *at));
    }

    Ok(Contact {
        id: p.id,
        name: p.name.clone(),
        their_identity_public: boxes::PublicKey::from(p.their_identity_public),
        their_server: p.their_server.parse().map_err(|_| Error::Malformed("bad persisted contact url"))?,
        their_signing_public: sign::PublicKey::from_slice(&p.their_signing_public)
            .map_err(|_| Error::Malformed("bad persisted contact signing key"))?,
        my_group_member_key: group_sig::MemberKey::from_bytes(&p.my_group_member_key).map_err(Error::Crypto)?,
        their_issued_member_key: if p.their_issued_member_key.is_empty() {
            None
        } else {
            Some(group_sig::MemberKey::from_bytes(&p.their_issued_member_key).map_err(Error::Crypto)?)
        },
        their_group_public: GroupPublic::from_bytes(&p.their_group_public).map_err(Error::Crypto)?,
        generation: p.generation,
        last_dh_private: boxes::SecretKey::from(p.last_dh_private),
        current_dh_private: boxes::SecretKey::from(p.current_dh_private),
        their_last_dh_public: boxes::PublicKey::from(p.their_last_dh_public),
        their_current_dh_public: boxes::PublicKey::from(p.their_current_dh_public),
        previous_tags,
        supported_version: p.supported_version,
        is_pending: p.is_pending,
        revoked: p.revoked,
        revoked_us: p.revoked_us,
        kxs_bytes: if p.kxs_bytes.is_empty() { None } else { Some(p.kxs_bytes.clone()) },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smol::channel;
    use url::Url;

    use super::*;

    fn make_orchestrator(rng: &Csprng, server: &str) -> (Orchestrator, Arc<Mutex<Outbox>>, Receiver<RevocationUpdate>) {
        let identity = Identity::generate(rng, Url::parse(server).unwrap());
        let group = GroupAuthority::new(GroupPrivate::generate(rng));
        let (rev_tx, rev_rx) = channel::unbounded();
        let outbox = Arc::new(Mutex::new(Outbox::new()));
        let orchestrator = Orchestrator::new(identity, group, outbox.clone(), rev_tx, *rng);
        (orchestrator, outbox, rev_rx)
    }

    /// Registers each orchestrator as a completed contact of the other,
    /// performing by hand the out-of-band exchange (peer-issued member
    /// credential, DH and group public keys) a real key-exchange
    /// transport would carry. Returns each side's contact id for the
    /// other.
    fn connect(alice: &mut Orchestrator, bob: &mut Orchestrator) -> (u64, u64) {
        let alice_id = alice
            .add_pending_contact(
                "bob".into(),
                bob.identity.dh_public.clone(),
                bob.identity.server.clone(),
                bob.identity.signing.pk,
            )
            .unwrap();
        let bob_id = bob
            .add_pending_contact(
                "alice".into(),
                alice.identity.dh_public.clone(),
                alice.identity.server.clone(),
                alice.identity.signing.pk,
            )
            .unwrap();

        let issued_to_bob = alice.contact(alice_id).unwrap().my_group_member_key.clone();
        let issued_to_alice = bob.contact(bob_id).unwrap().my_group_member_key.clone();
        let alice_next_dh = alice.contact(alice_id).unwrap().my_next_dh_public();
        let bob_next_dh = bob.contact(bob_id).unwrap().my_next_dh_public();
        let alice_group_public = alice.group.public();
        let bob_group_public = bob.group.public();

        alice.complete_key_exchange(alice_id, bob_group_public, bob_next_dh, issued_to_alice, 1).unwrap();
        bob.complete_key_exchange(bob_id, alice_group_public, alice_next_dh, issued_to_bob, 1).unwrap();

        (alice_id, bob_id)
    }

    #[test]
    fn delivery_round_trips_and_deduplicates() {
        smol::block_on(async {
            let rng = Csprng::new();
            let (mut alice, alice_outbox, _arx) = make_orchestrator(&rng, "pondserver://aaa.onion:16333");
            let (mut bob, _bob_outbox, _brx) = make_orchestrator(&rng, "pondserver://bbb.onion:16333");
            let (alice_id, bob_id) = connect(&mut alice, &mut bob);

            alice.enqueue_delivery(alice_id, b"hello bob".to_vec(), None).await.unwrap();

            let (signature, sealed) = {
                let outbox = alice_outbox.lock().await;
                let msg = outbox.iter().next().unwrap();
                match &msg.kind {
                    OutboxKind::Delivery { sealed, signature, .. } => (signature.clone(), sealed.clone()),
                    OutboxKind::Revocation { .. } => panic!("expected a delivery"),
                }
            };

            match bob.process_fetched(signature.clone(), sealed.clone()).await {
                Delivered::Message { sender, plaintext, .. } => {
                    assert_eq!(sender, bob_id);
                    assert_eq!(plaintext, b"hello bob");
                }
                _ => panic!("expected a decoded message"),
            }
            assert_eq!(bob.inbox().len(), 1);

            // Redelivering the same fetched bytes (the pondserver doesn't
            // guarantee exactly-once fetch) must not double up the inbox.
            let dup = bob.process_fetched(signature, sealed).await;
            assert!(matches!(dup, Delivered::Duplicate));
            assert_eq!(bob.inbox().len(), 1);
        });
    }

    #[test]
    fn draft_lifecycle_enqueues_on_send() {
        smol::block_on(async {
            let rng = Csprng::new();
            let (mut alice, alice_outbox, _arx) = make_orchestrator(&rng, "pondserver://aaa.onion:16333");
            let (mut bob, _bob_outbox, _brx) = make_orchestrator(&rng, "pondserver://bbb.onion:16333");
            let (alice_id, _bob_id) = connect(&mut alice, &mut bob);

            let draft_id = alice.save_draft(None, alice_id, "scratch".into());
            assert_eq!(alice.drafts().len(), 1);
            alice.discard_draft(draft_id).unwrap();
            assert!(alice.drafts().is_empty());

            let draft_id = alice.save_draft(None, alice_id, "final body".into());
            alice.send_draft(draft_id).await.unwrap();
            assert!(alice.drafts().is_empty());
            assert_eq!(alice_outbox.lock().await.iter().count(), 1);
        });
    }

    #[test]
    fn revoke_contact_blocks_further_sends_and_informs_peer() {
        smol::block_on(async {
            let rng = Csprng::new();
            let (mut alice, alice_outbox, _arx) = make_orchestrator(&rng, "pondserver://aaa.onion:16333");
            let (mut bob, _bob_outbox, _brx) = make_orchestrator(&rng, "pondserver://bbb.onion:16333");
            let (alice_id, bob_id) = connect(&mut alice, &mut bob);

            alice.revoke_contact(alice_id).await.unwrap();
            assert!(alice.enqueue_delivery(alice_id, b"too late".to_vec(), None).await.is_err());

            let signed_revocation = {
                let outbox = alice_outbox.lock().await;
                let msg = outbox.iter().find(|m| matches!(m.kind, OutboxKind::Revocation { .. })).unwrap();
                match &msg.kind {
                    OutboxKind::Revocation { signed_revocation } => signed_revocation.clone(),
                    OutboxKind::Delivery { .. } => unreachable!(),
                }
            };

            bob.handle_network_event(NetworkEvent::MessageRevoked {
                id: 1,
                to: bob_id,
                revocation: crate::net::wire::Revocation { signed_revocation },
            })
            .await;

            assert!(bob.contact(bob_id).unwrap().revoked_us);
            assert!(bob.contact(bob_id).unwrap().their_issued_member_key.is_none());
        });
    }
}

fn persist_inbox(m: &InboxMessage) -> PersistedInbox {
    let (decoded, body) = match &m.body {
        Body::Decoded(b) => (true, b.clone()),
        Body::Sealed(b) => (false, b.clone()),
    };
    PersistedInbox {
        id: m.id,
        sender: m.sender,
        received_at: m.received_at,
        read: m.read,
        acked: m.acked,
        decoded,
        body,
        digest: m.digest,
        in_reply_to: m.in_reply_to,
    }
}

fn unpersist_inbox(p: &PersistedInbox) -> Result<InboxMessage> {
    let body = if p.decoded { Body::Decoded(p.body.clone()) } else { Body::Sealed(p.body.clone()) };
    Ok(InboxMessage {
        id: p.id,
        sender: p.sender,
        received_at: p.received_at,
        read: p.read,
        acked: p.acked,
        body,
        digest: p.digest,
        in_reply_to: p.in_reply_to,
    })
}

fn persist_draft(d: &Draft) -> PersistedDraft {
    PersistedDraft { id: d.id, to: d.to, body: d.body.clone(), last_edited_at: d.last_edited_at }
}

fn unpersist_draft(p: &PersistedDraft) -> Draft {
    Draft { id: p.id, to: p.to, body: p.body.clone(), last_edited_at: p.last_edited_at }
}

fn persist_outbox(m: &OutboxMessage) -> PersistedOutbox {
    let (is_revocation, sealed_or_signed_revocation, signature, plaintext) = match &m.kind {
        OutboxKind::Delivery { sealed, signature, plaintext } => {
            (false, sealed.clone(), signature.clone(), plaintext.clone())
        }
        OutboxKind::Revocation { signed_revocation } => {
            (true, signed_revocation.clone(), Vec::new(), Vec::new())
        }
    };
    PersistedOutbox {
        id: m.id,
        to: m.to,
        recipient_identity: m.recipient_identity,
        server: m.server.to_string(),
        created_at: m.created_at,
        sent_at: m.sent_at,
        acked_at: m.acked_at,
        is_revocation,
        sealed_or_signed_revocation,
        signature,
        plaintext,
        generation_hint: m.generation_hint,
    }
}

fn unpersist_outbox(p: &PersistedOutbox) -> Result<OutboxMessage> {
    let kind = if p.is_revocation {
        OutboxKind::Revocation { signed_revocation: p.sealed_or_signed_revocation.clone() }
    } else {
        OutboxKind::Delivery {
            sealed: p.sealed_or_signed_revocation.clone(),
            signature: p.signature.clone(),
            plaintext: p.plaintext.clone(),
        }
    };
    Ok(OutboxMessage {
        id: p.id,
        to: p.to,
        recipient_identity: p.recipient_identity,
        server: p.server.parse().map_err(|_| Error::Malformed("bad persisted outbox url"))?,
        created_at: p.created_at,
        sent_at: p.sent_at,
        acked_at: p.acked_at,
        kind,
        generation_hint: p.generation_hint,
    })
}
