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

//! Crate-wide error types. Each subsystem gets its own variant family;
//! network/IO failures are always distinguished from cryptographic and
//! protocol failures so callers never retry the latter.

use crate::net::wire::Status;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed wire data: {0}")]
    Malformed(&'static str),

    #[error("task was cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("authenticated decryption failed")]
    OpenFailed,
    #[error("signature verification failed")]
    BadSignature,
    #[error("signature has wrong length")]
    BadSignatureLength,
    #[error("group signature verification failed")]
    BadGroupSignature,
    #[error("tag could not be recovered from group signature")]
    TagRecoveryFailed,
    #[error("member key rejected a revocation")]
    MemberRevoked,
    #[error("message exceeds maximum serialized size")]
    MessageTooLarge,
    #[error("plaintext framing is malformed")]
    BadFraming,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("unseal attempted against a pending contact")]
    ContactPending,
    #[error("no contact with id {0}")]
    UnknownContact(u64),
    #[error("contact name {0:?} is already in use")]
    DuplicateName(String),
    #[error("contact {0} has revoked us")]
    RevokedByContact(u64),
    #[error("we have revoked contact {0}")]
    ContactRevoked(u64),
    #[error("duplicate outbox id {0}")]
    DuplicateOutboxId(u64),
    #[error("revocation generation mismatch: expected {expected}, got {got}")]
    GenerationMismatch { expected: u64, got: u64 },
    #[error("no draft with id {0}")]
    UnknownDraft(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("server returned status {0:?}")]
    ServerStatus(Status),
    #[error("socks5 proxy rejected the connection: {0}")]
    SocksRejected(String),
    #[error("socks5 proxy returned a malformed reply")]
    SocksProtocol,
    #[error("read timed out")]
    Timeout,
    #[error("invalid pondserver url: {0}")]
    BadUrl(String),
    #[error("handshake failed: {0}")]
    HandshakeFailed(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer was cancelled")]
    Cancelled,
    #[error("more bytes were received than advertised")]
    Overrun,
    #[error("server rejected resume offset")]
    BadResume,
}
