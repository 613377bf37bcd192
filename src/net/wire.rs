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

//! The server wire protocol: closed tagged-union `Request`/`Reply` types,
//! carried length-prefixed over a transport session's framed read/write.
//! Never modeled as an open bag of optionals beyond this parsing boundary.

use darkfi_serial::{SerialDecodable, SerialEncodable};

#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct Revocation {
    pub signed_revocation: Vec<u8>,
}

#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub enum Request {
    NewAccount { generation: u64, group_pub: Vec<u8> },
    Deliver { to: [u8; 32], signature: Vec<u8>, generation: u64, message: Vec<u8> },
    Fetch,
    Revocation { signed_revocation: Vec<u8> },
    Upload { id: u64, size: u64 },
    Download { from: [u8; 32], id: u64, resume: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, SerialEncodable, SerialDecodable)]
pub enum Status {
    Ok,
    GenerationRevoked,
    ResumePastEndOfFile,
    NotFound,
    BadRequest,
    Other(u8),
}

#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct Fetched {
    pub signature: Vec<u8>,
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct Announce {
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct UploadReply {
    pub resume: Option<u64>,
}

#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct DownloadReply {
    pub size: u64,
}

/// A single wire reply. At most one of the optional payloads is set,
/// and only in combination with the `status` the server attached it to
/// (e.g. `fetched` only ever accompanies `Ok`, `revocation` only ever
/// accompanies `GenerationRevoked`).
#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct Reply {
    pub status: Status,
    pub fetched: Option<Fetched>,
    pub announce: Option<Announce>,
    pub upload: Option<UploadReply>,
    pub download: Option<DownloadReply>,
    pub revocation: Option<Revocation>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            fetched: None,
            announce: None,
            upload: None,
            download: None,
            revocation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_request_round_trips() {
        let req = Request::Deliver {
            to: [9u8; 32],
            signature: vec![1, 2, 3],
            generation: 7,
            message: b"sealed payload".to_vec(),
        };
        let bytes = darkfi_serial::serialize(&req);
        let decoded: Request = darkfi_serial::deserialize(&bytes).unwrap();
        match decoded {
            Request::Deliver { to, signature, generation, message } => {
                assert_eq!(to, [9u8; 32]);
                assert_eq!(signature, vec![1, 2, 3]);
                assert_eq!(generation, 7);
                assert_eq!(message, b"sealed payload");
            }
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }

    #[test]
    fn fetched_reply_round_trips() {
        let reply = Reply {
            status: Status::Ok,
            fetched: Some(Fetched { signature: vec![4, 5], message: b"hi".to_vec() }),
            ..Reply::ok()
        };
        let bytes = darkfi_serial::serialize(&reply);
        let decoded: Reply = darkfi_serial::deserialize(&bytes).unwrap();
        assert_eq!(decoded.status, Status::Ok);
        let fetched = decoded.fetched.unwrap();
        assert_eq!(fetched.signature, vec![4, 5]);
        assert_eq!(fetched.message, b"hi");
        assert!(decoded.announce.is_none());
    }

    #[test]
    fn status_other_carries_its_byte() {
        let bytes = darkfi_serial::serialize(&Status::Other(42));
        let decoded: Status = darkfi_serial::deserialize(&bytes).unwrap();
        assert_eq!(decoded, Status::Other(42));
    }

    #[test]
    fn revocation_reply_round_trips() {
        let reply = Reply {
            status: Status::GenerationRevoked,
            revocation: Some(Revocation { signed_revocation: vec![1; 12] }),
            ..Reply::ok()
        };
        let bytes = darkfi_serial::serialize(&reply);
        let decoded: Reply = darkfi_serial::deserialize(&bytes).unwrap();
        assert_eq!(decoded.status, Status::GenerationRevoked);
        assert_eq!(decoded.revocation.unwrap().signed_revocation, vec![1; 12]);
    }
}
