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

//! An authenticated, framed, anonymous transport session. The
//! handshake proves possession of the server's identity (its signing
//! key, bound to the identity key advertised out of band); the
//! resulting per-connection transport key frames every subsequent
//! message with a replay-protected nonce.

use std::time::Duration;

use futures::FutureExt;
use smol::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    crypto::{boxes, sign},
    error::{Error, NetError, Result},
    rng::Csprng,
};

/// Read deadline right after dial: anonymizing transports can stall
/// silently, so a generous but bounded wait is required.
pub const INITIAL_READ_DEADLINE: Duration = Duration::from_secs(60);
/// Deadline bumped to this on every read/write during a bulk transfer.
pub const TRANSFER_READ_DEADLINE: Duration = Duration::from_secs(30);

const DIR_DIALER_TO_ACCEPTOR: u8 = 0;
const DIR_ACCEPTOR_TO_DIALER: u8 = 1;

fn frame_nonce(direction: u8, counter: u64) -> [u8; boxes::NONCE_LEN] {
    let mut nonce = [0u8; boxes::NONCE_LEN];
    nonce[0] = direction;
    nonce[1..9].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// A handshaken, framed connection. `write_framed`/`read_framed` each
/// maintain their own monotonic counter, folded into the nonce together
/// with a fixed per-direction byte so the two directions never collide
/// even though the underlying DH shared secret is symmetric.
pub struct TransportSession<S> {
    stream: S,
    transport_box: BoxByKey,
    send_direction: u8,
    recv_direction: u8,
    send_counter: u64,
    recv_counter: u64,
    /// Applied to every `read_framed`/`write_framed` call; starts at the
    /// 60s post-dial deadline and is bumped to 30s by `set_deadline`
    /// once a bulk transfer takes over the session.
    deadline: Duration,
}

/// Races `fut` against a timer, turning an expiry into `NetError::Timeout`.
async fn with_deadline<T>(
    fut: impl std::future::Future<Output = std::io::Result<T>>,
    dur: Duration,
) -> Result<T> {
    futures::select_biased! {
        res = fut.fuse() => res.map_err(Error::from),
        _ = smol::Timer::after(dur).fuse() => Err(Error::Net(NetError::Timeout)),
    }
}

/// `crypto_box::ChaChaBox` keyed by a raw shared secret rather than a
/// long-term identity key pair: handshake ephemerals are consumed once
/// and never reused as an X25519 key pair beyond deriving this box.
struct BoxByKey {
    my_ephemeral_secret: boxes::SecretKey,
    peer_ephemeral_public: boxes::PublicKey,
}

impl<S: AsyncReadExt + AsyncWriteExt + Unpin> TransportSession<S> {
    /// Dials `stream` as the initiator: sends our identity and a fresh
    /// ephemeral, and verifies the acceptor's proof of possession of
    /// `their_identity`'s signing key.
    pub async fn handshake_dial(
        mut stream: S,
        rng: &Csprng,
        my_identity_public: &[u8; 32],
        their_signing_public: &sign::PublicKey,
    ) -> Result<Self> {
        let (my_eph_secret, my_eph_public) = boxes::generate_dh_keypair(rng);

        stream.write_all(my_identity_public).await?;
        stream.write_all(my_eph_public.as_bytes()).await?;

        let mut their_eph_bytes = [0u8; 32];
        with_deadline(stream.read_exact(&mut their_eph_bytes), INITIAL_READ_DEADLINE).await?;
        let their_eph_public = boxes::PublicKey::from(their_eph_bytes);

        let mut sig_bytes = [0u8; 64];
        with_deadline(stream.read_exact(&mut sig_bytes), INITIAL_READ_DEADLINE).await?;
        let sig = sign::signature_from_bytes(&sig_bytes)
            .map_err(|_| Error::Net(NetError::HandshakeFailed("malformed acceptor signature")))?;

        let mut transcript = Vec::with_capacity(sign::HANDSHAKE_DOMAIN.len() + 32 + 32 + 32);
        transcript.extend_from_slice(sign::HANDSHAKE_DOMAIN);
        transcript.extend_from_slice(my_identity_public);
        transcript.extend_from_slice(my_eph_public.as_bytes());
        transcript.extend_from_slice(&their_eph_bytes);
        sign::verify(their_signing_public, &transcript, &sig)
            .map_err(|_| Error::Net(NetError::HandshakeFailed("acceptor proof failed")))?;

        Ok(Self {
            stream,
            transport_box: BoxByKey {
                my_ephemeral_secret: my_eph_secret,
                peer_ephemeral_public: their_eph_public,
            },
            send_direction: DIR_DIALER_TO_ACCEPTOR,
            recv_direction: DIR_ACCEPTOR_TO_DIALER,
            send_counter: 0,
            recv_counter: 0,
            deadline: INITIAL_READ_DEADLINE,
        })
    }

    /// Accepts `stream` as the responder: reads the dialer's identity and
    /// ephemeral, replies with our own ephemeral and a signature proving
    /// possession of `my_signing_secret`.
    pub async fn handshake_accept(
        mut stream: S,
        rng: &Csprng,
        my_signing_secret: &sign::SecretKey,
    ) -> Result<(Self, [u8; 32])> {
        let mut dialer_identity = [0u8; 32];
        with_deadline(stream.read_exact(&mut dialer_identity), INITIAL_READ_DEADLINE).await?;
        let mut dialer_eph_bytes = [0u8; 32];
        with_deadline(stream.read_exact(&mut dialer_eph_bytes), INITIAL_READ_DEADLINE).await?;

        let (my_eph_secret, my_eph_public) = boxes::generate_dh_keypair(rng);
        stream.write_all(my_eph_public.as_bytes()).await?;

        let mut transcript = Vec::with_capacity(sign::HANDSHAKE_DOMAIN.len() + 32 + 32 + 32);
        transcript.extend_from_slice(sign::HANDSHAKE_DOMAIN);
        transcript.extend_from_slice(&dialer_identity);
        transcript.extend_from_slice(&dialer_eph_bytes);
        transcript.extend_from_slice(my_eph_public.as_bytes());
        let sig = sign::sign(my_signing_secret, &transcript);
        stream.write_all(&sig).await?;

        let session = Self {
            stream,
            transport_box: BoxByKey {
                my_ephemeral_secret: my_eph_secret,
                peer_ephemeral_public: boxes::PublicKey::from(dialer_eph_bytes),
            },
            send_direction: DIR_ACCEPTOR_TO_DIALER,
            recv_direction: DIR_DIALER_TO_ACCEPTOR,
            send_counter: 0,
            recv_counter: 0,
            deadline: INITIAL_READ_DEADLINE,
        };
        Ok((session, dialer_identity))
    }

    /// Bumps the per-call read/write deadline, e.g. to
    /// `TRANSFER_READ_DEADLINE` once a detachment transfer takes over a
    /// session that already completed its handshake.
    pub fn set_deadline(&mut self, deadline: Duration) {
        self.deadline = deadline;
    }

    pub async fn write_framed(&mut self, payload: &[u8]) -> Result<()> {
        let nonce = frame_nonce(self.send_direction, self.send_counter);
        self.send_counter += 1;
        let sealed = boxes::box_seal(
            payload,
            &nonce,
            &self.transport_box.peer_ephemeral_public,
            &self.transport_box.my_ephemeral_secret,
        );
        let len = sealed.len() as u32;
        let deadline = self.deadline;
        with_deadline(self.stream.write_all(&len.to_be_bytes()), deadline).await?;
        with_deadline(self.stream.write_all(&sealed), deadline).await?;
        Ok(())
    }

    pub async fn read_framed(&mut self) -> Result<Vec<u8>> {
        let deadline = self.deadline;
        let mut len_bytes = [0u8; 4];
        with_deadline(self.stream.read_exact(&mut len_bytes), deadline).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut sealed = vec![0u8; len];
        with_deadline(self.stream.read_exact(&mut sealed), deadline).await?;

        let nonce = frame_nonce(self.recv_direction, self.recv_counter);
        self.recv_counter += 1;
        boxes::box_open(
            &sealed,
            &nonce,
            &self.transport_box.peer_ephemeral_public,
            &self.transport_box.my_ephemeral_secret,
        )
        .map_err(Error::Crypto)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use smol::Async;

    use super::*;
    use crate::crypto::sign::generate_signing_keypair;

    #[test]
    fn handshake_then_framed_round_trip() {
        smol::block_on(async {
            let rng = Csprng::new();
            let server_keys = generate_signing_keypair(&rng);
            let dialer_identity = rng.bytes32();

            let (dialer_sock, acceptor_sock) = UnixStream::pair().unwrap();
            let dialer_stream = Async::new(dialer_sock).unwrap();
            let acceptor_stream = Async::new(acceptor_sock).unwrap();

            let dial = TransportSession::handshake_dial(
                dialer_stream,
                &rng,
                &dialer_identity,
                &server_keys.pk,
            );
            let accept = TransportSession::handshake_accept(acceptor_stream, &rng, &server_keys.sk);

            let (dial_result, accept_result) = futures::join!(dial, accept);
            let mut dialer_session = dial_result.unwrap();
            let (mut acceptor_session, seen_identity) = accept_result.unwrap();
            assert_eq!(seen_identity, dialer_identity);

            let send = dialer_session.write_framed(b"hello pondserver");
            let recv = acceptor_session.read_framed();
            let (send_result, recv_result) = futures::join!(send, recv);
            send_result.unwrap();
            assert_eq!(recv_result.unwrap(), b"hello pondserver");

            // The reply direction uses a distinct nonce prefix from the
            // request direction, so this must round-trip too.
            let send = acceptor_session.write_framed(b"ok");
            let recv = dialer_session.read_framed();
            let (send_result, recv_result) = futures::join!(send, recv);
            send_result.unwrap();
            assert_eq!(recv_result.unwrap(), b"ok");
        });
    }
}
