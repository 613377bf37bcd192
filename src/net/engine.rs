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

//! The single long-running network worker: randomized scheduling
//! between fetches and sends, revocation-driven re-signing, and
//! dispatch of server replies back to the orchestrator. Everything
//! here runs on one task; the outbound queue mutex is the only lock it
//! shares with the orchestrator.

use std::{sync::Arc, time::Duration};

use futures::FutureExt;
use smol::{channel::Receiver, lock::Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::{
    crypto::{group_sig, sign},
    net::{session::TransportSession, socks, url as pond_url, wire},
    rng::Csprng,
    state::{Outbox, OutboxKind},
};

/// Default Poisson mean between polling transactions. Shrunk to 5s in
/// a testing profile.
pub const DEFAULT_POLL_MEAN: Duration = Duration::from_secs(300);
pub const TESTING_POLL_MEAN: Duration = Duration::from_secs(5);

/// Events the worker hands back to the orchestrator. Delivered strictly
/// in wire order; the orchestrator blocks on `Fetched`/`Announce` so it
/// can act before the worker starts its next transaction.
pub enum NetworkEvent {
    Fetched { signature: Vec<u8>, message: Vec<u8> },
    Announce { message: Vec<u8> },
    MessageSent { id: u64 },
    MessageRevoked { id: u64, to: u64, revocation: wire::Revocation },
}

/// Tells the worker to re-sign every queued delivery to `contact` using
/// a freshly updated member key, after a revocation changed our group.
pub struct RevocationUpdate {
    pub contact: u64,
    pub member_key: group_sig::MemberKey,
    pub group_public: group_sig::GroupPublic,
    pub generation: u64,
}

pub struct EngineConfig {
    pub socks_addr: String,
    pub home_server: Url,
    pub home_identity_public: [u8; 32],
    pub poll_mean: Duration,
    pub auto_fetch: bool,
    pub production: bool,
}

pub struct NetworkEngine {
    outbox: Arc<Mutex<Outbox>>,
    events: smol::channel::Sender<NetworkEvent>,
    fetch_now: Receiver<()>,
    revocations: Receiver<RevocationUpdate>,
    config: EngineConfig,
    rng: Csprng,
}

impl NetworkEngine {
    pub fn new(
        outbox: Arc<Mutex<Outbox>>,
        events: smol::channel::Sender<NetworkEvent>,
        fetch_now: Receiver<()>,
        revocations: Receiver<RevocationUpdate>,
        config: EngineConfig,
        rng: Csprng,
    ) -> Self {
        Self { outbox, events, fetch_now, revocations, config, rng }
    }

    /// The worker's main loop. Runs until `stop` resolves (wired up to
    /// the signal-handling shutdown sequence in `system::task`).
    pub async fn run(&self, stop: smol::channel::Receiver<()>) {
        if self.config.auto_fetch {
            self.run_one_transaction().await;
        }

        loop {
            self.drain_revocations().await;

            let fetch_now = self.fetch_now.recv();
            let timer = smol::Timer::after(self.rng.poisson_delay(self.config.poll_mean));
            let stopped = stop.recv();

            futures::select_biased! {
                _ = stopped.fuse() => {
                    debug!("network engine stopping");
                    return
                }
                _ = fetch_now.fuse() => {}
                _ = timer.fuse() => {}
            }

            self.drain_revocations().await;
            self.run_one_transaction().await;
        }
    }

    async fn drain_revocations(&self) {
        while let Ok(update) = self.revocations.try_recv() {
            let mut outbox = self.outbox.lock().await;
            for msg in outbox.iter_mut_to(update.contact) {
                if let OutboxKind::Delivery { sealed, signature, .. } = &mut msg.kind {
                    let digest = crate::crypto::sha256(sealed);
                    match group_sig::group_sign(&update.member_key, &update.group_public, &digest) {
                        Ok(sig) => {
                            *signature = sig.to_bytes();
                            msg.generation_hint = update.generation;
                        }
                        Err(e) => warn!("re-sign after revocation update failed: {e}"),
                    }
                }
            }
        }
    }

    async fn run_one_transaction(&self) {
        let (server, request, is_send, outbox_id, to_contact) = {
            let mut outbox = self.outbox.lock().await;
            match outbox.rotate_head() {
                None => (self.config.home_server.clone(), wire::Request::Fetch, false, None, None),
                Some(msg) => (msg.server.clone(), msg.to_request(), true, Some(msg.id), Some(msg.to)),
            }
        };

        let use_random_identity = is_send && !matches!(request, wire::Request::Revocation { .. });
        let (my_identity_public, _my_identity_secret) = if use_random_identity {
            let (secret, public) = crate::crypto::boxes::generate_dh_keypair(&self.rng);
            (*public.as_bytes(), Some(secret))
        } else {
            (self.config.home_identity_public, None)
        };

        match self.execute(&server, &request, my_identity_public).await {
            Ok(reply) => self.dispatch(reply, outbox_id, to_contact).await,
            Err(e) => warn!("network transaction failed, will retry: {e}"),
        }
    }

    async fn execute(
        &self,
        server: &Url,
        request: &wire::Request,
        my_identity_public: [u8; 32],
    ) -> crate::error::Result<wire::Reply> {
        let (identity_bytes, host) = pond_url::parse_server_url(server, self.config.production)?;
        let server_signing_pub = sign::PublicKey::from_slice(&identity_bytes)
            .map_err(|_| crate::error::NetError::HandshakeFailed("bad server signing key"))?;

        let username = self.rng.socks_username();
        let stream =
            socks::connect_via_socks5(&self.config.socks_addr, &host, pond_url::SERVER_PORT, &username)
                .await?;

        let mut session =
            TransportSession::handshake_dial(stream, &self.rng, &my_identity_public, &server_signing_pub)
                .await?;

        let encoded = darkfi_serial::serialize(request);
        session.write_framed(&encoded).await?;
        let reply_bytes = session.read_framed().await?;
        darkfi_serial::deserialize(&reply_bytes)
            .map_err(|_| crate::error::Error::Malformed("reply did not parse"))
    }

    async fn dispatch(&self, reply: wire::Reply, outbox_id: Option<u64>, to_contact: Option<u64>) {
        match (reply.status, outbox_id) {
            (wire::Status::Ok, None) => {
                if let Some(fetched) = reply.fetched {
                    let _ = self
                        .events
                        .send(NetworkEvent::Fetched { signature: fetched.signature, message: fetched.message })
                        .await;
                } else if let Some(announce) = reply.announce {
                    let _ = self.events.send(NetworkEvent::Announce { message: announce.message }).await;
                }
            }
            (wire::Status::Ok, Some(id)) => {
                let mut outbox = self.outbox.lock().await;
                outbox.remove_sent(id);
                drop(outbox);
                let _ = self.events.send(NetworkEvent::MessageSent { id }).await;
            }
            (wire::Status::GenerationRevoked, Some(id)) => {
                if let (Some(rev), Some(to)) = (reply.revocation, to_contact) {
                    let _ = self.events.send(NetworkEvent::MessageRevoked { id, to, revocation: rev }).await;
                }
            }
            (status, _) => {
                debug!("server returned non-ok status {status:?}, leaving item queued for retry");
            }
        }
    }
}
