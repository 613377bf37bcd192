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

//! `murmurd`: runs the network worker and the orchestrator's event loop
//! side by side, persisting state whenever the orchestrator goes dirty,
//! until SIGINT/SIGTERM arrives.

use std::sync::{Arc, Mutex as StdMutex};

use easy_parallel::Parallel;
use futures::FutureExt;
use smol::{channel, lock::Mutex, Executor};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use murmur::{
    config::Args,
    crypto::group_sig::GroupPrivate,
    error::{Error, Result},
    net::engine::{EngineConfig, NetworkEngine},
    rng::Csprng,
    state::{
        group::GroupAuthority,
        identity::Identity,
        outbox::Outbox,
        persist::PersistedState,
        Orchestrator,
    },
    system::{signals, StoppableTask},
};

/// Name of the state file inside `data_dir`. The plaintext shape is
/// `PersistedState`; encrypting it at rest is left to whatever wraps
/// this daemon, per its own stated boundaries.
const STATE_FILE: &str = "murmur.dat";

fn init_logger(args: &Args) -> Result<()> {
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match &args.log {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| Error::Config(format!("failed to create log file {path}: {e}")))?;
            subscriber.with_writer(StdMutex::new(file)).init();
        }
        None => subscriber.init(),
    }

    Ok(())
}

fn state_path(args: &Args) -> Result<std::path::PathBuf> {
    Ok(args.data_dir()?.join(STATE_FILE))
}

async fn load_or_init_orchestrator(
    args: &Args,
    outbox: Arc<Mutex<Outbox>>,
    revocations: channel::Sender<murmur::net::RevocationUpdate>,
    rng: Csprng,
) -> Result<Orchestrator> {
    let path = state_path(args)?;

    if let Ok(bytes) = std::fs::read(&path) {
        info!("loading existing state from {}", path.display());
        let state: PersistedState = darkfi_serial::deserialize(&bytes)
            .map_err(|_| Error::Config("state file is corrupt".into()))?;
        return Orchestrator::from_persisted(state, outbox, revocations, rng).await
    }

    info!("no existing state found at {}, provisioning a fresh identity", path.display());
    std::fs::create_dir_all(args.data_dir()?)?;

    let server = args.home_server()?;
    let identity = Identity::generate(&rng, server);
    let group = GroupAuthority::new(GroupPrivate::generate(&rng));
    Ok(Orchestrator::new(identity, group, outbox, revocations, rng))
}

async fn persist(args: &Args, orchestrator: &Orchestrator) -> Result<()> {
    let path = state_path(args)?;
    let state = orchestrator.to_persisted().await;
    let bytes = darkfi_serial::serialize(&state);
    std::fs::write(&path, bytes)?;
    Ok(())
}

async fn realmain(args: Args, ex: Arc<Executor<'static>>) -> Result<()> {
    let rng = Csprng::new();
    let outbox = Arc::new(Mutex::new(Outbox::new()));
    let (event_tx, event_rx) = channel::unbounded();
    let (fetch_now_tx, fetch_now_rx) = channel::unbounded();
    let (revocation_tx, revocation_rx) = channel::unbounded();

    let mut orchestrator =
        load_or_init_orchestrator(&args, outbox.clone(), revocation_tx, rng).await?;

    let engine_config = EngineConfig {
        socks_addr: args.socks_addr.clone(),
        home_server: args.home_server()?,
        home_identity_public: orchestrator.identity.public_bytes(),
        poll_mean: args.poll_mean(),
        auto_fetch: true,
        production: !args.testing,
    };
    let engine = Arc::new(NetworkEngine::new(
        outbox.clone(),
        event_tx,
        fetch_now_rx,
        revocation_rx,
        engine_config,
        rng,
    ));

    let network_task = StoppableTask::new();
    network_task
        .clone()
        .start(
            {
                let engine = engine.clone();
                move |stop| async move { engine.run(stop).await }
            },
            ex.clone(),
        )
        .await;

    let (term_tx, term_rx) = channel::bounded::<()>(1);
    ex.spawn(async move {
        let _ = signals::wait_for_termination().await;
        let _ = term_tx.send(()).await;
    })
    .detach();

    // Kick off an immediate fetch so a freshly started daemon doesn't
    // wait out a full poll interval before seeing mail.
    let _ = fetch_now_tx.send(()).await;

    let mut last_save = false;
    loop {
        futures::select_biased! {
            _ = term_rx.recv().fuse() => {
                info!("received shutdown signal");
                break
            }
            event = event_rx.recv().fuse() => {
                match event {
                    Ok(event) => orchestrator.handle_network_event(event).await,
                    Err(_) => break,
                }
            }
        }

        if orchestrator.is_dirty() {
            if let Err(e) = persist(&args, &orchestrator).await {
                error!("failed to persist state: {e}");
            } else {
                orchestrator.clear_dirty();
            }
            last_save = true;
        } else {
            last_save = false;
        }
    }

    if !last_save {
        if let Err(e) = persist(&args, &orchestrator).await {
            error!("failed to persist state on shutdown: {e}");
        }
    }

    debug!("stopping network worker");
    network_task.stop().await;

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::load()?;
    init_logger(&args)?;

    let ex = Arc::new(Executor::new());
    let ex2 = ex.clone();
    let (signal, shutdown) = channel::unbounded::<()>();

    let nthreads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    let (_, result) = Parallel::new()
        .each(0..nthreads, |_| smol::future::block_on(ex2.run(shutdown.recv())))
        .finish(|| {
            smol::future::block_on(async move {
                let result = realmain(args, ex).await;
                drop(signal);
                result
            })
        });

    result
}
