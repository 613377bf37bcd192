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

//! A cancellable background task, the same shape daemons in the wider
//! corpus get for free from `darkfi::system::StoppableTask`. The task
//! body is handed a `stop` receiver and is expected to race it against
//! its own work; `stop()` closes that channel and waits for the task to
//! actually finish before returning.

use std::sync::Arc;

use smol::{
    channel::{self, Receiver, Sender},
    lock::Mutex,
};

pub struct StoppableTask {
    stop_tx: Sender<()>,
    stop_rx: Mutex<Option<Receiver<()>>>,
    handle: Mutex<Option<smol::Task<()>>>,
}

impl StoppableTask {
    pub fn new() -> Arc<Self> {
        let (stop_tx, stop_rx) = channel::bounded(1);
        Arc::new(Self { stop_tx, stop_rx: Mutex::new(Some(stop_rx)), handle: Mutex::new(None) })
    }

    /// Spawns `body(stop)` on `ex`, passing it the receiver half of this
    /// task's stop channel so it can race its own suspension points
    /// against cancellation. Panics if called twice on the same task.
    pub async fn start<F, Fut>(self: Arc<Self>, body: F, ex: Arc<smol::Executor<'static>>)
    where
        F: FnOnce(Receiver<()>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let stop_rx = self.stop_rx.lock().await.take().expect("StoppableTask::start called twice");
        let task = ex.spawn(body(stop_rx));
        *self.handle.lock().await = Some(task);
    }

    /// Signals cancellation and awaits the task's completion.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
        if let Some(task) = self.handle.lock().await.take() {
            task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn stop_cancels_and_awaits_body() {
        let ex = Arc::new(smol::Executor::new());
        let ex2 = ex.clone();
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        smol::block_on(ex.run(async {
            let task = StoppableTask::new();
            let started2 = started.clone();
            let finished2 = finished.clone();
            task.clone()
                .start(
                    move |stop| async move {
                        started2.store(true, Ordering::SeqCst);
                        let _ = stop.recv().await;
                        finished2.store(true, Ordering::SeqCst);
                    },
                    ex2,
                )
                .await;

            // Let the spawned task run up to its await point before
            // signaling cancellation.
            smol::Timer::after(Duration::from_millis(20)).await;
            assert!(started.load(Ordering::SeqCst));
            assert!(!finished.load(Ordering::SeqCst));

            task.stop().await;
            assert!(finished.load(Ordering::SeqCst));
        }));
    }

    #[test]
    #[should_panic(expected = "StoppableTask::start called twice")]
    fn start_twice_panics() {
        let ex = Arc::new(smol::Executor::new());
        let ex2 = ex.clone();
        smol::block_on(ex.run(async {
            let task = StoppableTask::new();
            task.clone().start(|_stop| async move {}, ex2.clone()).await;
            task.start(|_stop| async move {}, ex2).await;
        }));
    }
}
