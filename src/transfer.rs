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

//! Resumable bulk file transfer ("detachment"). One background task per
//! active transfer, each with its own exponential backoff and cancel
//! signal; the orchestrator never touches transfer state directly.

use std::time::{Duration, Instant};

use futures::FutureExt;
use smol::channel::Receiver;
use tracing::{debug, warn};

use crate::error::{Error, Result, TransferError};

const INITIAL_BACKOFF: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
const CHUNK_SIZE: usize = 16 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const YIELD_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy)]
pub enum Direction {
    Upload,
    Download,
}

pub struct TransferRequest {
    pub id: u64,
    pub direction: Direction,
    pub size_hint: Option<u64>,
    pub resume_from: u64,
}

pub struct TransferProgress {
    pub id: u64,
    pub transferred: u64,
    pub total: u64,
}

/// What the server told us once the request/reply handshake for this
/// attempt completed.
pub struct ReplyOutcome {
    pub total_bytes: u64,
    pub is_complete: bool,
}

/// The capabilities a detachment transfer needs from its transport and
/// local storage, factored out so the state machine below is testable
/// without a real socket or filesystem.
#[async_trait::async_trait]
pub trait TransferIo: Send {
    async fn dial(&mut self) -> Result<()>;
    async fn send_request(&mut self, req: &TransferRequest) -> Result<()>;
    async fn read_reply(&mut self) -> Result<ReplyOutcome>;
    async fn seek_local(&mut self, offset: u64) -> Result<()>;
    /// Reads up to `buf.len()` bytes from whichever side is the source
    /// for this transfer's direction (local file for upload, network
    /// for download). `Ok(0)` signals EOF.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Writes `buf` to whichever side is the sink for this transfer's
    /// direction.
    async fn write_chunk(&mut self, buf: &[u8]) -> Result<()>;
    /// Waits for the one-byte trailer (uploads) or is a no-op
    /// (downloads); returns whether the transfer is considered complete.
    async fn complete(&mut self) -> Result<bool>;
}

/// Drives one detachment transfer to completion, retrying with
/// exponential backoff across dial/read failures, until `cancel` fires
/// or the transfer finishes.
pub async fn run_transfer(
    mut io: impl TransferIo,
    req: TransferRequest,
    cancel: Receiver<()>,
    progress: smol::channel::Sender<TransferProgress>,
) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if cancel.try_recv().is_ok() {
            return Err(Error::Transfer(TransferError::Cancelled))
        }

        if let Err(e) = io.dial().await {
            warn!("detachment dial failed: {e}, backing off {backoff:?}");
            if wait_or_cancel(backoff, &cancel).await.is_err() {
                return Err(Error::Transfer(TransferError::Cancelled))
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
            continue
        }
        backoff = INITIAL_BACKOFF;

        io.send_request(&req).await?;
        let outcome = match io.read_reply().await {
            Ok(outcome) => outcome,
            Err(Error::Net(crate::error::NetError::ServerStatus(status)))
                if status == crate::net::wire::Status::ResumePastEndOfFile =>
            {
                return Ok(())
            }
            Err(e) => return Err(e),
        };

        if matches!(req.direction, Direction::Upload) {
            io.seek_local(req.resume_from).await?;
        }

        if outcome.is_complete {
            return Ok(())
        }

        match stream_body(&mut io, &req, outcome.total_bytes, &cancel, &progress).await {
            Ok(()) => match io.complete().await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    debug!("server trailer reported incomplete transfer, retrying");
                    continue
                }
                Err(e) => return Err(e),
            },
            Err(StreamOutcome::Cancelled) => return Err(Error::Transfer(TransferError::Cancelled)),
            Err(StreamOutcome::Retry) => continue,
            Err(StreamOutcome::Fatal(e)) => return Err(e),
        }
    }
}

enum StreamOutcome {
    Cancelled,
    Retry,
    Fatal(Error),
}

async fn stream_body(
    io: &mut impl TransferIo,
    req: &TransferRequest,
    total: u64,
    cancel: &Receiver<()>,
    progress: &smol::channel::Sender<TransferProgress>,
) -> std::result::Result<(), StreamOutcome> {
    let mut transferred: u64 = 0;
    let mut last_progress = Instant::now() - PROGRESS_INTERVAL;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        if cancel.try_recv().is_ok() {
            return Err(StreamOutcome::Cancelled)
        }

        let n = match io.read_chunk(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                return Err(match req.direction {
                    // For uploads the read side is the local file: any
                    // error there is unrecoverable.
                    Direction::Upload => StreamOutcome::Fatal(e),
                    // For downloads the read side is the network: retry.
                    Direction::Download => StreamOutcome::Retry,
                })
            }
        };

        if n == 0 {
            return if transferred == total { Ok(()) } else { Err(StreamOutcome::Retry) }
        }

        if let Err(e) = io.write_chunk(&buf[..n]).await {
            return Err(match req.direction {
                Direction::Upload => StreamOutcome::Retry,
                Direction::Download => StreamOutcome::Fatal(e),
            })
        }

        transferred += n as u64;
        if transferred > total {
            return Err(StreamOutcome::Fatal(Error::Transfer(TransferError::Overrun)))
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            let _ = progress.try_send(TransferProgress { id: req.id, transferred, total });
            last_progress = Instant::now();
        }

        smol::Timer::after(YIELD_INTERVAL).await;
    }
}

async fn wait_or_cancel(duration: Duration, cancel: &Receiver<()>) -> std::result::Result<(), ()> {
    futures::select_biased! {
        _ = cancel.recv().fuse() => Err(()),
        _ = smol::Timer::after(duration).fuse() => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeIo {
        body: Vec<u8>,
        offset: usize,
        dial_failures: usize,
        dials: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TransferIo for FakeIo {
        async fn dial(&mut self) -> Result<()> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            if n < self.dial_failures {
                return Err(Error::Malformed("simulated dial failure"))
            }
            Ok(())
        }
        async fn send_request(&mut self, _req: &TransferRequest) -> Result<()> {
            Ok(())
        }
        async fn read_reply(&mut self) -> Result<ReplyOutcome> {
            Ok(ReplyOutcome { total_bytes: self.body.len() as u64, is_complete: self.body.is_empty() })
        }
        async fn seek_local(&mut self, offset: u64) -> Result<()> {
            self.offset = offset as usize;
            Ok(())
        }
        async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
            let remaining = &self.body[self.offset..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.offset += n;
            Ok(n)
        }
        async fn write_chunk(&mut self, _buf: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn complete(&mut self) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn transfer_completes_without_dial_failures() {
        smol::block_on(async {
            let io = FakeIo { body: vec![1, 2, 3, 4], offset: 0, dial_failures: 0, dials: AtomicUsize::new(0) };
            let (_cancel_tx, cancel_rx) = smol::channel::bounded(1);
            let (progress_tx, _progress_rx) = smol::channel::bounded(16);
            let req =
                TransferRequest { id: 1, direction: Direction::Download, size_hint: None, resume_from: 0 };
            let result = run_transfer(io, req, cancel_rx, progress_tx).await;
            assert!(result.is_ok());
        });
    }

    #[test]
    fn cancellation_before_dial_aborts() {
        smol::block_on(async {
            let io = FakeIo { body: vec![1, 2, 3], offset: 0, dial_failures: 0, dials: AtomicUsize::new(0) };
            let (cancel_tx, cancel_rx) = smol::channel::bounded(1);
            cancel_tx.try_send(()).unwrap();
            let (progress_tx, _progress_rx) = smol::channel::bounded(16);
            let req =
                TransferRequest { id: 2, direction: Direction::Upload, size_hint: None, resume_from: 0 };
            let result = run_transfer(io, req, cancel_rx, progress_tx).await;
            assert!(matches!(result, Err(Error::Transfer(TransferError::Cancelled))));
        });
    }
}
