// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// This file contains code for testing purposes only. Note that it's only
/// included in `lib.rs` with a `#[cfg(test)]` guard. It implements
/// SxpChannel over in-memory channels so that connections can be driven
/// frame by frame without a network.
use crate::connection::SxpChannel;
use crate::error::Error;
use crate::messages::frame_to_string;
use crate::{COMPONENT_SXP, MOD_STRATEGY};
use slog::Logger;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use sxp_common::lock;

const UNIT_CONNECTION: &str = "connection_channel";

/// Global counter for assigning unique IDs to channel pairs
static CHANNEL_PAIR_ID: AtomicU64 = AtomicU64::new(0);

/// One end of a bidirectional channel.
struct Endpoint<T> {
    rx: Receiver<T>,
    tx: Sender<T>,
}

fn endpoint_pair<T>() -> (Endpoint<T>, Endpoint<T>) {
    let (tx_a, rx_b) = channel();
    let (tx_b, rx_a) = channel();
    (Endpoint { rx: rx_a, tx: tx_a }, Endpoint { rx: rx_b, tx: tx_b })
}

pub struct SxpConnectionChannel {
    addr: SocketAddr,
    peer: SocketAddr,
    tx: Arc<Mutex<Sender<Vec<u8>>>>,
    rx: Mutex<Receiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    channel_id: u64,
    log: Logger,
}

impl SxpConnectionChannel {
    /// Two connected ends, the first bound to `a` and the second to `b`.
    pub fn pair(
        a: SocketAddr,
        b: SocketAddr,
        log: Logger,
    ) -> (SxpConnectionChannel, SxpConnectionChannel) {
        let channel_id = CHANNEL_PAIR_ID.fetch_add(1, Ordering::SeqCst);
        let (ea, eb) = endpoint_pair();
        let end = |addr, peer, e: Endpoint<Vec<u8>>| SxpConnectionChannel {
            addr,
            peer,
            tx: Arc::new(Mutex::new(e.tx)),
            rx: Mutex::new(e.rx),
            closed: Arc::new(AtomicBool::new(false)),
            channel_id,
            log: log.clone(),
        };
        (end(a, b, ea), end(b, a, eb))
    }

    pub fn local(&self) -> SocketAddr {
        self.addr
    }

    /// The next frame the peer sent, if any is waiting.
    pub fn recv(&self) -> Option<Vec<u8>> {
        match lock!(self.rx).try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Every frame waiting to be read.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.recv()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SxpChannel for SxpConnectionChannel {
    fn send(&self, frame: Vec<u8>) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::ChannelSend("channel closed".into()));
        }
        slog::trace!(self.log, "send frame to {}", self.peer;
            "component" => COMPONENT_SXP,
            "module" => MOD_STRATEGY,
            "unit" => UNIT_CONNECTION,
            "channel_id" => self.channel_id,
            "frame" => frame_to_string(&frame)
        );
        lock!(self.tx)
            .send(frame)
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn close(&self) {
        slog::debug!(self.log, "closing channel to {}", self.peer;
            "component" => COMPONENT_SXP,
            "module" => MOD_STRATEGY,
            "unit" => UNIT_CONNECTION,
            "channel_id" => self.channel_id
        );
        self.closed.store(true, Ordering::SeqCst);
    }
}
