// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::attributes::{CapabilityType, HoldTime};
use crate::config::{NodeConfig, PeerConfig};
use crate::error::Error;
use crate::log::connection_log;
use crate::messages::{frame_to_string, ConnectionMode, Message, Version};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use sdb::{Binding, MasterDatabase, NodeId, Prefix};
use slog::Logger;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The transport a connection exchanges frames over.
pub trait SxpChannel: Send {
    /// Send one complete frame.
    fn send(&self, frame: Vec<u8>) -> Result<(), Error>;

    fn peer(&self) -> SocketAddr;

    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Off,
    PendingOn,
    On,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Off => "off",
            ConnectionState::PendingOn => "pending-on",
            ConnectionState::On => "on",
        };
        write!(f, "{s}")
    }
}

/// Protocol state for one peer.
pub struct Connection<Ch: SxpChannel> {
    pub channel: Ch,
    pub mode: ConnectionMode,
    pub state: ConnectionState,

    /// The version offered in Open until the handshake completes, the
    /// negotiated one afterwards.
    pub version: Version,

    pub local_node_id: NodeId,
    pub remote_node_id: Option<NodeId>,

    /// Capabilities the peer declared, or implied by its version.
    pub capabilities: Vec<CapabilityType>,

    /// Negotiated hold time in seconds, zero when the peer disabled it.
    pub hold_time: u16,
    pub keepalive_time: u16,
    pub last_keepalive: Option<DateTime<Utc>>,

    /// Bindings advertised to the peer so far.
    pub export: BTreeMap<Prefix, Binding>,

    pub config: NodeConfig,
    pub log: Logger,
}

impl<Ch: SxpChannel> Connection<Ch> {
    pub fn new(
        channel: Ch,
        local_node_id: NodeId,
        peer: &PeerConfig,
        config: NodeConfig,
        log: Logger,
    ) -> Self {
        Self {
            channel,
            mode: peer.mode,
            state: ConnectionState::Off,
            version: peer.version.min(config.version),
            local_node_id,
            remote_node_id: None,
            capabilities: Vec::new(),
            hold_time: 0,
            keepalive_time: 0,
            last_keepalive: None,
            export: BTreeMap::new(),
            config,
            log,
        }
    }

    /// The strategy for the version currently in effect.
    pub fn strategy(&self) -> Strategy {
        Strategy::new(self.version)
    }

    /// The id the peer is known by. Peers that did not send one are known by
    /// their IPv4 address.
    pub fn remote_id(&self) -> NodeId {
        if let Some(id) = self.remote_node_id {
            return id;
        }
        match self.channel.peer().ip() {
            IpAddr::V4(a) => a,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            connection_log!(self, info, "{} -> {state}", self.state);
        }
        self.state = state;
    }

    pub fn send(&self, msg: &Message) -> Result<(), Error> {
        let frame = msg.to_frame()?;
        connection_log!(self, debug, "send {msg}";
            "frame" => frame_to_string(&frame)
        );
        self.channel.send(frame)
    }

    /// Settle on a hold time from the one the peer advertised. A peer that
    /// sends none, or a zero minimum, turns the timers off.
    pub fn negotiate_hold_time(
        &mut self,
        remote: Option<HoldTime>,
    ) -> Result<(), Error> {
        let Some(remote) = remote.filter(|ht| !ht.is_disabled()) else {
            self.hold_time = 0;
            self.keepalive_time = 0;
            return Ok(());
        };

        let hold_time = if self.mode == ConnectionMode::Speaker {
            // The listener offered a range, it has to cover what we accept.
            let acceptable = self.config.hold_time_min_acceptable;
            if remote.max != 0 && acceptable > remote.max {
                return Err(Error::UnacceptableHoldTime(format!(
                    "{acceptable} above peer maximum {}",
                    remote.max
                )));
            }
            remote.min.max(acceptable)
        } else {
            // The speaker stated the smallest hold time it accepts.
            if remote.min > self.config.hold_time_max {
                return Err(Error::UnacceptableHoldTime(format!(
                    "peer minimum {} above {}",
                    remote.min, self.config.hold_time_max
                )));
            }
            remote.min.max(self.config.hold_time_min)
        };

        self.hold_time = hold_time;
        self.keepalive_time = (hold_time / 3).min(self.config.keepalive_time);
        Ok(())
    }

    /// Decode one inbound frame and act on it. Errors are reported to the
    /// peer where the protocol allows it and the connection is shut down.
    pub fn handle_frame(
        &mut self,
        db: &MasterDatabase,
        frame: &[u8],
    ) -> Result<(), Error> {
        let strategy = self.strategy();
        let result = strategy
            .on_parse_input(frame)
            .and_then(|msg| strategy.on_input_message(self, db, msg));
        if let Err(e) = &result {
            self.strategy().on_exception(self, e);
        }
        result
    }
}
