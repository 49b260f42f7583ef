// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::attributes::HoldTime;
use crate::error::Error;
use crate::messages::{ConnectionMode, Version};
use crate::search::{local_node_id, AddressRotation};
use crate::SXP_PORT;
use schemars::JsonSchema;
use sdb::NodeId;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::net::{Ipv4Addr, SocketAddr};

/// Settings shared by every connection of a node. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity advertised to peers. Taken from a local interface when not
    /// set.
    pub node_id: Option<Ipv4Addr>,
    pub port: u16,
    #[schemars(with = "u8")]
    pub version: Version,
    pub hold_time_min: u16,
    pub hold_time_max: u16,
    pub hold_time_min_acceptable: u16,
    pub keepalive_time: u16,

    /// Host bindings each subnet binding is expanded into for peers that do
    /// not support subnet bindings. Zero disables expansion.
    pub expansion_quantity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            port: SXP_PORT,
            version: Version::V4,
            hold_time_min: 90,
            hold_time_max: 180,
            hold_time_min_acceptable: 120,
            keepalive_time: 30,
            expansion_quantity: 0,
        }
    }
}

impl NodeConfig {
    /// The hold time a node in `mode` advertises in its Open. A speaker
    /// states the smallest hold time it accepts, a listener the range it
    /// supports.
    pub fn hold_time_attribute(
        &self,
        mode: ConnectionMode,
    ) -> Result<HoldTime, Error> {
        match mode {
            ConnectionMode::Speaker => {
                HoldTime::new(self.hold_time_min_acceptable.into())
            }
            ConnectionMode::Listener | ConnectionMode::Both => HoldTime::with_max(
                self.hold_time_min.into(),
                self.hold_time_max.into(),
            ),
        }
    }

    /// The configured node id, or one picked from the local interfaces.
    pub fn node_id(
        &self,
        rotation: &AddressRotation,
        log: &Logger,
    ) -> Result<NodeId, Error> {
        match self.node_id {
            Some(id) => Ok(id),
            None => local_node_id(rotation, log),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct PeerConfig {
    pub name: String,
    pub host: SocketAddr,
    #[schemars(with = "u8")]
    pub mode: ConnectionMode,
    #[schemars(with = "u8")]
    pub version: Version,
}
