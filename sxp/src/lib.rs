// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod attributes;
pub mod config;
pub mod connection;
pub mod error;
pub mod legacy;
pub mod log;
pub mod messages;
pub mod search;
pub mod strategy;
pub mod update;

#[cfg(test)]
mod proptest;

#[cfg(test)]
#[macro_use]
extern crate lazy_static;


#[cfg(test)]
pub mod connection_channel;

pub const SXP_PORT: u16 = 64999;
pub const COMPONENT_SXP: &str = "sxp";
pub const MOD_STRATEGY: &str = "strategy";
pub const MOD_SEARCH: &str = "search";
pub const UNIT_CONNECTION: &str = "connection";
