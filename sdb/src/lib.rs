// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod access;
pub mod bestpath;
pub mod db;
pub mod error;
pub mod log;
pub mod types;

pub use db::MasterDatabase;
pub use types::*;

#[cfg(test)]
mod proptest;

pub const COMPONENT_SDB: &str = "sdb";
pub const MOD_DB: &str = "database";
