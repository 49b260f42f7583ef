// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local address selection and subnet expansion.

use crate::error::Error;
use crate::{COMPONENT_SXP, MOD_SEARCH};
use sdb::{Binding, NodeId, Prefix, Prefix4, Prefix6};
use slog::Logger;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;
use sxp_common::lock;

/// Round robin position over a list of local addresses.
///
/// Each selection returns the k-th address counting from the end of the
/// sorted list, starting with the last one, and moves k forward. Once every
/// address has been handed out k goes back to 1.
#[derive(Debug)]
pub struct AddressRotation {
    k: Mutex<usize>,
}

impl Default for AddressRotation {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressRotation {
    pub fn new() -> Self {
        Self { k: Mutex::new(1) }
    }

    /// Start over from the last address.
    pub fn reset(&self) {
        *lock!(self.k) = 1;
    }
}

/// Pick one of `addrs` according to `rotation`. Addresses are ordered IPv4
/// first, then numerically.
pub fn select_address(
    addrs: &[IpAddr],
    rotation: &AddressRotation,
) -> Result<IpAddr, Error> {
    if addrs.is_empty() {
        return Err(Error::NoNetworkInterfaces);
    }
    let mut sorted = addrs.to_vec();
    sorted.sort();

    let mut k = lock!(rotation.k);
    if *k > sorted.len() {
        *k = 1;
    }
    let addr = sorted[sorted.len() - *k];
    *k += 1;
    if *k > sorted.len() {
        *k = 1;
    }
    Ok(addr)
}

/// Addresses of every interface that is up and is not a tunnel.
pub fn local_addresses(log: &Logger) -> Vec<IpAddr> {
    let mut result = Vec::new();
    for iface in netdev::get_interfaces() {
        if !iface.is_up() || iface.is_tun() {
            slog::trace!(log, "skipping interface {}", iface.name;
                "component" => COMPONENT_SXP,
                "module" => MOD_SEARCH
            );
            continue;
        }
        result.extend(iface.ipv4.iter().map(|n| IpAddr::V4(n.addr())));
        result.extend(iface.ipv6.iter().map(|n| IpAddr::V6(n.addr())));
    }
    result
}

/// A local address to advertise, rotating through the available ones on
/// successive calls.
pub fn best_local_address(
    rotation: &AddressRotation,
    log: &Logger,
) -> Result<IpAddr, Error> {
    let addr = select_address(&local_addresses(log), rotation)?;
    slog::debug!(log, "selected local address {addr}";
        "component" => COMPONENT_SXP,
        "module" => MOD_SEARCH
    );
    Ok(addr)
}

/// A node id taken from the local IPv4 addresses.
pub fn local_node_id(
    rotation: &AddressRotation,
    log: &Logger,
) -> Result<NodeId, Error> {
    let v4: Vec<IpAddr> = local_addresses(log)
        .into_iter()
        .filter(|a| a.is_ipv4())
        .collect();
    match select_address(&v4, rotation)? {
        IpAddr::V4(a) => Ok(a),
        IpAddr::V6(_) => Err(Error::NoNetworkInterfaces),
    }
}

/// The first `limit` host prefixes of `prefix`, counting up from the network
/// address. A prefix has at most 2^host-bits hosts.
pub fn expand_prefix(
    prefix: Prefix,
    limit: usize,
) -> impl Iterator<Item = Prefix> {
    let hosts = 1u128.checked_shl(prefix.host_bits()).unwrap_or(u128::MAX);
    let n = hosts.min(limit as u128) as usize;
    (0..n).map(move |i| match prefix {
        Prefix::V4(p) => Prefix::V4(Prefix4::host(Ipv4Addr::from(
            u32::from(p.value) + i as u32,
        ))),
        Prefix::V6(p) => Prefix::V6(Prefix6::host(Ipv6Addr::from(
            u128::from(p.value) + i as u128,
        ))),
    })
}

/// Copies of `binding`, one per host of its prefix, up to `quantity` of
/// them. A host binding is returned as is.
pub fn expand_binding(binding: &Binding, quantity: usize) -> Vec<Binding> {
    if binding.prefix.is_host() {
        return vec![binding.clone()];
    }
    expand_prefix(binding.prefix, quantity)
        .map(|prefix| Binding {
            prefix,
            ..binding.clone()
        })
        .collect()
}

/// Replace every subnet binding by its expansion. Host bindings keep their
/// order and the expansions follow them. A zero `quantity` leaves the list
/// untouched.
pub fn expand_bindings(bindings: Vec<Binding>, quantity: usize) -> Vec<Binding> {
    if quantity == 0 {
        return bindings;
    }
    let (mut hosts, subnets): (Vec<Binding>, Vec<Binding>) =
        bindings.into_iter().partition(|b| b.prefix.is_host());
    for b in &subnets {
        hosts.extend(expand_binding(b, quantity));
    }
    hosts
}
