// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message forms used by versions 1 through 3.
//!
//! Legacy updates are a flat sequence of mapping records, one per binding.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Mapping Type                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Length                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! :                   Address (4 or 16 bytes)                     :
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          TLV Type                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         TLV Length                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! :                         TLV Value                             :
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The record length covers the address and every TLV that follows it.

use crate::attributes::{CapabilityType, Sgt};
use crate::error::Error;
use crate::messages::{open_fixed_from_wire, OpenMessage, Version};
use crate::search::expand_bindings;
use crate::update::{BindingFilter, UpdateBindings};
use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u32, u8 as parse_u8},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sdb::{Binding, NodeId, Prefix};
use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u32)]
pub enum MappingType {
    AddIpv4 = 1,
    AddIpv6 = 2,
    DelIpv4 = 3,
    DelIpv6 = 4,
}

impl MappingType {
    fn new(add: bool, prefix: &Prefix) -> Self {
        match (add, prefix.is_v4()) {
            (true, true) => MappingType::AddIpv4,
            (true, false) => MappingType::AddIpv6,
            (false, true) => MappingType::DelIpv4,
            (false, false) => MappingType::DelIpv6,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, MappingType::AddIpv4 | MappingType::AddIpv6)
    }

    fn address_len(&self) -> usize {
        match self {
            MappingType::AddIpv4 | MappingType::DelIpv4 => 4,
            MappingType::AddIpv6 | MappingType::DelIpv6 => 16,
        }
    }
}

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u32)]
pub enum TlvType {
    Sgt = 1,
    PrefixLength = 2,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MappingRecord {
    pub typ: MappingType,
    pub prefix: Prefix,
    pub sgt: Option<Sgt>,
}

impl MappingRecord {
    fn to_wire(&self, version: Version) -> Vec<u8> {
        let mut body = match self.prefix.addr() {
            std::net::IpAddr::V4(a) => a.octets().to_vec(),
            std::net::IpAddr::V6(a) => a.octets().to_vec(),
        };
        if let Some(sgt) = self.sgt {
            tlv_to_wire(&mut body, TlvType::Sgt, &sgt.value().to_be_bytes());
        }
        if version == Version::V3 && !self.prefix.is_host() {
            tlv_to_wire(&mut body, TlvType::PrefixLength, &[self.prefix.length()]);
        }

        let mut buf = u32::from(self.typ).to_be_bytes().to_vec();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend(body);
        buf
    }

    fn from_wire(input: &[u8]) -> Result<(&[u8], MappingRecord), Error> {
        let (input, typ) = be_u32(input)?;
        let typ = MappingType::try_from(typ)?;
        let (input, len) = be_u32(input)?;
        let (rest, body) = take(len as usize)(input)?;

        let n = typ.address_len();
        if body.len() < n {
            return Err(Error::AttributeLength(format!(
                "mapping record of {} bytes",
                body.len()
            )));
        }
        let (mut tlvs, addr) = take(n)(body)?;
        let addr: std::net::IpAddr = match n {
            4 => Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]).into(),
            _ => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(addr);
                Ipv6Addr::from(octets).into()
            }
        };

        let mut sgt = None;
        let mut length = if n == 4 { 32 } else { 128 };
        while !tlvs.is_empty() {
            let (out, t) = be_u32(tlvs)?;
            let (out, l) = be_u32(out)?;
            let (out, value) = take(l as usize)(out)?;
            match TlvType::try_from(t) {
                Ok(TlvType::Sgt) => {
                    let (_, v) = be_u16(value)?;
                    sgt = Some(Sgt::new(v.into())?);
                }
                Ok(TlvType::PrefixLength) => {
                    let (_, v) = parse_u8(value)?;
                    if v > length {
                        return Err(Error::AddressLength {
                            length: v,
                            max: length,
                        });
                    }
                    length = v;
                }
                Err(_) => {}
            }
            tlvs = out;
        }

        if typ.is_add() && sgt.is_none() {
            return Err(Error::TlvNotFound(format!("sgt for {addr}")));
        }

        Ok((
            rest,
            MappingRecord {
                typ,
                prefix: Prefix::new(addr, length),
                sgt,
            },
        ))
    }
}

fn tlv_to_wire(buf: &mut Vec<u8>, typ: TlvType, value: &[u8]) {
    buf.extend_from_slice(&u32::from(typ).to_be_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value);
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LegacyUpdateMessage {
    /// The version the records are laid out for.
    pub version: Version,
    pub records: Vec<MappingRecord>,
}

impl LegacyUpdateMessage {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        Ok(self
            .records
            .iter()
            .flat_map(|r| r.to_wire(self.version))
            .collect())
    }

    pub fn from_wire(
        version: Version,
        mut input: &[u8],
    ) -> Result<LegacyUpdateMessage, Error> {
        let mut records = Vec::new();
        while !input.is_empty() {
            let (out, r) = MappingRecord::from_wire(input)?;
            records.push(r);
            input = out;
        }
        Ok(LegacyUpdateMessage { version, records })
    }

    /// Build an update for a peer running `version`. Version 1 peers only
    /// understand IPv4. Peers without subnet binding support get subnets
    /// expanded into up to `expansion_quantity` host bindings, and nothing at
    /// all for a subnet when the quantity is zero.
    pub fn compose<F: BindingFilter>(
        version: Version,
        delete: &[Binding],
        add: &[Binding],
        filter: &F,
        expansion_quantity: usize,
    ) -> Result<LegacyUpdateMessage, Error> {
        let subnets = CapabilityType::for_version(version)
            .contains(&CapabilityType::SubnetBindings);
        let usable = |bindings: Vec<Binding>| -> Vec<Binding> {
            let bindings = if subnets {
                bindings
            } else {
                expand_bindings(bindings, expansion_quantity)
            };
            bindings
                .into_iter()
                .filter(|b| version != Version::V1 || b.prefix.is_v4())
                .filter(|b| subnets || b.prefix.is_host())
                .collect()
        };

        let mut records = Vec::new();
        for b in usable(delete.to_vec()) {
            records.push(MappingRecord {
                typ: MappingType::new(false, &b.prefix),
                prefix: b.prefix,
                sgt: None,
            });
        }
        let add: Vec<Binding> =
            add.iter().filter(|b| !filter.apply(b)).cloned().collect();
        for b in usable(add) {
            records.push(MappingRecord {
                typ: MappingType::new(true, &b.prefix),
                prefix: b.prefix,
                sgt: Some(Sgt::new(b.sgt.into())?),
            });
        }
        Ok(LegacyUpdateMessage { version, records })
    }

    /// The bindings carried by this update as learned from `peer`, and the
    /// prefixes it withdraws.
    pub fn bindings(
        &self,
        peer: NodeId,
        timestamp: DateTime<Utc>,
    ) -> UpdateBindings {
        let mut result = UpdateBindings::default();
        for r in &self.records {
            match r.sgt {
                Some(sgt) if r.typ.is_add() => result.add.push(
                    Binding::new(r.prefix, sgt.value())
                        .with_peer_sequence(vec![peer])
                        .with_timestamp(timestamp),
                ),
                _ => result.delete.push(r.prefix),
            }
        }
        result
    }
}

impl Display for LegacyUpdateMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)?;
        for r in &self.records {
            match r.sgt {
                Some(sgt) => write!(f, " [{:?} {} {sgt}]", r.typ, r.prefix)?,
                None => write!(f, " [{:?} {}]", r.typ, r.prefix)?,
            }
        }
        Ok(())
    }
}

/// A legacy Open or OpenResp payload is just the version and the mode.
pub fn open_from_wire(input: &[u8]) -> Result<OpenMessage, Error> {
    let (_, version, mode) = open_fixed_from_wire(input)?;
    Ok(OpenMessage {
        version,
        mode,
        attributes: Default::default(),
    })
}
