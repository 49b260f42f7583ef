// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attributes carried by OPEN and UPDATE messages.
//!
//! Every attribute starts with a flags octet. The compact bit selects between
//! two header layouts, and for compact attributes the extended length bit
//! widens the length field to two octets.
//!
//! ```text
//! Compact
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-------------...
//! |O|N|P|C|E|0|0|0|     Type      |    Length     |  Value
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-------------...
//!
//! Compact, extended length
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+---...
//! |O|N|P|C|E|0|0|0|     Type      |            Length             | Value
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+---...
//!
//! Non-compact
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |O|N|P|C|E|0|0|0|                    Type                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Value (variable)                         :
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::error::Error;
use crate::messages::Version;
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u24, be_u32, u8 as parse_u8},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sdb::{NodeId, Prefix4, Prefix6};
use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};

pub mod attribute_flags {
    pub const OPTIONAL: u8 = 0b1000_0000;
    pub const NON_TRANSITIVE: u8 = 0b0100_0000;
    pub const PARTIAL: u8 = 0b0010_0000;
    pub const COMPACT: u8 = 0b0001_0000;
    pub const EXTENDED_LENGTH: u8 = 0b0000_1000;
}

use attribute_flags::*;

/// Flags used for the attributes a node always understands.
pub const WELL_KNOWN: u8 = NON_TRANSITIVE | COMPACT;

/// Flags used for add-prefix attributes sent to a peer that did not declare
/// the matching unicast capability.
pub const OPTIONAL_COMPACT: u8 = OPTIONAL | COMPACT;

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum AttributeType {
    AddIpv4 = 1,
    AddIpv6 = 2,
    DelIpv4 = 3,
    DelIpv6 = 4,
    SxpNodeId = 5,
    Capabilities = 6,
    HoldTime = 7,
    Ipv4AddPrefix = 11,
    Ipv6AddPrefix = 12,
    Ipv4DeletePrefix = 13,
    Ipv6DeletePrefix = 14,
    PeerSequence = 16,
    SourceGroupTag = 17,
    Ipv4AddTable = 18,
    Ipv6AddTable = 19,
}

/// The header layout of an attribute on the wire.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum AttributeVariant {
    Compact,
    CompactExtendedLength,
    NonCompact,
}

impl AttributeVariant {
    /// The layout used to encode a value of `len` bytes under `flags`.
    pub fn for_value(flags: u8, len: usize) -> Self {
        if flags & COMPACT == 0 {
            AttributeVariant::NonCompact
        } else if len > usize::from(u8::MAX) {
            AttributeVariant::CompactExtendedLength
        } else {
            AttributeVariant::Compact
        }
    }
}

#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Copy,
    Clone,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum CapabilityType {
    Ipv4Unicast = 1,
    Ipv6Unicast = 2,
    SubnetBindings = 3,
}

impl CapabilityType {
    /// The capabilities a node running `version` supports, in the order they
    /// are advertised.
    pub fn for_version(version: Version) -> Vec<CapabilityType> {
        match version {
            Version::V1 => vec![CapabilityType::Ipv4Unicast],
            Version::V2 => {
                vec![CapabilityType::Ipv6Unicast, CapabilityType::Ipv4Unicast]
            }
            Version::V3 | Version::V4 => vec![
                CapabilityType::SubnetBindings,
                CapabilityType::Ipv6Unicast,
                CapabilityType::Ipv4Unicast,
            ],
        }
    }
}

/// Hold time range in seconds. A `max` of zero means only `min` was given.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct HoldTime {
    pub min: u16,
    pub max: u16,
}

impl HoldTime {
    /// Smallest non-zero hold time.
    pub const FLOOR: u32 = 3;

    fn check_min(min: u32) -> Result<u16, Error> {
        if min == 0 {
            return Ok(0);
        }
        if min < Self::FLOOR {
            return Err(Error::HoldTimeMin(min));
        }
        u16::try_from(min).map_err(|_| Error::HoldTimeMin(min))
    }

    pub fn new(min: u32) -> Result<Self, Error> {
        Ok(Self {
            min: Self::check_min(min)?,
            max: 0,
        })
    }

    /// A hold time range. A zero `min` disables the hold timer and the range
    /// collapses to `{0, 0}` whatever `max` is.
    pub fn with_max(min: u32, max: u32) -> Result<Self, Error> {
        let min16 = Self::check_min(min)?;
        if min16 == 0 {
            return Ok(Self { min: 0, max: 0 });
        }
        if max < min {
            return Err(Error::HoldTimeMax { min, max });
        }
        let max = u16::try_from(max).map_err(|_| Error::HoldTimeMax { min, max })?;
        Ok(Self { min: min16, max })
    }

    pub fn is_disabled(&self) -> bool {
        self.min == 0
    }

    fn to_wire(self) -> Vec<u8> {
        let mut buf = self.min.to_be_bytes().to_vec();
        if self.max != 0 {
            buf.extend_from_slice(&self.max.to_be_bytes());
        }
        buf
    }

    fn from_wire(input: &[u8]) -> Result<Self, Error> {
        match input.len() {
            2 => {
                let (_, min) = be_u16(input)?;
                Self::new(min.into())
            }
            4 => {
                let (input, min) = be_u16(input)?;
                let (_, max) = be_u16(input)?;
                Self::with_max(min.into(), max.into())
            }
            n => Err(Error::AttributeLength(format!("hold time of {n} bytes"))),
        }
    }
}

/// A security group tag.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub struct Sgt(u16);

impl Sgt {
    pub const MIN: u32 = 2;
    pub const MAX: u32 = 65519;

    pub fn new(value: u32) -> Result<Self, Error> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(Error::SecurityGroupTagValue(value));
        }
        Ok(Self(value as u16))
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl Display for Sgt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AttributeValue {
    SxpNodeId(NodeId),
    Capabilities(Vec<CapabilityType>),
    HoldTime(HoldTime),
    Ipv4AddPrefix(Vec<Prefix4>),
    Ipv6AddPrefix(Vec<Prefix6>),
    Ipv4DeletePrefix(Vec<Prefix4>),
    Ipv6DeletePrefix(Vec<Prefix6>),
    PeerSequence(Vec<NodeId>),
    SourceGroupTag(Sgt),

    /// Any attribute this implementation does not model. The value is carried
    /// as is.
    Unrecognized { type_code: u32, value: Vec<u8> },
}

impl AttributeValue {
    pub fn type_code(&self) -> u32 {
        let typ = match self {
            Self::SxpNodeId(_) => AttributeType::SxpNodeId,
            Self::Capabilities(_) => AttributeType::Capabilities,
            Self::HoldTime(_) => AttributeType::HoldTime,
            Self::Ipv4AddPrefix(_) => AttributeType::Ipv4AddPrefix,
            Self::Ipv6AddPrefix(_) => AttributeType::Ipv6AddPrefix,
            Self::Ipv4DeletePrefix(_) => AttributeType::Ipv4DeletePrefix,
            Self::Ipv6DeletePrefix(_) => AttributeType::Ipv6DeletePrefix,
            Self::PeerSequence(_) => AttributeType::PeerSequence,
            Self::SourceGroupTag(_) => AttributeType::SourceGroupTag,
            Self::Unrecognized { type_code, .. } => return *type_code,
        };
        u8::from(typ).into()
    }

    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::SxpNodeId(id) => id.octets().to_vec(),
            Self::Capabilities(caps) => {
                caps.iter().flat_map(|c| [u8::from(*c), 0]).collect()
            }
            Self::HoldTime(ht) => ht.to_wire(),
            Self::Ipv4AddPrefix(list) | Self::Ipv4DeletePrefix(list) => list
                .iter()
                .flat_map(|p| prefix_to_wire(p.length, &p.value.octets()))
                .collect(),
            Self::Ipv6AddPrefix(list) | Self::Ipv6DeletePrefix(list) => list
                .iter()
                .flat_map(|p| prefix_to_wire(p.length, &p.value.octets()))
                .collect(),
            Self::PeerSequence(seq) => {
                seq.iter().flat_map(|id| id.octets()).collect()
            }
            Self::SourceGroupTag(sgt) => sgt.value().to_be_bytes().to_vec(),
            Self::Unrecognized { value, .. } => value.clone(),
        }
    }

    pub fn from_wire(type_code: u32, input: &[u8]) -> Result<Self, Error> {
        let typ = u8::try_from(type_code)
            .ok()
            .and_then(|t| AttributeType::try_from(t).ok());
        let Some(typ) = typ else {
            return Ok(Self::Unrecognized {
                type_code,
                value: input.to_vec(),
            });
        };
        match typ {
            AttributeType::SxpNodeId => {
                let id: [u8; 4] = input.try_into().map_err(|_| {
                    Error::AttributeLength(format!(
                        "node id of {} bytes",
                        input.len()
                    ))
                })?;
                Ok(Self::SxpNodeId(Ipv4Addr::from(id)))
            }
            AttributeType::Capabilities => {
                Ok(Self::Capabilities(capabilities_from_wire(input)?))
            }
            AttributeType::HoldTime => {
                Ok(Self::HoldTime(HoldTime::from_wire(input)?))
            }
            AttributeType::Ipv4AddPrefix => {
                Ok(Self::Ipv4AddPrefix(prefix4_list_from_wire(input)?))
            }
            AttributeType::Ipv6AddPrefix => {
                Ok(Self::Ipv6AddPrefix(prefix6_list_from_wire(input)?))
            }
            AttributeType::Ipv4DeletePrefix => {
                Ok(Self::Ipv4DeletePrefix(prefix4_list_from_wire(input)?))
            }
            AttributeType::Ipv6DeletePrefix => {
                Ok(Self::Ipv6DeletePrefix(prefix6_list_from_wire(input)?))
            }
            AttributeType::PeerSequence => {
                if input.len() % 4 != 0 {
                    return Err(Error::AttributeLength(format!(
                        "peer sequence of {} bytes",
                        input.len()
                    )));
                }
                Ok(Self::PeerSequence(
                    input
                        .chunks_exact(4)
                        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                        .collect(),
                ))
            }
            AttributeType::SourceGroupTag => {
                if input.len() != 2 {
                    return Err(Error::AttributeLength(format!(
                        "sgt of {} bytes",
                        input.len()
                    )));
                }
                let (_, sgt) = be_u16(input)?;
                Ok(Self::SourceGroupTag(Sgt::new(sgt.into())?))
            }
            AttributeType::AddIpv4
            | AttributeType::AddIpv6
            | AttributeType::DelIpv4
            | AttributeType::DelIpv6
            | AttributeType::Ipv4AddTable
            | AttributeType::Ipv6AddTable => Ok(Self::Unrecognized {
                type_code,
                value: input.to_vec(),
            }),
        }
    }
}

fn capabilities_from_wire(mut input: &[u8]) -> Result<Vec<CapabilityType>, Error> {
    let mut result = Vec::new();
    while !input.is_empty() {
        let (out, code) = parse_u8(input)?;
        let (out, len) = parse_u8(out)?;
        let typ = CapabilityType::try_from(code)?;
        if len != 0 {
            return Err(Error::CapabilityLength(code));
        }
        result.push(typ);
        input = out;
    }
    Ok(result)
}

fn prefix_to_wire(length: u8, octets: &[u8]) -> Vec<u8> {
    let length = length.min((octets.len() * 8) as u8);
    let n = usize::from(length).div_ceil(8);
    let mut buf = vec![length];
    buf.extend_from_slice(&octets[..n]);
    buf
}

/// Read one length-prefixed address of at most `N` bytes.
fn prefix_from_wire<const N: usize>(
    input: &[u8],
) -> Result<(&[u8], u8, [u8; N]), Error> {
    let max = (N * 8) as u8;
    let (input, length) = parse_u8(input)?;
    if length > max {
        return Err(Error::AddressLength { length, max });
    }
    let (input, bytes) = take(usize::from(length).div_ceil(8))(input)?;
    let mut octets = [0u8; N];
    octets[..bytes.len()].copy_from_slice(bytes);
    Ok((input, length, octets))
}

fn prefix4_list_from_wire(mut input: &[u8]) -> Result<Vec<Prefix4>, Error> {
    let mut result = Vec::new();
    while !input.is_empty() {
        let (out, length, octets) = prefix_from_wire::<4>(input)?;
        result.push(Prefix4::new(Ipv4Addr::from(octets), length));
        input = out;
    }
    Ok(result)
}

fn prefix6_list_from_wire(mut input: &[u8]) -> Result<Vec<Prefix6>, Error> {
    let mut result = Vec::new();
    while !input.is_empty() {
        let (out, length, octets) = prefix_from_wire::<16>(input)?;
        result.push(Prefix6::new(Ipv6Addr::from(octets), length));
        input = out;
    }
    Ok(result)
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Attribute {
    /// Optional, non-transitive, partial and compact bits. The extended
    /// length bit is a property of the encoding and is never kept here.
    pub flags: u8,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(flags: u8, value: AttributeValue) -> Self {
        Self {
            flags: flags & !EXTENDED_LENGTH,
            value,
        }
    }

    pub fn sxp_node_id(id: NodeId) -> Self {
        Self::new(WELL_KNOWN, AttributeValue::SxpNodeId(id))
    }

    pub fn capabilities(version: Version) -> Self {
        Self::new(
            WELL_KNOWN,
            AttributeValue::Capabilities(CapabilityType::for_version(version)),
        )
    }

    pub fn hold_time(hold_time: HoldTime) -> Self {
        Self::new(WELL_KNOWN, AttributeValue::HoldTime(hold_time))
    }

    pub fn peer_sequence(sequence: Vec<NodeId>) -> Self {
        Self::new(WELL_KNOWN, AttributeValue::PeerSequence(sequence))
    }

    pub fn source_group_tag(sgt: Sgt) -> Self {
        Self::new(WELL_KNOWN, AttributeValue::SourceGroupTag(sgt))
    }

    /// The header layout this attribute is encoded with.
    pub fn variant(&self) -> AttributeVariant {
        AttributeVariant::for_value(self.flags, self.value.to_wire().len())
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let value = self.value.to_wire();
        let type_code = self.value.type_code();
        let compact_type = || {
            u8::try_from(type_code).map_err(|_| {
                Error::AttributeVariant(format!(
                    "type {type_code} does not fit a compact attribute"
                ))
            })
        };

        let mut buf = match AttributeVariant::for_value(self.flags, value.len())
        {
            AttributeVariant::Compact => {
                vec![self.flags, compact_type()?, value.len() as u8]
            }
            AttributeVariant::CompactExtendedLength => {
                let len = u16::try_from(value.len()).map_err(|_| {
                    Error::TooLarge(format!("attribute of {} bytes", value.len()))
                })?;
                let mut buf = vec![self.flags | EXTENDED_LENGTH, compact_type()?];
                buf.extend_from_slice(&len.to_be_bytes());
                buf
            }
            AttributeVariant::NonCompact => {
                if type_code > 0x00ff_ffff {
                    return Err(Error::AttributeVariant(format!(
                        "type {type_code} does not fit 24 bits"
                    )));
                }
                let len = u32::try_from(value.len()).map_err(|_| {
                    Error::TooLarge(format!("attribute of {} bytes", value.len()))
                })?;
                let mut buf = vec![self.flags];
                buf.extend_from_slice(&type_code.to_be_bytes()[1..]);
                buf.extend_from_slice(&len.to_be_bytes());
                buf
            }
        };
        buf.extend_from_slice(&value);
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<(&[u8], Attribute), Error> {
        let (input, flags) = parse_u8(input)?;
        let (input, type_code, len) = if flags & COMPACT != 0 {
            let (input, typ) = parse_u8(input)?;
            if flags & EXTENDED_LENGTH != 0 {
                let (input, len) = be_u16(input)?;
                (input, u32::from(typ), len as usize)
            } else {
                let (input, len) = parse_u8(input)?;
                (input, u32::from(typ), len as usize)
            }
        } else {
            let (input, typ) = be_u24(input)?;
            let (input, len) = be_u32(input)?;
            (input, typ, len as usize)
        };
        if input.len() < len {
            return Err(Error::AttributeLength(format!(
                "attribute {type_code} declares {len} bytes, {} remain",
                input.len()
            )));
        }
        let (input, value) = take(len)(input)?;
        let value = AttributeValue::from_wire(type_code, value)?;
        Ok((input, Attribute::new(flags, value)))
    }
}

/// An ordered sequence of attributes.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct AttributeList(pub Vec<Attribute>);

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attribute: Attribute) {
        self.0.push(attribute);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first attribute of type `typ`.
    pub fn get(&self, typ: AttributeType) -> Result<&AttributeValue, Error> {
        let code = u32::from(u8::from(typ));
        self.0
            .iter()
            .map(|a| &a.value)
            .find(|v| v.type_code() == code)
            .ok_or_else(|| Error::AttributeNotFound(format!("{typ:?}")))
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        for a in &self.0 {
            buf.extend_from_slice(&a.to_wire()?);
        }
        Ok(buf)
    }

    pub fn from_wire(mut input: &[u8]) -> Result<Self, Error> {
        let mut result = Vec::new();
        while !input.is_empty() {
            let (out, a) = Attribute::from_wire(input)?;
            result.push(a);
            input = out;
        }
        Ok(Self(result))
    }
}

impl From<Vec<Attribute>> for AttributeList {
    fn from(v: Vec<Attribute>) -> Self {
        Self(v)
    }
}

impl<'a> IntoIterator for &'a AttributeList {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn list<T: Display>(f: &mut Formatter<'_>, v: &[T]) -> fmt::Result {
            for (i, x) in v.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{x}")?;
            }
            Ok(())
        }
        match self {
            Self::SxpNodeId(id) => write!(f, "node-id {id}"),
            Self::Capabilities(caps) => write!(f, "capabilities {caps:?}"),
            Self::HoldTime(ht) => write!(f, "hold-time {}-{}", ht.min, ht.max),
            Self::Ipv4AddPrefix(v) => {
                write!(f, "add4 ")?;
                list(f, v)
            }
            Self::Ipv6AddPrefix(v) => {
                write!(f, "add6 ")?;
                list(f, v)
            }
            Self::Ipv4DeletePrefix(v) => {
                write!(f, "del4 ")?;
                list(f, v)
            }
            Self::Ipv6DeletePrefix(v) => {
                write!(f, "del6 ")?;
                list(f, v)
            }
            Self::PeerSequence(v) => {
                write!(f, "peers ")?;
                list(f, v)
            }
            Self::SourceGroupTag(sgt) => write!(f, "sgt {sgt}"),
            Self::Unrecognized { type_code, value } => {
                write!(f, "type {type_code} ({} bytes)", value.len())
            }
        }
    }
}
