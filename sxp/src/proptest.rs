// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the SXP wire format using proptest
//!
//! These tests verify key invariants of encoding and decoding:
//! - attribute lists keep their values across all header variants
//! - Open, Error and legacy Update messages decode to what was encoded
//! - bindings survive an update round trip and every frame fits the limit
//! - arbitrary input never panics the decoder
//! - subnet expansion and address rotation stay within their bounds

use crate::attributes::{
    attribute_flags, Attribute, AttributeList, AttributeValue,
    AttributeVariant, CapabilityType, HoldTime, Sgt, OPTIONAL_COMPACT,
    WELL_KNOWN,
};
use crate::error::Error;
use crate::legacy::{LegacyUpdateMessage, MappingRecord, MappingType};
use crate::messages::{
    frame_length, ConnectionMode, ErrorCode, ErrorMessage, ErrorSubcode,
    LegacyErrorCode, Message, OpenMessage, Version, MAX_ERROR_DATA,
    MAX_MESSAGE_SIZE,
};
use crate::search::{expand_prefix, select_address, AddressRotation};
use crate::update::{compose_frames, compose_update};
use proptest::prelude::*;
use sdb::{Binding, NodeId, Prefix, Prefix4, Prefix6};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const LOCAL: NodeId = Ipv4Addr::new(192, 0, 2, 1);

// =============================================================================
// Prefix Strategies
// =============================================================================

fn ipv4_prefix_strategy() -> impl Strategy<Value = Prefix4> {
    (any::<u32>(), 0u8..=32u8).prop_map(|(addr_bits, length)| {
        Prefix4::new(Ipv4Addr::from(addr_bits), length)
    })
}

fn ipv6_prefix_strategy() -> impl Strategy<Value = Prefix6> {
    (any::<u128>(), 0u8..=128u8).prop_map(|(addr_bits, length)| {
        Prefix6::new(Ipv6Addr::from(addr_bits), length)
    })
}

fn prefix_strategy() -> impl Strategy<Value = Prefix> {
    prop_oneof![
        ipv4_prefix_strategy().prop_map(Prefix::V4),
        ipv6_prefix_strategy().prop_map(Prefix::V6),
    ]
}

fn node_id_strategy() -> impl Strategy<Value = NodeId> {
    any::<u32>().prop_map(Ipv4Addr::from)
}

fn sgt_strategy() -> impl Strategy<Value = u16> {
    (Sgt::MIN as u16)..=(Sgt::MAX as u16)
}

// =============================================================================
// Attribute Strategies
// =============================================================================

fn capabilities_strategy() -> impl Strategy<Value = Vec<CapabilityType>> {
    prop::collection::vec(
        prop_oneof![
            Just(CapabilityType::Ipv4Unicast),
            Just(CapabilityType::Ipv6Unicast),
            Just(CapabilityType::SubnetBindings),
        ],
        0..4,
    )
}

fn hold_time_strategy() -> impl Strategy<Value = HoldTime> {
    prop_oneof![
        (3u32..=u16::MAX as u32).prop_map(|min| HoldTime::new(min).unwrap()),
        (3u32..1000, 0u32..1000).prop_map(|(min, extra)| {
            HoldTime::with_max(min, min + extra).unwrap()
        }),
        Just(HoldTime { min: 0, max: 0 }),
    ]
}

fn known_value_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        node_id_strategy().prop_map(AttributeValue::SxpNodeId),
        capabilities_strategy().prop_map(AttributeValue::Capabilities),
        hold_time_strategy().prop_map(AttributeValue::HoldTime),
        prop::collection::vec(ipv4_prefix_strategy(), 0..80)
            .prop_map(AttributeValue::Ipv4AddPrefix),
        prop::collection::vec(ipv6_prefix_strategy(), 0..20)
            .prop_map(AttributeValue::Ipv6AddPrefix),
        prop::collection::vec(ipv4_prefix_strategy(), 0..5)
            .prop_map(AttributeValue::Ipv4DeletePrefix),
        prop::collection::vec(ipv6_prefix_strategy(), 0..5)
            .prop_map(AttributeValue::Ipv6DeletePrefix),
        prop::collection::vec(node_id_strategy(), 0..8)
            .prop_map(AttributeValue::PeerSequence),
        sgt_strategy().prop_map(|v| {
            AttributeValue::SourceGroupTag(Sgt::new(v.into()).unwrap())
        }),
    ]
}

/// Attributes that survive encoding unchanged. Unknown types that fit a
/// byte are compact, wider ones are not.
fn attribute_strategy() -> impl Strategy<Value = Attribute> {
    prop_oneof![
        (
            prop_oneof![Just(WELL_KNOWN), Just(OPTIONAL_COMPACT)],
            known_value_strategy()
        )
            .prop_map(|(flags, value)| Attribute::new(flags, value)),
        (20u32..=255, prop::collection::vec(any::<u8>(), 0..300)).prop_map(
            |(type_code, value)| {
                Attribute::new(
                    OPTIONAL_COMPACT,
                    AttributeValue::Unrecognized { type_code, value },
                )
            }
        ),
        (256u32..=0x00ff_ffff, prop::collection::vec(any::<u8>(), 0..40))
            .prop_map(|(type_code, value)| {
                Attribute::new(
                    attribute_flags::OPTIONAL,
                    AttributeValue::Unrecognized { type_code, value },
                )
            }),
    ]
}

// =============================================================================
// Binding Strategies
// =============================================================================

fn binding_strategy() -> impl Strategy<Value = Binding> {
    (
        prefix_strategy(),
        sgt_strategy(),
        prop::collection::vec(node_id_strategy(), 0..3),
    )
        .prop_map(|(prefix, sgt, peers)| {
            Binding::new(prefix, sgt).with_peer_sequence(peers)
        })
}

fn host_binding_strategy() -> impl Strategy<Value = Binding> {
    (any::<u32>(), sgt_strategy()).prop_map(|(bits, sgt)| {
        Binding::new(Prefix::V4(Prefix4::host(Ipv4Addr::from(bits))), sgt)
    })
}

fn binding_key(b: &Binding) -> (Prefix, u16, Vec<NodeId>) {
    (b.prefix, b.sgt, b.peer_sequence.clone())
}

/// What a peer learns from `b` when it is sent by `LOCAL`.
fn announced_key(b: &Binding) -> (Prefix, u16, Vec<NodeId>) {
    let mut peers = vec![LOCAL];
    peers.extend(&b.peer_sequence);
    (b.prefix, b.sgt, peers)
}

/// Whether `host` falls inside `prefix`.
fn covers(prefix: &Prefix, host: &Prefix) -> bool {
    match (prefix, host) {
        (Prefix::V4(p), Prefix::V4(h)) => Prefix4::new(h.value, p.length) == *p,
        (Prefix::V6(p), Prefix::V6(h)) => Prefix6::new(h.value, p.length) == *p,
        _ => false,
    }
}

proptest! {
    /// Property: attribute lists decode to what was encoded
    #[test]
    fn prop_attribute_list_round_trip(
        attrs in prop::collection::vec(attribute_strategy(), 0..6)
    ) {
        let list = AttributeList::from(attrs);
        let wire = list.to_wire().expect("encode");
        let decoded = AttributeList::from_wire(&wire).expect("decode");
        prop_assert_eq!(decoded, list);
    }

    /// Property: the extended length bit is set exactly when a compact value
    /// does not fit a one byte length
    #[test]
    fn prop_extended_length_only_when_needed(attr in attribute_strategy()) {
        let wire = attr.to_wire().expect("encode");
        let len = attr.value.to_wire().len();
        let extended = wire[0] & attribute_flags::EXTENDED_LENGTH != 0;
        match attr.variant() {
            AttributeVariant::Compact => {
                prop_assert!(!extended);
                prop_assert_eq!(wire.len(), 3 + len);
            }
            AttributeVariant::CompactExtendedLength => {
                prop_assert!(extended);
                prop_assert!(len > 255);
                prop_assert_eq!(wire.len(), 4 + len);
            }
            AttributeVariant::NonCompact => {
                prop_assert!(!extended);
                prop_assert_eq!(wire.len(), 8 + len);
            }
        }
    }

    /// Property: Open messages of every version and mode round trip through
    /// a frame
    #[test]
    fn prop_open_round_trip(
        version in prop_oneof![
            Just(Version::V1),
            Just(Version::V2),
            Just(Version::V3),
            Just(Version::V4),
        ],
        mode in prop_oneof![
            Just(ConnectionMode::Speaker),
            Just(ConnectionMode::Listener),
            Just(ConnectionMode::Both),
        ],
        node_id in node_id_strategy(),
        hold_time in prop::option::of(hold_time_strategy()),
        resp in any::<bool>(),
    ) {
        let open = OpenMessage::new(version, mode, node_id, hold_time);
        let msg = if resp {
            Message::OpenResp(open.clone())
        } else {
            Message::Open(open.clone())
        };
        let frame = msg.to_frame().expect("frame");
        // The payload version wins over the one the caller assumes.
        let parsed = Message::parse(Version::V1, &frame).expect("parse");
        prop_assert_eq!(parsed, msg);

        if !version.is_legacy() && mode.is_speaker() {
            prop_assert_eq!(open.node_id(), Some(node_id));
        }
        if version.is_legacy() {
            prop_assert_eq!(
                open.capabilities().expect("capabilities"),
                CapabilityType::for_version(version)
            );
        }
    }

    /// Property: error messages round trip in both forms
    #[test]
    fn prop_error_round_trip(
        code in prop_oneof![
            Just(ErrorCode::MessageHeaderError),
            Just(ErrorCode::OpenMessageError),
            Just(ErrorCode::UpdateMessageError),
        ],
        subcode in 0u8..=10,
        data in prop::collection::vec(any::<u8>(), 0..=MAX_ERROR_DATA),
        legacy_code in prop_oneof![
            Just(LegacyErrorCode::VersionMismatch),
            Just(LegacyErrorCode::MessageParseError),
        ],
    ) {
        let subcode = ErrorSubcode::try_from(subcode).expect("subcode");
        let extended = Message::Error(
            ErrorMessage::extended(code, subcode, &data).expect("extended"),
        );
        let frame = extended.to_frame().expect("frame");
        prop_assert_eq!(Message::parse(Version::V4, &frame).expect("parse"), extended);

        let legacy = Message::Error(ErrorMessage::legacy(legacy_code, &data));
        let frame = legacy.to_frame().expect("frame");
        prop_assert_eq!(Message::parse(Version::V2, &frame).expect("parse"), legacy);
    }

    /// Property: legacy mapping records round trip. Only version 3 carries
    /// prefix lengths, earlier versions are limited to hosts.
    #[test]
    fn prop_legacy_update_round_trip(
        v3 in any::<bool>(),
        records in prop::collection::vec(
            (prefix_strategy(), any::<bool>(), sgt_strategy()), 0..20
        ),
    ) {
        let version = if v3 { Version::V3 } else { Version::V2 };
        let records: Vec<MappingRecord> = records
            .into_iter()
            .map(|(prefix, add, sgt)| {
                let prefix = if v3 {
                    prefix
                } else {
                    Prefix::new(prefix.addr(), if prefix.is_v4() { 32 } else { 128 })
                };
                let typ = match (add, prefix.is_v4()) {
                    (true, true) => MappingType::AddIpv4,
                    (true, false) => MappingType::AddIpv6,
                    (false, true) => MappingType::DelIpv4,
                    (false, false) => MappingType::DelIpv6,
                };
                let sgt = add.then(|| Sgt::new(sgt.into()).unwrap());
                MappingRecord { typ, prefix, sgt }
            })
            .collect();
        let msg = LegacyUpdateMessage { version, records };
        let wire = msg.to_wire().expect("encode");
        let decoded = LegacyUpdateMessage::from_wire(version, &wire).expect("decode");
        prop_assert_eq!(decoded, msg);
    }

    /// Property: bindings announced in an update are learned with the sender
    /// prepended to their peer sequence, and withdrawals are kept
    #[test]
    fn prop_update_bindings_round_trip(
        add in prop::collection::vec(binding_strategy(), 0..30),
        delete in prop::collection::vec(binding_strategy(), 0..10),
    ) {
        let mut add = add;
        add.sort_by(|a, b| (&a.peer_sequence, a.sgt).cmp(&(&b.peer_sequence, b.sgt)));
        let caps = CapabilityType::for_version(Version::V4);
        let update = compose_update(&delete, &add, LOCAL, &caps, &|_: &Binding| false)
            .expect("compose");
        let frame = Message::Update(update).to_frame().expect("frame");
        let Message::Update(parsed) = Message::parse(Version::V4, &frame).expect("parse") else {
            panic!("not an update");
        };
        let learned = parsed.bindings(chrono::Utc::now()).expect("bindings");

        let got: BTreeSet<_> = learned.add.iter().map(binding_key).collect();
        let want: BTreeSet<_> = add.iter().map(announced_key).collect();
        prop_assert_eq!(got, want);

        let got: BTreeSet<Prefix> = learned.delete.into_iter().collect();
        let want: BTreeSet<Prefix> = delete.iter().map(|b| b.prefix).collect();
        prop_assert_eq!(got, want);
    }

    /// Property: large batches are split into frames that each fit the
    /// message size limit and together carry every binding
    #[test]
    fn prop_frames_within_limit(
        add in prop::collection::vec(host_binding_strategy(), 0..1500),
    ) {
        let caps = CapabilityType::for_version(Version::V4);
        let compose = |d: &[Binding], a: &[Binding]| -> Result<Message, Error> {
            Ok(Message::Update(compose_update(d, a, LOCAL, &caps, &|_: &Binding| false)?))
        };
        let frames = compose_frames(&[], &add, &compose).expect("frames");

        let mut got = BTreeSet::new();
        for f in &frames {
            prop_assert!(f.len() <= MAX_MESSAGE_SIZE);
            prop_assert_eq!(frame_length(f).expect("length"), Some(f.len()));
            let Message::Update(m) = Message::parse(Version::V4, f).expect("parse") else {
                panic!("not an update");
            };
            for b in m.bindings(chrono::Utc::now()).expect("bindings").add {
                got.insert(binding_key(&b));
            }
        }
        let want: BTreeSet<_> = add.iter().map(announced_key).collect();
        prop_assert_eq!(got, want);
    }

    /// Property: decoding arbitrary bytes never panics
    #[test]
    fn prop_parse_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..64),
        typ in 1u8..=6,
        legacy in any::<bool>(),
    ) {
        let version = if legacy { Version::V2 } else { Version::V4 };
        let _ = Message::parse(version, &bytes);
        let _ = frame_length(&bytes);

        // Same bytes behind a well formed header.
        let mut frame = ((bytes.len() + 8) as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&[0, 0, 0, typ]);
        frame.extend_from_slice(&bytes);
        let _ = Message::parse(version, &frame);
    }

    /// Property: expansion yields distinct hosts inside the prefix, no more
    /// than asked for or than the prefix holds
    #[test]
    fn prop_expansion_bounded(prefix in prefix_strategy(), limit in 0usize..64) {
        let hosts: Vec<Prefix> = expand_prefix(prefix, limit).collect();
        let capacity = 1u128.checked_shl(prefix.host_bits()).unwrap_or(u128::MAX);
        prop_assert_eq!(hosts.len() as u128, capacity.min(limit as u128));
        let unique: BTreeSet<Prefix> = hosts.iter().copied().collect();
        prop_assert_eq!(unique.len(), hosts.len());
        for h in &hosts {
            prop_assert!(h.is_host());
            prop_assert!(covers(&prefix, h));
        }
    }

    /// Property: rotation hands out every address once before repeating
    #[test]
    fn prop_rotation_covers_all(
        addrs in prop::collection::btree_set(any::<u32>(), 1..10)
    ) {
        let addrs: Vec<IpAddr> =
            addrs.into_iter().map(|a| IpAddr::V4(Ipv4Addr::from(a))).collect();
        let rotation = AddressRotation::new();
        let picked: Vec<IpAddr> = (0..addrs.len())
            .map(|_| select_address(&addrs, &rotation).expect("select"))
            .collect();
        let unique: BTreeSet<IpAddr> = picked.iter().copied().collect();
        prop_assert_eq!(unique.len(), addrs.len());
        prop_assert_eq!(
            select_address(&addrs, &rotation).expect("select"),
            picked[0]
        );
    }
}
