// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for prefixes and binding conflict resolution.

#[cfg(test)]
mod proptest {
    use crate::bestpath::{filter_incoming_bindings, supersedes};
    use crate::types::{Binding, Prefix, Prefix4, Prefix6};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::net::{Ipv4Addr, Ipv6Addr};

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

    // A small prefix space so batches contain plenty of conflicts.
    fn binding_strategy() -> impl Strategy<Value = Binding> {
        (0u8..4, 0u8..=32, 2u16..100, 0usize..4, 0i64..50).prop_map(
            |(host, length, sgt, hops, secs)| {
                let prefix = Prefix::V4(Prefix4::new(
                    Ipv4Addr::new(10, 0, 0, host),
                    if length < 30 { 0 } else { length },
                ));
                Binding::new(prefix, sgt)
                    .with_peer_sequence(
                        (0..hops).map(|i| Ipv4Addr::new(1, 1, 1, i as u8)).collect(),
                    )
                    .with_timestamp(
                        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                            + Duration::seconds(secs),
                    )
            },
        )
    }

    proptest! {
        /// Property: host bits are always unset after construction
        #[test]
        fn prop_host_bits_always_unset(
            p4 in ipv4_prefix_strategy(),
            p6 in ipv6_prefix_strategy(),
        ) {
            prop_assert!(p4.host_bits_are_unset());
            prop_assert!(p6.host_bits_are_unset());
        }

        /// Property: Display and FromStr round trip
        #[test]
        fn prop_display_parse_round_trip(p4 in ipv4_prefix_strategy()) {
            let parsed: Prefix4 = p4.to_string().parse().unwrap();
            prop_assert_eq!(p4, parsed);
        }

        /// Property: no default route ever survives resolution, and every
        /// surviving binding is at least as good as all candidates for its
        /// prefix.
        #[test]
        fn prop_winners_dominate_batch(
            batch in prop::collection::vec(binding_strategy(), 0..32)
        ) {
            let winners = filter_incoming_bindings(&batch, |_| None, |_| {});
            for (prefix, winner) in &winners {
                prop_assert!(!prefix.is_default());
                for candidate in batch.iter().filter(|b| b.prefix == *prefix) {
                    prop_assert!(!supersedes(candidate, Some(winner)));
                }
            }
            let expected: usize = batch
                .iter()
                .filter(|b| !b.prefix.is_default())
                .map(|b| b.prefix)
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            prop_assert_eq!(winners.len(), expected);
        }

        /// Property: resolving a batch in one go is the same as resolving it
        /// item by item against a store that is updated after every item.
        #[test]
        fn prop_batch_equals_sequential(
            batch in prop::collection::vec(binding_strategy(), 0..32)
        ) {
            let batched = filter_incoming_bindings(&batch, |_| None, |_| {});

            let mut store: BTreeMap<Prefix, Binding> = BTreeMap::new();
            for b in &batch {
                let won = filter_incoming_bindings(
                    std::iter::once(b),
                    |p| store.get(p).cloned(),
                    |_| {},
                );
                store.extend(won);
            }
            prop_assert_eq!(batched, store);
        }
    }
}
