// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::{Binding, Prefix};

/// Decide whether `candidate` replaces `current` as the authoritative binding
/// for a prefix.
///
/// - no current holder: the candidate wins.
/// - a shorter peer sequence wins, regardless of timestamps.
/// - on equal peer sequence length, the strictly later timestamp wins.
pub fn supersedes(candidate: &Binding, current: Option<&Binding>) -> bool {
    let Some(current) = current else {
        return true;
    };
    match candidate.path_length().cmp(&current.path_length()) {
        Ordering::Less => true,
        Ordering::Equal => candidate.timestamp > current.timestamp,
        Ordering::Greater => false,
    }
}

/// Resolve a batch of candidate bindings against the currently stored ones.
///
/// Candidates are evaluated in order. The holder a candidate competes with is
/// taken from the winners collected so far in this batch, falling back to
/// `get` for the stored binding. Default routes are skipped. Every time a
/// candidate wins, `remove` is called with its prefix so the caller can drop
/// the stored binding before committing the returned winners.
pub fn filter_incoming_bindings<'a, I, G, R>(
    bindings: I,
    get: G,
    mut remove: R,
) -> BTreeMap<Prefix, Binding>
where
    I: IntoIterator<Item = &'a Binding>,
    G: Fn(&Prefix) -> Option<Binding>,
    R: FnMut(&Prefix),
{
    let mut winners: BTreeMap<Prefix, Binding> = BTreeMap::new();
    for candidate in bindings {
        let b = candidate.normalized();
        if b.prefix.is_default() {
            continue;
        }
        let current = match winners.get(&b.prefix) {
            Some(held) => Some(held.clone()),
            None => get(&b.prefix),
        };
        if !supersedes(&b, current.as_ref()) {
            continue;
        }
        remove(&b.prefix);
        winners.insert(b.prefix, b);
    }
    winners
}
