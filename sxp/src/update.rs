// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping between bindings and version 4 update messages.
//!
//! An update lists withdrawn prefixes first, one attribute per address
//! family. Added bindings follow in runs that share a peer sequence and a
//! tag. Each run is announced as a PeerSequence attribute, a SourceGroupTag
//! attribute, and then the prefixes of the run grouped by family.

use crate::attributes::{
    Attribute, AttributeList, AttributeValue, CapabilityType, Sgt,
    OPTIONAL_COMPACT, WELL_KNOWN,
};
use crate::error::Error;
use crate::messages::{Message, UpdateMessage};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sdb::{Binding, NodeId, Prefix, Prefix4, Prefix6};

/// Decides which bindings are held back from a peer. Returning `true` skips
/// the binding.
pub trait BindingFilter {
    fn apply(&self, binding: &Binding) -> bool;
}

impl<F> BindingFilter for F
where
    F: Fn(&Binding) -> bool,
{
    fn apply(&self, binding: &Binding) -> bool {
        self(binding)
    }
}

/// The effect of an update on the receiving node's database.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct UpdateBindings {
    pub add: Vec<Binding>,
    pub delete: Vec<Prefix>,
}

impl UpdateBindings {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty()
    }
}

fn split_families<I>(prefixes: I) -> (Vec<Prefix4>, Vec<Prefix6>)
where
    I: IntoIterator<Item = Prefix>,
{
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for p in prefixes {
        match p {
            Prefix::V4(p) => v4.push(p),
            Prefix::V6(p) => v6.push(p),
        }
    }
    (v4, v6)
}

/// Build the update announcing `add` and withdrawing `delete` to a peer that
/// declared `capabilities`. `node_id` is prepended to every announced peer
/// sequence.
pub fn compose_update<F: BindingFilter>(
    delete: &[Binding],
    add: &[Binding],
    node_id: NodeId,
    capabilities: &[CapabilityType],
    filter: &F,
) -> Result<UpdateMessage, Error> {
    let mut attributes = AttributeList::new();

    let (del4, del6) = split_families(delete.iter().map(|b| b.prefix));
    if !del4.is_empty() {
        attributes.push(Attribute::new(
            WELL_KNOWN,
            AttributeValue::Ipv4DeletePrefix(del4),
        ));
    }
    if !del6.is_empty() {
        attributes.push(Attribute::new(
            WELL_KNOWN,
            AttributeValue::Ipv6DeletePrefix(del6),
        ));
    }

    let flags = |cap| {
        if capabilities.contains(&cap) {
            WELL_KNOWN
        } else {
            OPTIONAL_COMPACT
        }
    };
    let flags4 = flags(CapabilityType::Ipv4Unicast);
    let flags6 = flags(CapabilityType::Ipv6Unicast);

    let runs = add
        .iter()
        .filter(|b| !filter.apply(b))
        .chunk_by(|b| (b.peer_sequence.clone(), b.sgt));

    for ((peer_sequence, sgt), run) in &runs {
        let mut sequence = Vec::with_capacity(peer_sequence.len() + 1);
        sequence.push(node_id);
        sequence.extend(peer_sequence);
        attributes.push(Attribute::peer_sequence(sequence));
        attributes.push(Attribute::source_group_tag(Sgt::new(sgt.into())?));

        let (add4, add6) = split_families(run.map(|b| b.prefix));
        if !add4.is_empty() {
            attributes
                .push(Attribute::new(flags4, AttributeValue::Ipv4AddPrefix(add4)));
        }
        if !add6.is_empty() {
            attributes
                .push(Attribute::new(flags6, AttributeValue::Ipv6AddPrefix(add6)));
        }
    }

    Ok(UpdateMessage { attributes })
}

impl UpdateMessage {
    /// Recover the bindings an update announces, stamped with `timestamp`,
    /// and the prefixes it withdraws.
    pub fn bindings(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<UpdateBindings, Error> {
        let mut result = UpdateBindings::default();
        let mut peer_sequence: Option<&Vec<NodeId>> = None;
        let mut sgt: Option<Sgt> = None;

        let mut announce = |prefixes: Vec<Prefix>,
                            peer_sequence: Option<&Vec<NodeId>>,
                            sgt: Option<Sgt>|
         -> Result<(), Error> {
            let peer_sequence = peer_sequence.ok_or_else(|| {
                Error::AttributeNotFound("peer sequence".into())
            })?;
            let sgt = sgt.ok_or_else(|| {
                Error::AttributeNotFound("source group tag".into())
            })?;
            result.add.extend(prefixes.into_iter().map(|p| {
                Binding::new(p, sgt.value())
                    .with_peer_sequence(peer_sequence.clone())
                    .with_timestamp(timestamp)
            }));
            Ok(())
        };

        let mut delete = Vec::new();
        for a in &self.attributes {
            match &a.value {
                AttributeValue::Ipv4DeletePrefix(v) => {
                    delete.extend(v.iter().map(|p| Prefix::V4(*p)))
                }
                AttributeValue::Ipv6DeletePrefix(v) => {
                    delete.extend(v.iter().map(|p| Prefix::V6(*p)))
                }
                AttributeValue::PeerSequence(v) => peer_sequence = Some(v),
                AttributeValue::SourceGroupTag(v) => sgt = Some(*v),
                AttributeValue::Ipv4AddPrefix(v) => announce(
                    v.iter().map(|p| Prefix::V4(*p)).collect(),
                    peer_sequence,
                    sgt,
                )?,
                AttributeValue::Ipv6AddPrefix(v) => announce(
                    v.iter().map(|p| Prefix::V6(*p)).collect(),
                    peer_sequence,
                    sgt,
                )?,
                _ => {}
            }
        }
        result.delete = delete;
        Ok(result)
    }
}

/// Encode `delete` and `add` into as many frames as it takes to keep each
/// within the message size limit. Oversized batches are halved until they
/// fit.
pub fn compose_frames<C>(
    delete: &[Binding],
    add: &[Binding],
    compose: &C,
) -> Result<Vec<Vec<u8>>, Error>
where
    C: Fn(&[Binding], &[Binding]) -> Result<Message, Error>,
{
    if delete.is_empty() && add.is_empty() {
        return Ok(Vec::new());
    }
    match compose(delete, add)?.to_frame() {
        Ok(frame) => return Ok(vec![frame]),
        Err(Error::TooLarge(_)) if delete.len() + add.len() > 1 => {}
        Err(e) => return Err(e),
    }

    let mut frames = Vec::new();
    if !delete.is_empty() && !add.is_empty() {
        frames.extend(compose_frames(delete, &[], compose)?);
        frames.extend(compose_frames(&[], add, compose)?);
    } else if delete.len() > 1 {
        let (l, r) = delete.split_at(delete.len() / 2);
        frames.extend(compose_frames(l, &[], compose)?);
        frames.extend(compose_frames(r, &[], compose)?);
    } else {
        let (l, r) = add.split_at(add.len() / 2);
        frames.extend(compose_frames(&[], l, compose)?);
        frames.extend(compose_frames(&[], r, compose)?);
    }
    Ok(frames)
}
