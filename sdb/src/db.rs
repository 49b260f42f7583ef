// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The master binding database (sdb).
//!
//! The master database holds one authoritative binding per prefix. Bindings
//! arrive in batches from peers and from local policy; each batch is resolved
//! against the stored bindings and committed under a single write lock, so
//! readers observe either the state before or after a batch and never a
//! partially applied one. When a persistence accessor is attached, a batch is
//! written to it before the in-memory table changes.
use crate::access::MasterDatabaseAccess;
use crate::bestpath::filter_incoming_bindings;
use crate::error::Error;
use crate::log::sdb_log;
use crate::types::*;
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};
use sxp_common::{read_lock, write_lock};

/// Most removed bindings kept for [`MasterDatabase::take_removed`]. Older
/// entries are dropped first.
pub const REMOVED_LOG_MAX: usize = 1024;

#[derive(Default)]
struct Table {
    /// The winning binding for each prefix.
    bindings: BTreeMap<Prefix, Binding>,

    /// Bindings that lost their place since the last call to
    /// [`MasterDatabase::take_removed`], newest last.
    removed: VecDeque<Binding>,
}

impl Table {
    fn record_removed(&mut self, removed: impl IntoIterator<Item = Binding>) {
        self.removed.extend(removed);
        let excess = self.removed.len().saturating_sub(REMOVED_LOG_MAX);
        self.removed.drain(..excess);
    }
}

#[derive(Clone)]
pub struct MasterDatabase {
    table: Arc<RwLock<Table>>,

    /// Optional external store that mirrors the table.
    access: Option<Arc<dyn MasterDatabaseAccess>>,

    /// A generation number bumped on every committed change.
    generation: Arc<AtomicU64>,

    /// A set of watchers that are notified when bindings change.
    watchers: Arc<RwLock<Vec<Watcher>>>,

    log: Logger,
}

#[derive(Clone)]
struct Watcher {
    tag: String,
    sender: Sender<PrefixChangeNotification>,
}

impl MasterDatabase {
    /// Create an empty, memory only database.
    pub fn new(log: Logger) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
            access: None,
            generation: Arc::new(AtomicU64::new(0)),
            watchers: Arc::new(RwLock::new(Vec::new())),
            log,
        }
    }

    /// Create a database mirrored to `access`, loading whatever the store
    /// already holds.
    pub fn with_access(
        access: Arc<dyn MasterDatabaseAccess>,
        log: Logger,
    ) -> Result<Self, Error> {
        let stored = access.read()?;
        let mut db = Self::new(log);
        {
            let mut table = write_lock!(db.table);
            for b in stored {
                table.bindings.insert(b.prefix, b);
            }
            sdb_log!(db, info, "loaded {} bindings", table.bindings.len());
        }
        db.access = Some(access);
        Ok(db)
    }

    /// Register a binding database watcher.
    pub fn watch(&self, tag: String, sender: Sender<PrefixChangeNotification>) {
        write_lock!(self.watchers).push(Watcher { tag, sender });
    }

    fn notify(&self, n: PrefixChangeNotification) {
        if n.changed.is_empty() {
            return;
        }
        for Watcher { tag, sender } in read_lock!(self.watchers).iter() {
            if let Err(e) = sender.send(n.clone()) {
                sdb_log!(self, error,
                    "failed to send notification to watcher '{tag}': {e}";
                    "error" => format!("{e}")
                );
            }
        }
    }

    /// Resolve a batch of candidate bindings and commit the winners. Returns
    /// the bindings that became authoritative.
    pub fn add_bindings(
        &self,
        bindings: &[Binding],
    ) -> Result<Vec<Binding>, Error> {
        let mut table = write_lock!(self.table);

        let mut stale = BTreeSet::new();
        let winners = filter_incoming_bindings(
            bindings,
            |p| table.bindings.get(p).cloned(),
            |p| {
                stale.insert(*p);
            },
        );
        if winners.is_empty() {
            return Ok(Vec::new());
        }

        let replaced: Vec<Binding> = stale
            .iter()
            .filter_map(|p| table.bindings.get(p).cloned())
            .collect();
        let added: Vec<Binding> = winners.values().cloned().collect();

        if let Some(access) = &self.access {
            access.commit(&replaced, &added)?;
        }

        for p in &stale {
            table.bindings.remove(p);
        }
        table.record_removed(replaced);
        table.bindings.extend(winners);
        drop(table);

        self.generation.fetch_add(1, Ordering::SeqCst);
        sdb_log!(self, debug, "committed {} of {} bindings",
            added.len(), bindings.len();
            "generation" => self.generation()
        );
        self.notify(added.iter().map(|b| b.prefix).collect());
        Ok(added)
    }

    /// Remove the bindings for `prefixes`. Returns what was removed.
    pub fn delete_bindings(
        &self,
        prefixes: &[Prefix],
    ) -> Result<Vec<Binding>, Error> {
        self.delete_where(prefixes, |_| true)
    }

    /// Remove the bindings for `prefixes` that were learned from `peer`.
    /// Bindings for those prefixes held from other sources are kept.
    pub fn delete_bindings_from(
        &self,
        peer: NodeId,
        prefixes: &[Prefix],
    ) -> Result<Vec<Binding>, Error> {
        self.delete_where(prefixes, |b| b.learned_from() == Some(peer))
    }

    /// Remove every binding learned from `peer`.
    pub fn purge_peer(&self, peer: NodeId) -> Result<Vec<Binding>, Error> {
        let prefixes: Vec<Prefix> = read_lock!(self.table)
            .bindings
            .values()
            .filter(|b| b.learned_from() == Some(peer))
            .map(|b| b.prefix)
            .collect();
        let removed = self.delete_bindings_from(peer, &prefixes)?;
        sdb_log!(self, info, "purged {} bindings", removed.len();
            "peer" => peer.to_string()
        );
        Ok(removed)
    }

    fn delete_where<F>(
        &self,
        prefixes: &[Prefix],
        pred: F,
    ) -> Result<Vec<Binding>, Error>
    where
        F: Fn(&Binding) -> bool,
    {
        let mut table = write_lock!(self.table);
        let doomed: Vec<Binding> = prefixes
            .iter()
            .filter_map(|p| table.bindings.get(p))
            .filter(|b| pred(b))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        if let Some(access) = &self.access {
            access.delete(&doomed)?;
        }

        for b in &doomed {
            table.bindings.remove(&b.prefix);
        }
        table.record_removed(doomed.iter().cloned());
        drop(table);

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify(doomed.iter().map(|b| b.prefix).collect());
        Ok(doomed)
    }

    pub fn get(&self, prefix: &Prefix) -> Option<Binding> {
        read_lock!(self.table).bindings.get(prefix).cloned()
    }

    /// A snapshot of all authoritative bindings ordered by prefix.
    pub fn get_bindings(&self) -> Vec<Binding> {
        read_lock!(self.table).bindings.values().cloned().collect()
    }

    /// Drain the bindings displaced or deleted since the last call, at most
    /// the latest [`REMOVED_LOG_MAX`] of them.
    pub fn take_removed(&self) -> Vec<Binding> {
        write_lock!(self.table).removed.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        read_lock!(self.table).bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
