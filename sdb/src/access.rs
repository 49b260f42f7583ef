// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence for the master database.
//!
//! The master database can be backed by an external store through the
//! [`MasterDatabaseAccess`] trait. Every operation fails with
//! [`Error::DataStore`] when the store cannot be reached. [`SledAccess`] keeps
//! bindings in a sled tree keyed by prefix with JSON encoded values.

use crate::error::Error;
use crate::log::sdb_log;
use crate::types::{Binding, Prefix};
use slog::Logger;

/// The handle used to open the persistent key-value tree holding bindings.
const MASTER_DATABASE: &str = "master_database";

pub trait MasterDatabaseAccess: Send + Sync {
    /// Replace the stored content with `bindings`.
    fn put(&self, bindings: &[Binding]) -> Result<(), Error>;

    /// Remove the stored bindings for the prefixes of `delete`, then insert
    /// `merge`, as one atomic write. On error the store is unchanged.
    fn commit(
        &self,
        delete: &[Binding],
        merge: &[Binding],
    ) -> Result<(), Error>;

    /// Insert `bindings`, overwriting stored bindings for the same prefixes.
    fn merge(&self, bindings: &[Binding]) -> Result<(), Error> {
        self.commit(&[], bindings)
    }

    /// Remove the stored bindings for the prefixes of `bindings`.
    fn delete(&self, bindings: &[Binding]) -> Result<(), Error> {
        self.commit(bindings, &[])
    }

    /// Read back everything that is stored.
    fn read(&self) -> Result<Vec<Binding>, Error>;
}

#[derive(Clone)]
pub struct SledAccess {
    persistent: sled::Db,
    log: Logger,
}

impl SledAccess {
    pub fn new(path: &str, log: Logger) -> Result<Self, Error> {
        Ok(Self {
            persistent: sled::open(path)?,
            log,
        })
    }

    fn batch(
        delete: &[Binding],
        merge: &[Binding],
    ) -> Result<sled::Batch, Error> {
        let mut batch = sled::Batch::default();
        for b in delete {
            batch.remove(b.prefix.db_key());
        }
        for b in merge {
            let value = serde_json::to_string(b)?;
            batch.insert(b.prefix.db_key(), value.as_bytes());
        }
        Ok(batch)
    }
}

impl MasterDatabaseAccess for SledAccess {
    fn put(&self, bindings: &[Binding]) -> Result<(), Error> {
        let tree = self.persistent.open_tree(MASTER_DATABASE)?;
        let batch = Self::batch(&[], bindings)?;
        tree.clear()?;
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn commit(
        &self,
        delete: &[Binding],
        merge: &[Binding],
    ) -> Result<(), Error> {
        let tree = self.persistent.open_tree(MASTER_DATABASE)?;
        tree.apply_batch(Self::batch(delete, merge)?)?;
        tree.flush()?;
        Ok(())
    }

    fn read(&self) -> Result<Vec<Binding>, Error> {
        let tree = self.persistent.open_tree(MASTER_DATABASE)?;
        let result = tree
            .iter()
            .filter_map(|item| {
                let (key, value) = match item {
                    Ok(item) => item,
                    Err(e) => {
                        sdb_log!(self, error,
                            "error fetching binding entry: {e}";
                            "error" => format!("{e}")
                        );
                        return None;
                    }
                };
                let value = String::from_utf8_lossy(&value);
                let value: Binding = match serde_json::from_str(&value) {
                    Ok(item) => item,
                    Err(e) => {
                        sdb_log!(self, error,
                            "error parsing binding entry value: {e}";
                            "error" => format!("{e}")
                        );
                        return None;
                    }
                };
                match Prefix::from_db_key(&key) {
                    Ok(p) if p == value.prefix => Some(value),
                    Ok(p) => {
                        sdb_log!(self, error,
                            "binding key {p} does not match value {}",
                            value.prefix
                        );
                        None
                    }
                    Err(e) => {
                        sdb_log!(self, error,
                            "error parsing binding key: {e}";
                            "error" => format!("{e}")
                        );
                        None
                    }
                }
            })
            .collect();
        Ok(result)
    }
}
