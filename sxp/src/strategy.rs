// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Version dependent handling of connection events.
//!
//! Versions 1 through 3 share one set of message forms and differ only in
//! what their updates can carry. Version 4 adds attributes to Open, the
//! Keepalive message and attribute based updates.

use crate::attributes::CapabilityType;
use crate::connection::{Connection, ConnectionState, SxpChannel};
use crate::error::Error;
use crate::legacy::LegacyUpdateMessage;
use crate::log::connection_log;
use crate::messages::{decode_capabilities, Message, OpenMessage, Version};
use crate::update::{compose_frames, compose_update, UpdateBindings};
use chrono::Utc;
use sdb::{Binding, MasterDatabase, Prefix};
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Legacy(Version),
    Current,
}

impl Strategy {
    pub fn new(version: Version) -> Self {
        if version.is_legacy() {
            Strategy::Legacy(version)
        } else {
            Strategy::Current
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Strategy::Legacy(v) => *v,
            Strategy::Current => Version::V4,
        }
    }

    fn open<Ch: SxpChannel>(
        &self,
        conn: &Connection<Ch>,
    ) -> Result<OpenMessage, Error> {
        let hold_time = match self {
            Strategy::Legacy(_) => None,
            Strategy::Current => {
                Some(conn.config.hold_time_attribute(conn.mode)?)
            }
        };
        Ok(OpenMessage::new(
            self.version(),
            conn.mode,
            conn.local_node_id,
            hold_time,
        ))
    }

    /// The transport is up: open the session.
    pub fn on_channel_activation<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
    ) -> Result<(), Error> {
        conn.send(&Message::Open(self.open(conn)?))?;
        conn.set_state(ConnectionState::PendingOn);
        Ok(())
    }

    /// The transport went away. A listener forgets what it learned from the
    /// peer.
    pub fn on_channel_inactivation<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
        db: &MasterDatabase,
    ) -> Result<(), Error> {
        let was_on = conn.state == ConnectionState::On;
        conn.export.clear();
        conn.set_state(ConnectionState::Off);
        if was_on && conn.mode.is_listener() {
            let removed = db.purge_peer(conn.remote_id())?;
            connection_log!(conn, info, "purged {} bindings", removed.len());
        }
        Ok(())
    }

    /// Report `err` to the peer if the protocol has a way to say it, then
    /// shut the connection down.
    pub fn on_exception<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
        err: &Error,
    ) {
        connection_log!(conn, warn, "closing connection: {err}";
            "error" => format!("{err}")
        );
        if let Some(m) = err.to_error_message(self.version()) {
            if let Err(e) = conn.send(&Message::Error(m)) {
                connection_log!(conn, error, "failed to send error: {e}";
                    "error" => format!("{e}")
                );
            }
        }
        conn.set_state(ConnectionState::Off);
        conn.channel.close();
    }

    /// Decode a frame with this strategy's version.
    pub fn on_parse_input(&self, frame: &[u8]) -> Result<Message, Error> {
        Message::parse(self.version(), frame)
    }

    pub fn on_input_message<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
        db: &MasterDatabase,
        msg: Message,
    ) -> Result<(), Error> {
        connection_log!(conn, debug, "recv {msg}");
        match msg {
            Message::Open(open) => {
                self.accept_open(conn, &open)?;
                let strategy = conn.strategy();
                conn.send(&Message::OpenResp(strategy.open(conn)?))?;
                conn.set_state(ConnectionState::On);
                if conn.mode.is_speaker() {
                    strategy.on_update_message(conn, db)?;
                }
                Ok(())
            }
            Message::OpenResp(open) => {
                self.accept_open(conn, &open)?;
                conn.set_state(ConnectionState::On);
                if conn.mode.is_speaker() {
                    conn.strategy().on_update_message(conn, db)?;
                }
                Ok(())
            }
            Message::Update(_) | Message::LegacyUpdate(_) => {
                if conn.state != ConnectionState::On
                    || !conn.mode.is_listener()
                {
                    return Err(Error::UpdateMessageConnectionState(
                        conn.state,
                    ));
                }
                let now = Utc::now();
                let update = match msg {
                    Message::Update(m) => m.bindings(now)?,
                    Message::LegacyUpdate(m) => {
                        m.bindings(conn.remote_id(), now)
                    }
                    _ => UpdateBindings::default(),
                };
                self.apply_update(conn, db, update)
            }
            Message::Error(m) => Err(Error::ErrorMessageReceived(m)),
            Message::PurgeAll => {
                if conn.mode.is_listener() {
                    let removed = db.purge_peer(conn.remote_id())?;
                    connection_log!(conn, info,
                        "peer purged {} bindings", removed.len()
                    );
                }
                Ok(())
            }
            Message::Keepalive => {
                conn.last_keepalive = Some(Utc::now());
                Ok(())
            }
        }
    }

    /// Validate an Open or OpenResp and record what the peer told us.
    fn accept_open<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
        open: &OpenMessage,
    ) -> Result<(), Error> {
        if !conn.mode.complements(open.mode) {
            return Err(Error::ModeMismatch {
                local: conn.mode,
                remote: open.mode,
            });
        }

        let version = conn.version.min(open.version);
        if version != conn.version {
            connection_log!(conn, info, "peer runs version {}", open.version);
        }
        conn.version = version;

        conn.capabilities = if version.is_legacy() {
            CapabilityType::for_version(version)
        } else {
            match decode_capabilities(open) {
                Ok(caps) => caps,
                Err(_) if !open.mode.is_listener() => Vec::new(),
                Err(e) => return Err(e),
            }
        };

        conn.remote_node_id = match open.node_id() {
            Some(id) => Some(id),
            None => match conn.channel.peer().ip() {
                IpAddr::V4(a) => Some(a),
                IpAddr::V6(_) => None,
            },
        };

        if !version.is_legacy() {
            conn.negotiate_hold_time(open.hold_time())?;
        }
        Ok(())
    }

    fn apply_update<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
        db: &MasterDatabase,
        mut update: UpdateBindings,
    ) -> Result<(), Error> {
        let local = conn.local_node_id;
        let before = update.add.len();
        update.add.retain(|b| !b.peer_sequence.contains(&local));
        if update.add.len() != before {
            connection_log!(conn, debug, "dropped {} looped bindings",
                before - update.add.len()
            );
        }

        if !update.delete.is_empty() {
            db.delete_bindings_from(conn.remote_id(), &update.delete)?;
        }
        if !update.add.is_empty() {
            let added = db.add_bindings(&update.add)?;
            connection_log!(conn, debug, "learned {} of {} bindings",
                added.len(), update.add.len()
            );
        }
        Ok(())
    }

    /// Bring the peer up to date with the database. Whatever changed since
    /// the last call is sent, split over as many frames as needed. Returns
    /// the number of frames sent.
    pub fn on_update_message<Ch: SxpChannel>(
        &self,
        conn: &mut Connection<Ch>,
        db: &MasterDatabase,
    ) -> Result<usize, Error> {
        if conn.state != ConnectionState::On || !conn.mode.is_speaker() {
            return Ok(0);
        }

        let remote = conn.remote_id();
        let filter = move |b: &Binding| b.peer_sequence.contains(&remote);

        let next: BTreeMap<Prefix, Binding> = db
            .get_bindings()
            .into_iter()
            .filter(|b| !filter(b))
            .map(|b| (b.prefix, b))
            .collect();
        let delete: Vec<Binding> = conn
            .export
            .values()
            .filter(|b| !next.contains_key(&b.prefix))
            .cloned()
            .collect();
        let mut add: Vec<Binding> = next
            .values()
            .filter(|b| conn.export.get(&b.prefix) != Some(*b))
            .cloned()
            .collect();
        add.sort_by(|a, b| {
            (&a.peer_sequence, a.sgt).cmp(&(&b.peer_sequence, b.sgt))
        });

        let local = conn.local_node_id;
        let capabilities = conn.capabilities.clone();
        let quantity = conn.config.expansion_quantity;
        let frames = match *self {
            Strategy::Current => compose_frames(
                &delete,
                &add,
                &|d: &[Binding], a: &[Binding]| -> Result<Message, Error> {
                    Ok(Message::Update(compose_update(
                        d,
                        a,
                        local,
                        &capabilities,
                        &filter,
                    )?))
                },
            )?,
            Strategy::Legacy(version) => compose_frames(
                &delete,
                &add,
                &|d: &[Binding], a: &[Binding]| -> Result<Message, Error> {
                    Ok(Message::LegacyUpdate(LegacyUpdateMessage::compose(
                        version, d, a, &filter, quantity,
                    )?))
                },
            )?,
        };

        for frame in &frames {
            conn.channel.send(frame.clone())?;
        }
        connection_log!(conn, debug,
            "exported {} additions and {} withdrawals in {} frames",
            add.len(), delete.len(), frames.len()
        );
        conn.export = next;
        Ok(frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_per_version() {
        assert_eq!(Strategy::new(Version::V1), Strategy::Legacy(Version::V1));
        assert_eq!(Strategy::new(Version::V3), Strategy::Legacy(Version::V3));
        assert_eq!(Strategy::new(Version::V4), Strategy::Current);
        assert_eq!(Strategy::Current.version(), Version::V4);
    }

    #[test]
    fn legacy_strategy_rejects_keepalive() {
        let frame = Message::Keepalive.to_frame().unwrap();
        assert!(matches!(
            Strategy::Legacy(Version::V2).on_parse_input(&frame),
            Err(Error::UnknownMessageType(6))
        ));
        assert_eq!(
            Strategy::Current.on_parse_input(&frame).unwrap(),
            Message::Keepalive
        );
    }
}
