// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::attributes::{
    Attribute, AttributeList, AttributeType, AttributeValue, CapabilityType,
    HoldTime,
};
use crate::error::Error;
use crate::legacy::{self, LegacyUpdateMessage};
use nom::number::complete::{be_u32, u8 as parse_u8};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sdb::NodeId;
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{self, Display, Formatter};

/// Largest frame, header included, a node sends or accepts.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Largest payload of an error message.
pub const MAX_ERROR_DATA: usize = 10;

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum MessageType {
    Open = 1,
    OpenResp = 2,
    Update = 3,
    Error = 4,
    PurgeAll = 5,
    Keepalive = 6,
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Open => "OPEN",
            MessageType::OpenResp => "RESP",
            MessageType::Update => "UPDATE",
            MessageType::Error => "ERROR",
            MessageType::PurgeAll => "PURGEALL",
            MessageType::Keepalive => "KEEPALIVE",
        };
        write!(f, "{s}")
    }
}

/// Protocol version. Versions 1 through 3 are the legacy family.
#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Copy,
    Clone,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize_repr,
    Deserialize_repr,
)]
#[repr(u8)]
pub enum Version {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
}

impl Version {
    pub fn is_legacy(&self) -> bool {
        *self != Version::V4
    }

    fn from_wire(v: u32) -> Result<Self, Error> {
        u8::try_from(v)
            .ok()
            .and_then(|v| Version::try_from(v).ok())
            .ok_or(Error::UnsupportedVersion(v))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize_repr,
    Deserialize_repr,
)]
#[repr(u8)]
pub enum ConnectionMode {
    Speaker = 1,
    Listener = 2,
    Both = 3,
}

impl ConnectionMode {
    /// Whether a node in this mode can peer with one in `remote` mode.
    pub fn complements(&self, remote: ConnectionMode) -> bool {
        matches!(
            (self, remote),
            (ConnectionMode::Speaker, ConnectionMode::Listener)
                | (ConnectionMode::Listener, ConnectionMode::Speaker)
                | (ConnectionMode::Both, ConnectionMode::Both)
        )
    }

    pub fn is_speaker(&self) -> bool {
        matches!(self, ConnectionMode::Speaker | ConnectionMode::Both)
    }

    pub fn is_listener(&self) -> bool {
        matches!(self, ConnectionMode::Listener | ConnectionMode::Both)
    }

    fn from_wire(v: u32) -> Result<Self, Error> {
        u8::try_from(v)
            .ok()
            .and_then(|v| ConnectionMode::try_from(v).ok())
            .ok_or(Error::UnknownConnectionMode(v))
    }
}

impl Display for ConnectionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionMode::Speaker => "speaker",
            ConnectionMode::Listener => "listener",
            ConnectionMode::Both => "both",
        };
        write!(f, "{s}")
    }
}

/// Each message begins with a fixed size header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Length                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Reserved                      |     Type      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Header {
    /// Total length of the message, including the header.
    pub length: u32,

    pub typ: MessageType,
}

impl Header {
    pub const WIRE_SIZE: usize = 8;

    /// Create a new message header. Length must be between 8 and 4096.
    pub fn new(length: usize, typ: MessageType) -> Result<Header, Error> {
        if length < Header::WIRE_SIZE {
            return Err(Error::Framing(format!("length {length} below header")));
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge(format!("message of {length} bytes")));
        }
        Ok(Header {
            length: length as u32,
            typ,
        })
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = self.length.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0, 0, 0, self.typ.into()]);
        buf
    }

    /// Decode the header of a buffer holding exactly one message.
    pub fn from_wire(input: &[u8]) -> Result<Header, Error> {
        let length = frame_length(input)?.ok_or_else(|| {
            Error::Framing(format!("{} bytes is not a header", input.len()))
        })?;
        if length != input.len() {
            return Err(Error::Framing(format!(
                "declared length {length} but {} bytes present",
                input.len()
            )));
        }
        let typ = input[Header::WIRE_SIZE - 1];
        let typ = MessageType::try_from(typ)
            .map_err(|_| Error::UnknownMessageType(typ))?;
        Ok(Header {
            length: length as u32,
            typ,
        })
    }
}

/// The declared length of the frame at the start of `input`, or `None` when
/// fewer than a header's worth of bytes are present. Used to cut a byte
/// stream into frames.
pub fn frame_length(input: &[u8]) -> Result<Option<usize>, Error> {
    let Ok((_, length)) = be_u32::<_, ()>(input) else {
        return Ok(None);
    };
    let length = length as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(Error::Framing(format!(
            "declared length {length} exceeds {MAX_MESSAGE_SIZE}"
        )));
    }
    if length < Header::WIRE_SIZE {
        return Err(Error::Framing(format!("declared length {length}")));
    }
    if input.len() < Header::WIRE_SIZE {
        return Ok(None);
    }
    Ok(Some(length))
}

/// Render a frame as decimal bytes with the header set apart.
pub fn frame_to_string(frame: &[u8]) -> String {
    let mut s = String::new();
    for (i, b) in frame.iter().enumerate() {
        if i == Header::WIRE_SIZE {
            s.push_str("| ");
        }
        s.push_str(&format!("{b} "));
    }
    s.trim_end().to_string()
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Message {
    Open(OpenMessage),
    OpenResp(OpenMessage),
    Update(UpdateMessage),
    LegacyUpdate(LegacyUpdateMessage),
    Error(ErrorMessage),
    PurgeAll,
    Keepalive,
}

impl Message {
    pub fn typ(&self) -> MessageType {
        match self {
            Self::Open(_) => MessageType::Open,
            Self::OpenResp(_) => MessageType::OpenResp,
            Self::Update(_) | Self::LegacyUpdate(_) => MessageType::Update,
            Self::Error(_) => MessageType::Error,
            Self::PurgeAll => MessageType::PurgeAll,
            Self::Keepalive => MessageType::Keepalive,
        }
    }

    /// Serialize the message payload.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Open(m) | Self::OpenResp(m) => m.to_wire(),
            Self::Update(m) => m.to_wire(),
            Self::LegacyUpdate(m) => m.to_wire(),
            Self::Error(m) => m.to_wire(),
            Self::PurgeAll | Self::Keepalive => Ok(Vec::new()),
        }
    }

    /// Serialize the message with its header.
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        frame(self.typ(), self.to_wire()?)
    }

    /// Decode a single frame sent by a peer that negotiated `version`.
    ///
    /// Open and OpenResp messages carry the sender's version and are decoded
    /// according to it rather than `version`.
    pub fn parse(version: Version, input: &[u8]) -> Result<Message, Error> {
        let header = Header::from_wire(input)?;
        let payload = &input[Header::WIRE_SIZE..];

        let version = match header.typ {
            MessageType::Open | MessageType::OpenResp => {
                extract_version(payload)?
            }
            _ => version,
        };

        match (header.typ, version.is_legacy()) {
            (MessageType::Open, true) => {
                Ok(Message::Open(legacy::open_from_wire(payload)?))
            }
            (MessageType::OpenResp, true) => {
                Ok(Message::OpenResp(legacy::open_from_wire(payload)?))
            }
            (MessageType::Update, true) => Ok(Message::LegacyUpdate(
                LegacyUpdateMessage::from_wire(version, payload)?,
            )),
            (MessageType::Keepalive, true) => {
                Err(Error::UnknownMessageType(MessageType::Keepalive.into()))
            }
            (MessageType::Open, false) => {
                Ok(Message::Open(OpenMessage::from_wire(payload)?))
            }
            (MessageType::OpenResp, false) => {
                Ok(Message::OpenResp(OpenMessage::from_wire(payload)?))
            }
            (MessageType::Update, false) => {
                Ok(Message::Update(UpdateMessage::from_wire(payload)?))
            }
            (MessageType::Keepalive, false) => Ok(Message::Keepalive),
            (MessageType::Error, _) => {
                Ok(Message::Error(ErrorMessage::from_wire(payload)?))
            }
            (MessageType::PurgeAll, _) => Ok(Message::PurgeAll),
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.typ())?;
        match self {
            Self::Open(m) | Self::OpenResp(m) => write!(f, " {m}"),
            Self::Update(m) => write!(f, " {m}"),
            Self::LegacyUpdate(m) => write!(f, " {m}"),
            Self::Error(m) => write!(f, " {m}"),
            Self::PurgeAll | Self::Keepalive => Ok(()),
        }
    }
}

/// Prepend a header to `payload`.
pub fn frame(typ: MessageType, payload: Vec<u8>) -> Result<Vec<u8>, Error> {
    let header = Header::new(Header::WIRE_SIZE + payload.len(), typ)?;
    let mut buf = header.to_wire();
    buf.extend(payload);
    Ok(buf)
}

/// The version a peer declares in the first four bytes of an Open payload.
pub fn extract_version(payload: &[u8]) -> Result<Version, Error> {
    let (_, v) = be_u32(payload)?;
    Version::from_wire(v)
}

/// The first message each side sends once a connection is up, and the reply
/// to it.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Version                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             Mode                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                 Attributes (version 4 only)                   :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OpenMessage {
    pub version: Version,
    pub mode: ConnectionMode,
    pub attributes: AttributeList,
}

impl OpenMessage {
    /// A speaker identifies itself with its node id, a listener lists its
    /// capabilities and a node doing both sends both. Legacy versions carry
    /// no attributes.
    pub fn new(
        version: Version,
        mode: ConnectionMode,
        node_id: NodeId,
        hold_time: Option<HoldTime>,
    ) -> Self {
        let mut attributes = AttributeList::new();
        if !version.is_legacy() {
            if mode.is_speaker() {
                attributes.push(Attribute::sxp_node_id(node_id));
            }
            if mode.is_listener() {
                attributes.push(Attribute::capabilities(version));
            }
            if let Some(ht) = hold_time {
                attributes.push(Attribute::hold_time(ht));
            }
        }
        Self {
            version,
            mode,
            attributes,
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = u32::from(u8::from(self.version)).to_be_bytes().to_vec();
        buf.extend_from_slice(&u32::from(u8::from(self.mode)).to_be_bytes());
        if !self.version.is_legacy() {
            buf.extend_from_slice(&self.attributes.to_wire()?);
        }
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<OpenMessage, Error> {
        let (input, version, mode) = open_fixed_from_wire(input)?;
        Ok(OpenMessage {
            version,
            mode,
            attributes: AttributeList::from_wire(input)?,
        })
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self.attributes.get(AttributeType::SxpNodeId) {
            Ok(AttributeValue::SxpNodeId(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn hold_time(&self) -> Option<HoldTime> {
        match self.attributes.get(AttributeType::HoldTime) {
            Ok(AttributeValue::HoldTime(ht)) => Some(*ht),
            _ => None,
        }
    }

    /// The capabilities the sender declared. Legacy peers never send the
    /// attribute; theirs follow from the version.
    pub fn capabilities(&self) -> Result<Vec<CapabilityType>, Error> {
        if self.version.is_legacy() {
            return Ok(CapabilityType::for_version(self.version));
        }
        decode_capabilities(self)
    }
}

/// The codes listed in the Capabilities attribute of `open`.
pub fn decode_capabilities(
    open: &OpenMessage,
) -> Result<Vec<CapabilityType>, Error> {
    match open.attributes.get(AttributeType::Capabilities)? {
        AttributeValue::Capabilities(caps) => Ok(caps.clone()),
        _ => Err(Error::AttributeNotFound("capabilities".into())),
    }
}

/// Version and mode, the part of an Open payload every version shares.
pub(crate) fn open_fixed_from_wire(
    input: &[u8],
) -> Result<(&[u8], Version, ConnectionMode), Error> {
    let (input, version) = be_u32(input)?;
    let (input, mode) = be_u32(input)?;
    Ok((
        input,
        Version::from_wire(version)?,
        ConnectionMode::from_wire(mode)?,
    ))
}

impl Display for OpenMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v{} {}", self.version, self.mode)?;
        for a in &self.attributes {
            write!(f, " [{}]", a.value)?;
        }
        Ok(())
    }
}

/// A version 4 update, a list of attributes whose order carries meaning. See
/// [`crate::update`] for how bindings map onto it.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct UpdateMessage {
    pub attributes: AttributeList,
}

impl UpdateMessage {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        self.attributes.to_wire()
    }

    pub fn from_wire(input: &[u8]) -> Result<UpdateMessage, Error> {
        Ok(UpdateMessage {
            attributes: AttributeList::from_wire(input)?,
        })
    }
}

impl Display for UpdateMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, a) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "[{}]", a.value)?;
        }
        Ok(())
    }
}

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum ErrorCode {
    MessageHeaderError = 1,
    OpenMessageError = 2,
    UpdateMessageError = 3,
}

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum ErrorSubcode {
    Unspecified = 0,
    MalformedAttributeList = 1,
    UnexpectedAttribute = 2,
    MissingWellKnownAttribute = 3,
    AttributeFlagsError = 4,
    AttributeLengthError = 5,
    MalformedAttribute = 6,
    OptionalAttributeError = 7,
    UnsupportedVersionNumber = 8,
    UnsupportedOptionalAttribute = 9,
    UnacceptableHoldTime = 10,
}

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u16)]
pub enum LegacyErrorCode {
    VersionMismatch = 1,
    MessageParseError = 2,
}

/// Sent right before a connection is closed because of an error.
///
/// ```text
/// Extended
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |E|   Code      |   Sub-code    |            Reserved           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                    Data (up to 10 bytes)                      :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
/// Legacy
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |0|           Reserved          |          Error Code           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorMessage {
    Extended {
        code: ErrorCode,
        subcode: ErrorSubcode,
        data: Vec<u8>,
    },
    Legacy {
        code: LegacyErrorCode,
        data: Vec<u8>,
    },
}

const EXTENDED_ERROR: u8 = 0x80;

impl ErrorMessage {
    pub fn extended(
        code: ErrorCode,
        subcode: ErrorSubcode,
        data: &[u8],
    ) -> Result<Self, Error> {
        if data.len() > MAX_ERROR_DATA {
            return Err(Error::ErrorCodeDataLength(data.len()));
        }
        Ok(Self::Extended {
            code,
            subcode,
            data: data.to_vec(),
        })
    }

    pub fn legacy(code: LegacyErrorCode, data: &[u8]) -> Self {
        Self::Legacy {
            code,
            data: data.to_vec(),
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Extended {
                code,
                subcode,
                data,
            } => {
                if data.len() > MAX_ERROR_DATA {
                    return Err(Error::ErrorCodeDataLength(data.len()));
                }
                let mut buf =
                    vec![u8::from(*code) | EXTENDED_ERROR, (*subcode).into(), 0, 0];
                buf.extend_from_slice(data);
                Ok(buf)
            }
            Self::Legacy { code, data } => {
                let mut buf = vec![0, 0];
                buf.extend_from_slice(&u16::from(*code).to_be_bytes());
                buf.extend_from_slice(data);
                Ok(buf)
            }
        }
    }

    pub fn from_wire(input: &[u8]) -> Result<ErrorMessage, Error> {
        let (rest, first) = parse_u8(input)?;
        if first & EXTENDED_ERROR != 0 {
            let code = ErrorCode::try_from(first & !EXTENDED_ERROR)?;
            let (rest, subcode) = parse_u8(rest)?;
            let subcode = ErrorSubcode::try_from(subcode)?;
            let (data, _reserved) = nom::bytes::complete::take(2usize)(rest)?;
            return Self::extended(code, subcode, data);
        }
        let (data, code) = be_u32(input)?;
        let code = u16::try_from(code).map_err(|_| {
            Error::Parse(nom::Err::Failure((
                input.to_vec(),
                nom::error::ErrorKind::Verify,
            )))
        })?;
        Ok(Self::legacy(LegacyErrorCode::try_from(code)?, data))
    }
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extended {
                code,
                subcode,
                data,
            } => write!(f, "{code:?} | {subcode:?} {data:?}"),
            Self::Legacy { code, data } => write!(f, "{code:?} {data:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::WELL_KNOWN;
    use pretty_assertions::assert_eq;
    use pretty_hex::*;
    use std::net::Ipv4Addr;

    #[test]
    fn keepalive_frame_layout() {
        let buf = Message::Keepalive.to_frame().expect("keepalive to frame");
        assert_eq!(buf, vec![0, 0, 0, 8, 0, 0, 0, 6]);
        assert_eq!(
            Message::parse(Version::V4, &buf).expect("parse keepalive"),
            Message::Keepalive
        );
        assert_eq!(frame_to_string(&buf), "0 0 0 8 0 0 0 6");
    }

    #[test]
    fn header_length_counts_header() {
        let m = Message::Error(
            ErrorMessage::extended(
                ErrorCode::OpenMessageError,
                ErrorSubcode::UnacceptableHoldTime,
                &[1, 2],
            )
            .unwrap(),
        );
        let buf = m.to_frame().expect("to frame");
        println!("buf: {}", buf.hex_dump());
        let header = Header::from_wire(&buf).expect("header");
        assert_eq!(header.length as usize, buf.len());
        assert_eq!(header.length as usize, Header::WIRE_SIZE + 6);
        assert_eq!(header.typ, MessageType::Error);
        assert_eq!(frame_to_string(&buf), "0 0 0 14 0 0 0 4 | 130 10 0 0 1 2");
    }

    #[test]
    fn framing_failures() {
        // Too short to hold a header.
        assert!(matches!(
            Header::from_wire(&[0, 0, 0]),
            Err(Error::Framing(_))
        ));
        // Declared length below the header size.
        assert!(matches!(
            Header::from_wire(&[0, 0, 0, 4, 0, 0, 0, 6]),
            Err(Error::Framing(_))
        ));
        // Declared length disagrees with the buffer.
        assert!(matches!(
            Header::from_wire(&[0, 0, 0, 9, 0, 0, 0, 6]),
            Err(Error::Framing(_))
        ));
        // Oversize declared length is rejected before anything else.
        assert!(matches!(
            Header::from_wire(&[0, 0, 0x10, 1]),
            Err(Error::Framing(_))
        ));
        assert!(matches!(
            Header::from_wire(&[0, 0, 0, 8, 0, 0, 0, 9]),
            Err(Error::UnknownMessageType(9))
        ));
    }

    #[test]
    fn frame_length_splits_stream() {
        let mut stream = Message::Keepalive.to_frame().unwrap();
        stream.extend(Message::PurgeAll.to_frame().unwrap());
        stream.extend([0, 0]);

        let mut frames = Vec::new();
        let mut rest = stream.as_slice();
        while let Some(n) = frame_length(rest).unwrap() {
            frames.push(Message::parse(Version::V4, &rest[..n]).unwrap());
            rest = &rest[n..];
        }
        assert_eq!(frames, vec![Message::Keepalive, Message::PurgeAll]);
        assert_eq!(rest, &[0, 0]);
    }

    #[test]
    fn oversize_message_rejected() {
        let prefixes = (0..1000u32)
            .map(|i| sdb::Prefix4::host(Ipv4Addr::from(0x0a00_0000 + i)))
            .collect();
        let m = Message::Update(UpdateMessage {
            attributes: AttributeList::from(vec![Attribute::new(
                WELL_KNOWN,
                AttributeValue::Ipv4AddPrefix(prefixes),
            )]),
        });
        assert!(matches!(m.to_frame(), Err(Error::TooLarge(_))));
    }

    #[test]
    fn open_attributes_by_mode() {
        let id = Ipv4Addr::new(192, 0, 2, 1);
        let ht = HoldTime::new(120).unwrap();

        let speaker =
            OpenMessage::new(Version::V4, ConnectionMode::Speaker, id, Some(ht));
        assert_eq!(speaker.node_id(), Some(id));
        assert_eq!(speaker.hold_time(), Some(ht));
        assert!(decode_capabilities(&speaker).is_err());

        let listener =
            OpenMessage::new(Version::V4, ConnectionMode::Listener, id, None);
        assert_eq!(listener.node_id(), None);
        assert_eq!(
            decode_capabilities(&listener).unwrap(),
            CapabilityType::for_version(Version::V4)
        );

        let both =
            OpenMessage::new(Version::V4, ConnectionMode::Both, id, Some(ht));
        assert_eq!(both.node_id(), Some(id));
        assert_eq!(both.hold_time(), Some(ht));
        assert_eq!(
            decode_capabilities(&both).unwrap(),
            CapabilityType::for_version(Version::V4)
        );

        let buf = Message::Open(speaker.clone()).to_frame().unwrap();
        assert_eq!(&buf[8..16], &[0, 0, 0, 4, 0, 0, 0, 1]);
        assert_eq!(
            Message::parse(Version::V4, &buf).unwrap(),
            Message::Open(speaker)
        );
    }

    #[test]
    fn legacy_open_has_only_fixed_fields() {
        let open = OpenMessage::new(
            Version::V3,
            ConnectionMode::Listener,
            Ipv4Addr::new(1, 1, 1, 1),
            Some(HoldTime::new(90).unwrap()),
        );
        let buf = Message::OpenResp(open.clone()).to_frame().unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(
            open.capabilities().unwrap(),
            CapabilityType::for_version(Version::V3)
        );
        // The declared version wins over the one negotiated so far.
        assert_eq!(
            Message::parse(Version::V4, &buf).unwrap(),
            Message::OpenResp(open)
        );
    }

    #[test]
    fn unsupported_open_version() {
        let buf = frame(MessageType::Open, vec![0, 0, 0, 5, 0, 0, 0, 1]).unwrap();
        assert!(matches!(
            Message::parse(Version::V4, &buf),
            Err(Error::UnsupportedVersion(5))
        ));
        let buf = frame(MessageType::Open, vec![0, 0, 0, 4, 0, 0, 0, 7]).unwrap();
        assert!(matches!(
            Message::parse(Version::V4, &buf),
            Err(Error::UnknownConnectionMode(7))
        ));
    }

    #[test]
    fn keepalive_has_no_legacy_form() {
        let buf = Message::Keepalive.to_frame().unwrap();
        assert!(matches!(
            Message::parse(Version::V2, &buf),
            Err(Error::UnknownMessageType(6))
        ));
        let buf = Message::PurgeAll.to_frame().unwrap();
        assert_eq!(Message::parse(Version::V2, &buf).unwrap(), Message::PurgeAll);
    }

    #[test]
    fn error_message_forms() {
        let e = ErrorMessage::extended(
            ErrorCode::UpdateMessageError,
            ErrorSubcode::MalformedAttribute,
            &[7; 10],
        )
        .unwrap();
        let buf = e.to_wire().unwrap();
        assert_eq!(&buf[..4], &[0x83, 6, 0, 0]);
        assert_eq!(buf.len(), 14);
        assert_eq!(ErrorMessage::from_wire(&buf).unwrap(), e);

        assert!(matches!(
            ErrorMessage::extended(
                ErrorCode::UpdateMessageError,
                ErrorSubcode::MalformedAttribute,
                &[7; 11],
            ),
            Err(Error::ErrorCodeDataLength(11))
        ));

        let l = ErrorMessage::legacy(LegacyErrorCode::VersionMismatch, &[]);
        let buf = l.to_wire().unwrap();
        assert_eq!(buf, vec![0, 0, 0, 1]);
        assert_eq!(ErrorMessage::from_wire(&buf).unwrap(), l);
    }

    #[test]
    fn message_display() {
        let open = OpenMessage::new(
            Version::V4,
            ConnectionMode::Listener,
            Ipv4Addr::new(1, 1, 1, 1),
            None,
        );
        assert!(Message::Open(open).to_string().starts_with("OPEN v4 listener"));
        assert_eq!(Message::PurgeAll.to_string(), "PURGEALL");
        assert_eq!(Message::Keepalive.to_string(), "KEEPALIVE");
    }
}
