// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_enum::TryFromPrimitiveError;

use crate::messages::{
    ErrorCode, ErrorMessage, ErrorSubcode, LegacyErrorCode, Version,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("framing: {0}")]
    Framing(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown connection mode {0}")]
    UnknownConnectionMode(u32),

    #[error("address length {length} exceeds {max}")]
    AddressLength { length: u8, max: u8 },

    #[error("attribute length: {0}")]
    AttributeLength(String),

    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("attribute variant: {0}")]
    AttributeVariant(String),

    #[error("capability {0} has a non-zero length")]
    CapabilityLength(u8),

    #[error("tlv not found: {0}")]
    TlvNotFound(String),

    #[error("hold time min {0} out of range")]
    HoldTimeMin(u32),

    #[error("hold time max {max} out of range for min {min}")]
    HoldTimeMax { min: u32, max: u32 },

    #[error("security group tag {0} out of range")]
    SecurityGroupTagValue(u32),

    #[error("error data is {0} bytes, at most 10 allowed")]
    ErrorCodeDataLength(usize),

    #[error("message type error")]
    MessageType(#[from] TryFromPrimitiveError<crate::messages::MessageType>),

    #[error("capability code error")]
    CapabilityCode(
        #[from] TryFromPrimitiveError<crate::attributes::CapabilityType>,
    ),

    #[error("error code")]
    ErrorCode(#[from] TryFromPrimitiveError<ErrorCode>),

    #[error("error subcode")]
    ErrorSubcode(#[from] TryFromPrimitiveError<ErrorSubcode>),

    #[error("legacy error code")]
    LegacyErrorCode(#[from] TryFromPrimitiveError<LegacyErrorCode>),

    #[error("legacy mapping type error")]
    MappingType(#[from] TryFromPrimitiveError<crate::legacy::MappingType>),

    #[error("message parse error")]
    Parse(nom::Err<(Vec<u8>, nom::error::ErrorKind)>),

    #[error("connection modes {local} and {remote} are not complementary")]
    ModeMismatch {
        local: crate::messages::ConnectionMode,
        remote: crate::messages::ConnectionMode,
    },

    #[error("update received in state {0}")]
    UpdateMessageConnectionState(crate::connection::ConnectionState),

    #[error("peer sent error: {0}")]
    ErrorMessageReceived(ErrorMessage),

    #[error("unacceptable hold time: {0}")]
    UnacceptableHoldTime(String),

    #[error("no network interfaces")]
    NoNetworkInterfaces,

    #[error("datastore error: {0}")]
    Datastore(#[from] sdb::error::Error),

    #[error("channel send: {0}")]
    ChannelSend(String),
}

impl<'a> From<nom::Err<(&'a [u8], nom::error::ErrorKind)>> for Error {
    fn from(e: nom::Err<(&'a [u8], nom::error::ErrorKind)>) -> Error {
        Error::Parse(e.to_owned())
    }
}

impl Error {
    /// The protocol error message reported to a peer running `version` when
    /// this error ends a connection. Local faults have no protocol
    /// representation and yield `None`.
    pub fn to_error_message(&self, version: Version) -> Option<ErrorMessage> {
        use ErrorCode::*;
        use ErrorSubcode::*;

        let (code, subcode) = match self {
            Error::Framing(_)
            | Error::TooLarge(_)
            | Error::UnknownMessageType(_)
            | Error::MessageType(_) => (MessageHeaderError, Unspecified),

            Error::UnsupportedVersion(_) => {
                if version.is_legacy() {
                    return Some(ErrorMessage::legacy(
                        LegacyErrorCode::VersionMismatch,
                        &[],
                    ));
                }
                (OpenMessageError, UnsupportedVersionNumber)
            }
            Error::UnknownConnectionMode(_) | Error::ModeMismatch { .. } => {
                (OpenMessageError, Unspecified)
            }
            Error::UnacceptableHoldTime(_) => {
                (OpenMessageError, UnacceptableHoldTime)
            }
            Error::HoldTimeMin(_) | Error::HoldTimeMax { .. } => {
                (OpenMessageError, MalformedAttribute)
            }

            Error::AttributeLength(_) | Error::CapabilityLength(_) => {
                (UpdateMessageError, AttributeLengthError)
            }
            Error::AttributeNotFound(_) => {
                (UpdateMessageError, MissingWellKnownAttribute)
            }
            Error::AttributeVariant(_) => {
                (UpdateMessageError, AttributeFlagsError)
            }
            Error::AddressLength { .. }
            | Error::SecurityGroupTagValue(_)
            | Error::CapabilityCode(_) => {
                (UpdateMessageError, MalformedAttribute)
            }
            Error::TlvNotFound(_)
            | Error::MappingType(_)
            | Error::ErrorCode(_)
            | Error::ErrorSubcode(_)
            | Error::LegacyErrorCode(_)
            | Error::Parse(_) => (UpdateMessageError, MalformedAttributeList),
            Error::UpdateMessageConnectionState(_) => {
                (UpdateMessageError, Unspecified)
            }

            Error::ErrorCodeDataLength(_)
            | Error::ErrorMessageReceived(_)
            | Error::NoNetworkInterfaces
            | Error::Datastore(_)
            | Error::ChannelSend(_) => return None,
        };

        if version.is_legacy() {
            return Some(ErrorMessage::legacy(
                LegacyErrorCode::MessageParseError,
                &[],
            ));
        }
        Some(ErrorMessage::Extended {
            code,
            subcode,
            data: Vec::new(),
        })
    }
}
