//! Error types for OSCORE message protection.

use coap_lite::{error as coap, CoapOption};
use core::fmt;

#[cfg(feature = "std")]
use std::error;

use crate::cbor::CborError;

/// The error type for protecting and unprotecting messages.
///
/// Every variant is terminal for the message being processed; nothing is
/// retried internally and no message is ever passed on unauthenticated.
#[derive(Debug)]
pub enum Error {
    /// The OSCORE option bytes are structurally invalid.
    MalformedOption,
    /// A request was received without its sender's kid.
    MissingKid,
    /// The kid (and kid context) don't resolve to a security context.
    UnknownKid,
    /// The message's sequence number has already been accepted.
    ReplayDetected,
    /// The sender sequence number space of this context is used up.
    SequenceExhausted,
    /// The AEAD rejected the message because its tag didn't verify.
    AuthenticationFailure,
    /// The decrypted payload doesn't contain an inner message.
    MalformedPlaintext,
    /// The message doesn't contain an OSCORE option.
    NoOscoreOption,
    /// Message contains an unsupported option.
    UnsupportedOption(CoapOption),
    /// Wraps errors from the `cbor` module.
    Cbor(CborError),
    /// Wraps errors from `hkdf`.
    Hkdf(hkdf::InvalidLength),
    /// Wraps errors from `coap_lite`.
    Coap(coap::MessageError),
}

impl From<CborError> for Error {
    fn from(e: CborError) -> Error {
        Error::Cbor(e)
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(e: hkdf::InvalidLength) -> Error {
        Error::Hkdf(e)
    }
}

impl From<ccm::aead::Error> for Error {
    fn from(_: ccm::aead::Error) -> Error {
        Error::AuthenticationFailure
    }
}

impl From<coap::MessageError> for Error {
    fn from(e: coap::MessageError) -> Error {
        Error::Coap(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedOption => {
                write!(f, "OSCORE option is structurally invalid")
            }
            Error::MissingKid => {
                write!(f, "Request doesn't carry the sender's kid")
            }
            Error::UnknownKid => {
                write!(f, "No security context for this kid")
            }
            Error::ReplayDetected => {
                write!(f, "This message has been received already")
            }
            Error::SequenceExhausted => {
                write!(
                    f,
                    "Sender sequence numbers for this context are used up"
                )
            }
            Error::AuthenticationFailure => {
                write!(f, "Message failed authentication")
            }
            Error::MalformedPlaintext => {
                write!(f, "Decrypted payload doesn't contain an inner message")
            }
            Error::NoOscoreOption => {
                write!(f, "Message doesn't contain an OSCORE option")
            }
            Error::UnsupportedOption(o) => {
                write!(f, "Message contains an unsupported option: {:?}", o)
            }
            Error::Cbor(e) => e.fmt(f),
            Error::Hkdf(e) => e.fmt(f),
            Error::Coap(e) => e.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Cbor(e) => Some(e),
            _ => None,
        }
    }
}
