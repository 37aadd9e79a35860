//! The OSCORE option value and the per-message protection state.
//!
//! The option value is the compact framing of RFC 8613, section 6.1:
//! a flag byte, the partial IV, an optional length-prefixed kid context
//! and finally the kid, whose length is whatever remains of the option.

use alloc::vec::Vec;

use crate::{error::Error, Result};

/// Flag bit signaling that the kid field is present.
const FLAG_KID: u8 = 0b0000_1000;
/// Flag bit signaling that the kid context field is present.
const FLAG_KID_CONTEXT: u8 = 0b0001_0000;
/// Flag bits holding the length of the partial IV.
const PIV_LEN_MASK: u8 = 0b0000_0111;
/// Flag bits that must be zero.
const RESERVED_MASK: u8 = 0b1110_0000;

/// The maximum number of partial IV bytes in an option.
pub const MAX_PIV_LEN: usize = 5;

/// Whether a message is a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Response,
}

impl Role {
    /// Whether this is the request side of an exchange.
    pub fn is_request(self) -> bool {
        self == Role::Request
    }
}

/// The finalized inputs for protecting a single outgoing message.
///
/// The role and the identity fields are constructor parameters and can't be
/// changed afterwards, so by the time an option can be serialized from this
/// state, everything it depends on is already in place. The value is built
/// for one protect operation and discarded with it.
pub struct ProtectedMessageState {
    role: Role,
    kid: Vec<u8>,
    kid_context: Option<Vec<u8>>,
    partial_iv: Option<Vec<u8>>,
}

impl ProtectedMessageState {
    /// Creates the state for an outgoing request.
    ///
    /// Requests always transmit the sender's kid, even when it is the empty
    /// byte string, along with a fresh partial IV.
    pub fn request(
        kid: Vec<u8>,
        partial_iv: Vec<u8>,
        kid_context: Option<Vec<u8>>,
    ) -> ProtectedMessageState {
        ProtectedMessageState {
            role: Role::Request,
            kid,
            kid_context,
            partial_iv: Some(partial_iv),
        }
    }

    /// Creates the state for an outgoing response.
    ///
    /// Responses never transmit a kid. Without a partial IV the option is
    /// empty, which signals that the request's nonce is being reused.
    pub fn response(partial_iv: Option<Vec<u8>>) -> ProtectedMessageState {
        ProtectedMessageState {
            role: Role::Response,
            kid: Vec::new(),
            kid_context: None,
            partial_iv,
        }
    }

    /// Returns the role this state was created with.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the kid transmitted with the message.
    pub fn kid(&self) -> &[u8] {
        &self.kid
    }

    /// Returns the partial IV of the message, if it carries one.
    pub fn partial_iv(&self) -> Option<&[u8]> {
        self.partial_iv.as_deref()
    }

    /// Serializes the value of the OSCORE option.
    pub fn encode_option(&self) -> Vec<u8> {
        let mut option = vec![0];

        if let Some(piv) = &self.partial_iv {
            // The three least significant flag bits are the piv length
            option[0] |= piv.len() as u8 & PIV_LEN_MASK;
            option.extend_from_slice(piv);
        }

        if let Some(kid_context) = &self.kid_context {
            option[0] |= FLAG_KID_CONTEXT;
            option.push(kid_context.len() as u8);
            option.extend_from_slice(kid_context);
        }

        if self.role.is_request() {
            // The kid has no length field, it runs to the end of the option
            option[0] |= FLAG_KID;
            option.extend_from_slice(&self.kid);
        }

        // A message without any of the fields has an empty option value
        if option[0] == 0 {
            option.clear();
        }

        option
    }
}

/// The decoded fields of a received OSCORE option value.
#[derive(Debug, Default, PartialEq)]
pub struct OscoreOption {
    pub partial_iv: Option<Vec<u8>>,
    pub kid: Option<Vec<u8>>,
    pub kid_context: Option<Vec<u8>>,
}

impl OscoreOption {
    /// Parses an option value.
    ///
    /// A kid of zero length is valid and distinct from an absent kid: the
    /// flag is set but no bytes remain. Anything whose declared lengths
    /// disagree with the available bytes is rejected.
    pub fn decode(value: &[u8]) -> Result<OscoreOption> {
        // The empty option carries no fields at all
        if value.is_empty() {
            return Ok(OscoreOption::default());
        }

        let flags = value[0];
        if flags & RESERVED_MASK != 0 {
            return Err(Error::MalformedOption);
        }

        let piv_len = (flags & PIV_LEN_MASK) as usize;
        if piv_len > MAX_PIV_LEN {
            return Err(Error::MalformedOption);
        }

        let mut rest = &value[1..];
        let partial_iv = if piv_len > 0 {
            if rest.len() < piv_len {
                return Err(Error::MalformedOption);
            }
            let (piv, remainder) = rest.split_at(piv_len);
            rest = remainder;
            Some(piv.to_vec())
        } else {
            None
        };

        let kid_context = if flags & FLAG_KID_CONTEXT != 0 {
            let (&len, remainder) =
                rest.split_first().ok_or(Error::MalformedOption)?;
            if remainder.len() < len as usize {
                return Err(Error::MalformedOption);
            }
            let (kid_context, remainder) = remainder.split_at(len as usize);
            rest = remainder;
            Some(kid_context.to_vec())
        } else {
            None
        };

        let kid = if flags & FLAG_KID != 0 {
            Some(rest.to_vec())
        } else if rest.is_empty() {
            None
        } else {
            // Leftover bytes that no flag accounts for
            return Err(Error::MalformedOption);
        };

        Ok(OscoreOption {
            partial_iv,
            kid,
            kid_context,
        })
    }
}
