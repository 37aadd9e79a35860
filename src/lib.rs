//! An [OSCORE](https://tools.ietf.org/html/rfc8613)
//! message protection implementation intended for embedded devices.
//!
//! The crate covers the protection core of the protocol: deriving security
//! contexts from a pre-established master secret and salt, sealing CoAP
//! requests and responses into OSCORE messages and opening received ones,
//! with replay protection for requests. Key provisioning (for example with
//! EDHOC) and message transport are left to the caller, which hands in
//! message bytes and gets back message bytes.
//!
//! Protection is available on two levels: the methods on
//! [`SecurityContext`](struct.SecurityContext.html) work on full CoAP
//! messages and handle the split into inner and outer options, while the
//! functions in the crate root work on raw plaintext and return the OSCORE
//! option value and ciphertext separately, for transports that do their
//! own framing.
//!
//! ## Security
//! This should **not currently be used in production code**, use at your
//! own risk.

#![no_std]
#[macro_use]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod cbor;
mod coap;
mod context;
mod crypto;
mod error;
mod option;
mod pipeline;
mod replay;
#[cfg(test)]
mod test_vectors;

pub use context::{
    ContextHandle, ContextStore, SecurityContext, MAX_SEQUENCE_NUMBER,
};
pub use error::Error;
pub use option::{OscoreOption, ProtectedMessageState, Role, MAX_PIV_LEN};
pub use pipeline::{
    protect_request, protect_response, unprotect_request, unprotect_response,
    OscoreObject,
};
pub use replay::{ReplayWindow, DEFAULT_WINDOW_SIZE};

/// The result type for this crate.
pub type Result<T> = core::result::Result<T, Error>;
