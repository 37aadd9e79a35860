//! CBOR encoding on top of the `serde_cbor` crate.

use alloc::vec::Vec;
use core::{cmp, fmt, result};
use serde::Serialize;
use serde_cbor::{ser::Write, Serializer};

#[cfg(feature = "std")]
use std::error;

/// The error type for the `cbor` module.
#[derive(Debug)]
pub struct CborError(serde_cbor::Error);

impl From<serde_cbor::Error> for CborError {
    fn from(e: serde_cbor::Error) -> CborError {
        CborError(e)
    }
}

impl fmt::Display for CborError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CBOR error: {}", self.0)
    }
}

#[cfg(feature = "std")]
impl error::Error for CborError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.0)
    }
}

/// The result type for the `cbor` module.
pub type Result<T> = result::Result<T, CborError>;

/// Implements the `Write` trait from `serde_cbor` using a `Vec<u8>`.
///
/// It allocates when necessary, so it works for data whose encoded length
/// isn't known up front, unlike `SliceWrite`.
struct VecWrite {
    vec: Vec<u8>,
}

impl VecWrite {
    /// Constructs a new `VecWrite` based on a `Vec<u8>` of specified capacity.
    fn with_capacity(capacity: usize) -> VecWrite {
        VecWrite {
            vec: Vec::with_capacity(capacity),
        }
    }
}

impl Write for VecWrite {
    type Error = serde_cbor::Error;

    fn write_all(&mut self, buf: &[u8]) -> result::Result<(), Self::Error> {
        if self.vec.capacity() - self.vec.len() < buf.len() {
            // Allocate to make sure we have either at least 64 bytes of free
            // space, or if what we're trying to insert is larger than that,
            // make room for it and 8 additional bytes (for later inserts).
            self.vec.reserve(cmp::max(64, buf.len() + 8));
        }
        // Copy buffer elements into our vector
        self.vec.extend_from_slice(buf);

        Ok(())
    }
}

/// Serializes an object into CBOR.
pub fn encode(object: impl Serialize) -> Result<Vec<u8>> {
    // Initialize a writer and a serializer relying on it
    let writer = VecWrite::with_capacity(64);
    let mut serializer = Serializer::new(writer);
    // Attempt serialization
    object.serialize(&mut serializer)?;

    Ok(serializer.into_inner().vec)
}
