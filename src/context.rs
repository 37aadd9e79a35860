//! Security contexts and the store that owns them.

use alloc::vec::Vec;

use crate::{
    crypto::{self, KEY_LEN, NONCE_LEN},
    error::Error,
    option::OscoreOption,
    pipeline,
    replay::ReplayWindow,
    Result,
};

/// The highest sender sequence number that still fits a 5-byte partial IV.
///
/// Reaching it means the context is worn out and has to be replaced with
/// fresh key material; the sequence number never wraps around.
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 40) - 1;

/// The common context part of the security context.
struct CommonContext {
    common_iv: [u8; NONCE_LEN],
    kid_context: Option<Vec<u8>>,
}

/// The sender context part of the security context.
struct SenderContext {
    sender_id: Vec<u8>,
    sender_key: [u8; KEY_LEN],
    sender_sequence_number: u64,
}

/// The recipient context part of the security context.
struct RecipientContext {
    recipient_id: Vec<u8>,
    recipient_key: [u8; KEY_LEN],
    replay_window: ReplayWindow,
}

/// The security context.
///
/// Keys and the common IV are derived once at creation and never change;
/// the only mutable state is the sender sequence number and the replay
/// window, both only reachable through `&mut self`. A context shared
/// between threads therefore needs one lock around it, while operations on
/// different contexts are independent of each other.
pub struct SecurityContext {
    common_context: CommonContext,
    sender_context: SenderContext,
    recipient_context: RecipientContext,
}

impl SecurityContext {
    /// Creates a new `SecurityContext`.
    pub fn new(
        master_secret: Vec<u8>,
        master_salt: Vec<u8>,
        sender_id: Vec<u8>,
        recipient_id: Vec<u8>,
    ) -> Result<SecurityContext> {
        SecurityContext::with_kid_context(
            master_secret,
            master_salt,
            sender_id,
            recipient_id,
            None,
        )
    }

    /// Creates a new `SecurityContext` with a kid context, which takes part
    /// in the key derivation and is transmitted in request options.
    pub fn with_kid_context(
        master_secret: Vec<u8>,
        master_salt: Vec<u8>,
        sender_id: Vec<u8>,
        recipient_id: Vec<u8>,
        kid_context: Option<Vec<u8>>,
    ) -> Result<SecurityContext> {
        let id_context = kid_context.as_deref();

        // Derive the keys and IV
        let sender_key_vec = crypto::hkdf(
            &master_secret,
            &master_salt,
            &crypto::build_info(&sender_id, id_context, "Key", KEY_LEN)?,
            KEY_LEN,
        )?;
        let recipient_key_vec = crypto::hkdf(
            &master_secret,
            &master_salt,
            &crypto::build_info(&recipient_id, id_context, "Key", KEY_LEN)?,
            KEY_LEN,
        )?;
        let common_iv_vec = crypto::hkdf(
            &master_secret,
            &master_salt,
            &crypto::build_info(&[], id_context, "IV", NONCE_LEN)?,
            NONCE_LEN,
        )?;
        let mut sender_key = [0; KEY_LEN];
        sender_key.copy_from_slice(&sender_key_vec);
        let mut recipient_key = [0; KEY_LEN];
        recipient_key.copy_from_slice(&recipient_key_vec);
        let mut common_iv = [0; NONCE_LEN];
        common_iv.copy_from_slice(&common_iv_vec);

        // Build the subcontexts
        let common_context = CommonContext {
            common_iv,
            kid_context,
        };
        let sender_context = SenderContext {
            sender_id,
            sender_key,
            sender_sequence_number: 0,
        };
        let recipient_context = RecipientContext {
            recipient_id,
            recipient_key,
            replay_window: ReplayWindow::default(),
        };

        // Combine them to the final thing
        Ok(SecurityContext {
            common_context,
            sender_context,
            recipient_context,
        })
    }

    /// Replaces the replay window with one of the given size.
    ///
    /// Meant to be called right after creation, before anything has been
    /// received through this context, since it resets the window state.
    pub fn with_replay_window(mut self, size: u32) -> SecurityContext {
        self.recipient_context.replay_window = ReplayWindow::new(size);
        self
    }

    /// Returns the sender ID, the kid transmitted in requests.
    pub fn sender_id(&self) -> &[u8] {
        &self.sender_context.sender_id
    }

    /// Returns the recipient ID, the kid the peer sends with.
    pub fn recipient_id(&self) -> &[u8] {
        &self.recipient_context.recipient_id
    }

    /// Returns the kid context, if the context carries one.
    pub fn kid_context(&self) -> Option<&[u8]> {
        self.common_context.kid_context.as_deref()
    }

    pub(crate) fn sender_key(&self) -> &[u8; KEY_LEN] {
        &self.sender_context.sender_key
    }

    pub(crate) fn recipient_key(&self) -> &[u8; KEY_LEN] {
        &self.recipient_context.recipient_key
    }

    pub(crate) fn common_iv(&self) -> &[u8; NONCE_LEN] {
        &self.common_context.common_iv
    }

    /// Hands out the partial IV for the next outgoing message, spending one
    /// sender sequence number.
    ///
    /// The number stays spent even if the operation it was handed out for
    /// fails later on: a partial IV must never seal two different
    /// plaintexts under the same key, so failed sends burn their number.
    /// Fails with `SequenceExhausted` once the space is used up.
    pub fn next_sending_piv(&mut self) -> Result<Vec<u8>> {
        if self.sender_context.sender_sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(Error::SequenceExhausted);
        }
        let piv =
            crypto::format_piv(self.sender_context.sender_sequence_number);
        self.sender_context.sender_sequence_number += 1;

        Ok(piv)
    }

    /// Returns an error if the received sequence number is a replay.
    ///
    /// This doesn't record the number; that only happens after the message
    /// has authenticated.
    pub(crate) fn check_replay(&self, _sequence_number: u64) -> Result<()> {
        #[cfg(not(feature = "no_replay"))]
        self.recipient_context
            .replay_window
            .check(_sequence_number)?;

        Ok(())
    }

    /// Marks the received sequence number as accepted.
    pub(crate) fn record_replay(&mut self, sequence_number: u64) {
        self.recipient_context.replay_window.record(sequence_number);
    }

    /// Checks a received sequence number against the replay window and
    /// records it in one step.
    pub fn check_and_record_received(
        &mut self,
        sequence_number: u64,
    ) -> Result<()> {
        self.check_replay(sequence_number)?;
        self.record_replay(sequence_number);

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_sender_sequence_number(&mut self, n: u64) {
        self.sender_context.sender_sequence_number = n;
    }
}

/// Identifies a context owned by a `ContextStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandle(usize);

/// Owns long-lived security contexts, keyed by opaque handles.
///
/// Contexts are created, rotated and destroyed explicitly through the
/// store; a handle stays valid until its context is removed. Rotation
/// after key exhaustion is a remove followed by an insert with fresh key
/// material from the provisioning side.
#[derive(Default)]
pub struct ContextStore {
    slots: Vec<Option<SecurityContext>>,
}

impl ContextStore {
    /// Creates an empty store.
    pub fn new() -> ContextStore {
        ContextStore::default()
    }

    /// Adds a context, returning the handle that identifies it.
    pub fn insert(&mut self, context: SecurityContext) -> ContextHandle {
        match self.slots.iter().position(Option::is_none) {
            Some(i) => {
                self.slots[i] = Some(context);
                ContextHandle(i)
            }
            None => {
                self.slots.push(Some(context));
                ContextHandle(self.slots.len() - 1)
            }
        }
    }

    /// Returns the context behind a handle, if it still exists.
    pub fn get(&self, handle: ContextHandle) -> Option<&SecurityContext> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    /// Returns the context behind a handle mutably, if it still exists.
    pub fn get_mut(
        &mut self,
        handle: ContextHandle,
    ) -> Option<&mut SecurityContext> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Removes and returns the context behind a handle.
    pub fn remove(
        &mut self,
        handle: ContextHandle,
    ) -> Option<SecurityContext> {
        self.slots.get_mut(handle.0).and_then(Option::take)
    }

    /// Finds the context whose peer sends with this kid.
    ///
    /// A kid context in the message has to match the context's; a message
    /// without one matches on the kid alone.
    pub fn resolve(
        &self,
        kid: &[u8],
        kid_context: Option<&[u8]>,
    ) -> Result<ContextHandle> {
        for (i, slot) in self.slots.iter().enumerate() {
            let context = match slot {
                Some(context) => context,
                None => continue,
            };
            if context.recipient_id() != kid {
                continue;
            }
            if let Some(kid_context) = kid_context {
                if context.kid_context() != Some(kid_context) {
                    continue;
                }
            }
            return Ok(ContextHandle(i));
        }

        Err(Error::UnknownKid)
    }

    /// Resolves the sender of a protected request and unprotects it.
    ///
    /// This is the receive path for a server talking to several peers: the
    /// kid in the option selects the context.
    pub fn unprotect_request(
        &mut self,
        option: &[u8],
        ciphertext: &[u8],
    ) -> Result<(ContextHandle, Vec<u8>)> {
        let parsed = OscoreOption::decode(option)?;
        let kid = parsed.kid.as_deref().ok_or(Error::MissingKid)?;
        let handle = self.resolve(kid, parsed.kid_context.as_deref())?;
        let context = match self.get_mut(handle) {
            Some(context) => context,
            None => return Err(Error::UnknownKid),
        };
        let plaintext =
            pipeline::unprotect_request(context, option, ciphertext)?;

        Ok((handle, plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::*;

    #[test]
    fn context_derivation() {
        let context = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
        )
        .unwrap();

        assert_eq!(&COMMON_IV, context.common_iv());

        assert_eq!(&CLIENT_ID, context.sender_id());
        assert_eq!(&CLIENT_KEY, context.sender_key());
        assert_eq!(0, context.sender_context.sender_sequence_number);

        assert_eq!(&SERVER_ID, context.recipient_id());
        assert_eq!(&SERVER_KEY, context.recipient_key());
    }

    #[test]
    fn mirrored_derivation() {
        let client = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
        )
        .unwrap();
        let server = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            SERVER_ID.to_vec(),
            CLIENT_ID.to_vec(),
        )
        .unwrap();

        assert_eq!(client.sender_key(), server.recipient_key());
        assert_eq!(client.recipient_key(), server.sender_key());
        assert_eq!(client.common_iv(), server.common_iv());
    }

    #[test]
    fn kid_context_changes_keys() {
        let plain = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
        )
        .unwrap();
        let with_context = SecurityContext::with_kid_context(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
            Some(KID_CONTEXT.to_vec()),
        )
        .unwrap();

        assert_eq!(Some(&KID_CONTEXT[..]), with_context.kid_context());
        assert_ne!(plain.sender_key(), with_context.sender_key());
        assert_ne!(plain.common_iv(), with_context.common_iv());
    }

    #[test]
    fn sequence_numbers() {
        let mut context = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
        )
        .unwrap();

        // Numbers are handed out exactly once, whether or not the message
        // they were meant for ever goes out
        assert_eq!(&[0x00], &context.next_sending_piv().unwrap()[..]);
        assert_eq!(&[0x01], &context.next_sending_piv().unwrap()[..]);
        assert_eq!(&[0x02], &context.next_sending_piv().unwrap()[..]);
    }

    #[test]
    fn sequence_exhaustion() {
        let mut context = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            CLIENT_ID.to_vec(),
            SERVER_ID.to_vec(),
        )
        .unwrap();
        context.set_sender_sequence_number(MAX_SEQUENCE_NUMBER);

        // The last number of the space is still usable
        assert_eq!(
            &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
            &context.next_sending_piv().unwrap()[..]
        );
        // After that the context is worn out, with no wraparound
        assert!(matches!(
            context.next_sending_piv(),
            Err(Error::SequenceExhausted)
        ));
        assert!(matches!(
            context.next_sending_piv(),
            Err(Error::SequenceExhausted)
        ));
    }

    #[test]
    fn store_resolution() {
        let mut store = ContextStore::new();
        let server = SecurityContext::new(
            MASTER_SECRET.to_vec(),
            MASTER_SALT.to_vec(),
            SERVER_ID.to_vec(),
            CLIENT_ID.to_vec(),
        )
        .unwrap();
        let handle = store.insert(server);

        assert_eq!(handle, store.resolve(&CLIENT_ID, None).unwrap());
        assert!(matches!(
            store.resolve(&[0x42], None),
            Err(Error::UnknownKid)
        ));
        // A kid context the context doesn't have fails resolution
        assert!(matches!(
            store.resolve(&CLIENT_ID, Some(&KID_CONTEXT)),
            Err(Error::UnknownKid)
        ));

        let removed = store.remove(handle).unwrap();
        assert_eq!(&CLIENT_ID, removed.recipient_id());
        assert!(store.get(handle).is_none());
        assert!(matches!(
            store.resolve(&CLIENT_ID, None),
            Err(Error::UnknownKid)
        ));

        // The freed slot is reused on the next insert
        let replacement = store.insert(removed);
        assert_eq!(handle, replacement);
    }
}
