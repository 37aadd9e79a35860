//! The message protection pipeline: sealing plaintext into OSCORE objects
//! and opening received ones.
//!
//! Every operation runs the same fixed sequence. On the send side the
//! per-message state (role, kid, partial IV) is finalized first, the nonce
//! and AAD are derived from it, the option is serialized from the finalized
//! state and the payload is sealed last. On the receive side the option is
//! parsed, the sender is verified, the replay window is consulted and the
//! payload is opened; only then is anything recorded.

use alloc::vec::Vec;

use crate::{
    context::SecurityContext,
    crypto,
    error::Error,
    option::{OscoreOption, ProtectedMessageState},
    Result,
};

/// A protected message, ready to be placed on the wire by the transport.
#[derive(Debug)]
pub struct OscoreObject {
    /// The value of the OSCORE option.
    pub option: Vec<u8>,
    /// The sealed payload, including the authentication tag.
    pub ciphertext: Vec<u8>,
}

/// Protects the plaintext of a request.
///
/// Spends one sender sequence number, which stays spent if a later step
/// fails, so a partial IV can never seal two different plaintexts.
pub fn protect_request(
    context: &mut SecurityContext,
    plaintext: &[u8],
) -> Result<OscoreObject> {
    let piv = context.next_sending_piv()?;
    // The role and identity fields are immutable from here on; nothing
    // below can serialize the option against anything half-built
    let state = ProtectedMessageState::request(
        context.sender_id().to_vec(),
        piv.clone(),
        context.kid_context().map(|kid_context| kid_context.to_vec()),
    );

    let aad = crypto::build_aad(state.kid(), &piv)?;
    let nonce = crypto::compute_nonce(&piv, state.kid(), context.common_iv());
    let option = state.encode_option();
    let ciphertext =
        crypto::seal(context.sender_key(), &nonce, &aad, plaintext)?;

    Ok(OscoreObject { option, ciphertext })
}

/// Protects the plaintext of a response.
///
/// # Arguments
/// * `request_kid` - The kid the request being answered was protected with.
/// * `request_piv` - The partial IV of that request.
/// * `reuse_piv` - Whether to reuse the request's nonce instead of spending
///   an own sequence number. Only safe for the single response to that
///   request.
pub fn protect_response(
    context: &mut SecurityContext,
    plaintext: &[u8],
    request_kid: &[u8],
    request_piv: &[u8],
    reuse_piv: bool,
) -> Result<OscoreObject> {
    // The AAD refers to the request, no matter which nonce is used
    let aad = crypto::build_aad(request_kid, request_piv)?;

    let (state, nonce) = if reuse_piv {
        // Same nonce as the request, empty option since nothing changes
        (
            ProtectedMessageState::response(None),
            crypto::compute_nonce(
                request_piv,
                context.recipient_id(),
                context.common_iv(),
            ),
        )
    } else {
        // Spend an own sequence number and transmit it, but no kid
        let piv = context.next_sending_piv()?;
        let nonce = crypto::compute_nonce(
            &piv,
            context.sender_id(),
            context.common_iv(),
        );
        (ProtectedMessageState::response(Some(piv)), nonce)
    };

    let option = state.encode_option();
    let ciphertext =
        crypto::seal(context.sender_key(), &nonce, &aad, plaintext)?;

    Ok(OscoreObject { option, ciphertext })
}

/// Recovers the plaintext of a protected request.
///
/// The replay window is consulted before decryption but only updated after
/// the tag has verified, so a forged message can't poison the window.
pub fn unprotect_request(
    context: &mut SecurityContext,
    option: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let option = OscoreOption::decode(option)?;
    // Requests have to carry the sender's kid and a partial IV
    let kid = option.kid.ok_or(Error::MissingKid)?;
    let piv = option.partial_iv.ok_or(Error::MalformedOption)?;

    if kid.as_slice() != context.recipient_id() {
        return Err(Error::UnknownKid);
    }
    if let Some(kid_context) = &option.kid_context {
        if context.kid_context() != Some(&kid_context[..]) {
            return Err(Error::UnknownKid);
        }
    }

    let sequence_number = crypto::piv_to_u64(&piv);
    context.check_replay(sequence_number)?;

    let aad = crypto::build_aad(&kid, &piv)?;
    let nonce = crypto::compute_nonce(&piv, &kid, context.common_iv());
    let plaintext =
        crypto::open(context.recipient_key(), &nonce, &aad, ciphertext)?;

    // Only commit the sequence number now that the tag checked out
    context.record_replay(sequence_number);

    Ok(plaintext)
}

/// Recovers the plaintext of a protected response.
///
/// Responses are bound to the request they answer, so the caller supplies
/// the partial IV its request was protected with. Response replay
/// protection is that binding; the replay window isn't involved.
pub fn unprotect_response(
    context: &mut SecurityContext,
    option: &[u8],
    ciphertext: &[u8],
    request_piv: &[u8],
) -> Result<Vec<u8>> {
    let option = OscoreOption::decode(option)?;
    // The AAD refers to the request this response answers
    let aad = crypto::build_aad(context.sender_id(), request_piv)?;

    let nonce = match &option.partial_iv {
        // The peer spent an own sequence number
        Some(piv) => crypto::compute_nonce(
            piv,
            context.recipient_id(),
            context.common_iv(),
        ),
        // The peer reused the nonce of our request
        None => crypto::compute_nonce(
            request_piv,
            context.sender_id(),
            context.common_iv(),
        ),
    };

    crypto::open(context.recipient_key(), &nonce, &aad, ciphertext)
}
