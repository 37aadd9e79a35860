//! Protection of full CoAP messages.
//!
//! This is the glue between the byte-level pipeline and a CoAP transport:
//! options are split by protection class, with class E options moving into
//! the encrypted inner message and class U options staying visible on the
//! outer one, and the outer code is flattened to POST/Changed so observers
//! learn nothing from it.

use alloc::vec::Vec;
use coap_lite::{
    CoapOption, MessageClass, Packet, RequestType, ResponseType,
};
use core::mem;

use crate::{
    context::SecurityContext, error::Error, option::OscoreOption, pipeline,
    Result,
};

/// The known class U options that have to remain public.
static CLASS_U: [CoapOption; 3] = [
    CoapOption::UriHost,
    CoapOption::UriPort,
    CoapOption::ProxyScheme,
];
/// The optional features we reject instead of protecting incorrectly.
static UNSUPPORTED: [CoapOption; 7] = [
    CoapOption::Observe,
    CoapOption::Block2,
    CoapOption::Block1,
    CoapOption::Size2,
    CoapOption::Size1,
    CoapOption::NoResponse,
    CoapOption::ProxyUri,
];

impl SecurityContext {
    /// Returns an OSCORE message based on the original CoAP request.
    ///
    /// # Arguments
    /// * `coap_msg` - The original CoAP request to protect.
    pub fn protect_request(&mut self, coap_msg: &[u8]) -> Result<Vec<u8>> {
        let (outer, inner_bytes) = split_message(coap_msg)?;
        let protected = pipeline::protect_request(self, &inner_bytes)?;

        assemble_protected(outer, protected)
    }

    /// Returns an OSCORE message based on the original CoAP response.
    ///
    /// # Arguments
    /// * `coap_msg` - The original CoAP response to protect.
    /// * `request` - The protected request to which this responds.
    ///   Necessary to extract its kid and partial IV.
    /// * `reuse_piv` - Whether the request's partial IV should be reused.
    ///   Otherwise an own sender sequence number is spent.
    pub fn protect_response(
        &mut self,
        coap_msg: &[u8],
        request: &[u8],
        reuse_piv: bool,
    ) -> Result<Vec<u8>> {
        let request = Packet::from_bytes(request)?;
        let (request_kid, request_piv) =
            request_correlation(oscore_option(&request)?)?;

        let (outer, inner_bytes) = split_message(coap_msg)?;
        let protected = pipeline::protect_response(
            self,
            &inner_bytes,
            &request_kid,
            &request_piv,
            reuse_piv,
        )?;

        assemble_protected(outer, protected)
    }

    /// Returns the original CoAP request protected in the OSCORE message.
    ///
    /// # Arguments
    /// * `oscore_msg` - The OSCORE message protecting the CoAP request.
    pub fn unprotect_request(
        &mut self,
        oscore_msg: &[u8],
    ) -> Result<Vec<u8>> {
        let outer = Packet::from_bytes(oscore_msg)?;
        let option_value = oscore_option_value(&outer)?;
        let plaintext = pipeline::unprotect_request(
            self,
            &option_value,
            &outer.payload,
        )?;

        merge_message(outer, &plaintext)
    }

    /// Returns the original CoAP response protected in the OSCORE message.
    ///
    /// # Arguments
    /// * `oscore_msg` - The OSCORE message protecting the CoAP response.
    /// * `request` - The protected request this responds to. Necessary to
    ///   extract the partial IV the exchange is bound to.
    pub fn unprotect_response(
        &mut self,
        oscore_msg: &[u8],
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let request = Packet::from_bytes(request)?;
        let (_, request_piv) =
            request_correlation(oscore_option(&request)?)?;

        let outer = Packet::from_bytes(oscore_msg)?;
        let option_value = oscore_option_value(&outer)?;
        let plaintext = pipeline::unprotect_response(
            self,
            &option_value,
            &outer.payload,
            &request_piv,
        )?;

        merge_message(outer, &plaintext)
    }
}

/// Returns the OSCORE option value of a protected message.
fn oscore_option_value(packet: &Packet) -> Result<Vec<u8>> {
    Ok(packet
        .get_option(CoapOption::Oscore)
        .and_then(|values| values.front())
        .ok_or(Error::NoOscoreOption)?
        .clone())
}

/// Returns the decoded OSCORE option of a protected message.
fn oscore_option(packet: &Packet) -> Result<OscoreOption> {
    OscoreOption::decode(&oscore_option_value(packet)?)
}

/// Returns the kid and partial IV a request was protected with.
fn request_correlation(option: OscoreOption) -> Result<(Vec<u8>, Vec<u8>)> {
    let kid = option.kid.ok_or(Error::MissingKid)?;
    let piv = option.partial_iv.ok_or(Error::MalformedOption)?;

    Ok((kid, piv))
}

/// Splits a CoAP message into the outer packet and the serialized inner
/// message (code, class E options and payload).
fn split_message(coap_msg: &[u8]) -> Result<(Packet, Vec<u8>)> {
    let mut outer = Packet::from_bytes(coap_msg)?;
    let mut inner = Packet::new();

    // The real code moves into the encrypted inner message
    inner.header.code = outer.header.code;
    // The outer code carries no information
    outer.header.code = match outer.header.code {
        // All responses get Changed
        MessageClass::Response(_) => {
            MessageClass::Response(ResponseType::Changed)
        }
        // All requests (and unknown + reserved) get POST
        _ => MessageClass::Request(RequestType::Post),
    };

    // Go over options, moving class E ones into the inner message
    let mut moved_options = vec![];
    for (number, value_list) in outer.options() {
        let option = CoapOption::from(*number);

        // Abort on unimplemented optional features
        if UNSUPPORTED.contains(&option) {
            return Err(Error::UnsupportedOption(option));
        }
        // Skip class U options
        if CLASS_U.contains(&option) {
            continue;
        }

        // At this point the option is class E or undefined, so protect it
        inner.set_option(option, value_list.clone());
        moved_options.push(option);
    }
    // Remove the moved options from the outer message
    for option in moved_options {
        outer.clear_option(option);
    }

    // The payload is always protected
    inner.payload = mem::take(&mut outer.payload);

    // Serialize the inner message and strip the first header byte as well
    // as the message ID and token, leaving code | options | payload
    let mut inner_bytes = inner.to_bytes()?;
    let tkl = inner.header.get_token_length();
    inner_bytes.drain(2..4 + tkl as usize);
    inner_bytes.remove(0);

    Ok((outer, inner_bytes))
}

/// Places the protection result on the outer message and serializes it.
fn assemble_protected(
    mut outer: Packet,
    protected: pipeline::OscoreObject,
) -> Result<Vec<u8>> {
    outer.payload = protected.ciphertext;
    outer.add_option(CoapOption::Oscore, protected.option);

    Ok(outer.to_bytes()?)
}

/// Rebuilds the original CoAP message from the outer packet and the
/// decrypted inner bytes.
fn merge_message(mut outer: Packet, plaintext: &[u8]) -> Result<Vec<u8>> {
    // Go over options, remembering class E ones to discard
    let mut to_discard = vec![];
    for (number, _) in outer.options() {
        let option = CoapOption::from(*number);

        // Abort on unimplemented optional features
        if UNSUPPORTED.contains(&option) {
            return Err(Error::UnsupportedOption(option));
        }
        // Skip class U options
        if CLASS_U.contains(&option) {
            continue;
        }

        to_discard.push(option);
    }
    // Discard class E options, the OSCORE option among them
    for option in to_discard {
        outer.clear_option(option);
    }

    // The plaintext is code | class E options | payload; give it a CoAP
    // header again so it parses as a message
    let (&code, rest) =
        plaintext.split_first().ok_or(Error::MalformedPlaintext)?;
    // [ver_t_tkl, code, message_id, message_id]
    let mut inner_bytes = vec![0x40, code, 0x00, 0x00];
    inner_bytes.extend_from_slice(rest);
    let inner = Packet::from_bytes(&inner_bytes)?;

    // Restore the code from the inner message
    outer.header.code = inner.header.code;
    // Restore the options from the inner message
    for (number, value_list) in inner.options() {
        outer.set_option((*number).into(), value_list.clone());
    }
    // Restore the payload from the inner message
    outer.payload = inner.payload;

    Ok(outer.to_bytes()?)
}
