//! The cryptographic building blocks: HKDF key schedule, nonce and AAD
//! construction and the AEAD itself.

use aes::Aes128;
use alloc::vec::Vec;
use ccm::{
    aead::{generic_array::GenericArray, Aead, NewAead, Payload},
    consts::{U13, U8},
    Ccm,
};
use hkdf::Hkdf;
use serde_bytes::Bytes;
use sha2::Sha256;

use crate::{cbor, Result};

/// The length of the AEAD key in bytes.
pub const KEY_LEN: usize = 16;
/// The length of the AEAD nonce in bytes.
pub const NONCE_LEN: usize = 13;
/// The COSE identifier of AES-CCM-16-64-128, the AEAD used here.
const ALG: i8 = 10;

/// AES-CCM with a 16 byte key, 8 byte tag and 13 byte nonce.
type CcmAes = Ccm<Aes128, U8, U13>;

/// Returns the CBOR encoded `info` structure for the key schedule.
///
/// # Arguments
/// * `id` - The sender ID or recipient ID (or empty for the IV).
/// * `id_context` - The kid context of the security context, if any.
/// * `type` - Either "Key" or "IV".
/// * `l` - The size of the key/nonce for the AEAD, in bytes.
pub fn build_info(
    id: &[u8],
    id_context: Option<&[u8]>,
    r#type: &str,
    l: usize,
) -> Result<Vec<u8>> {
    // (id, id_context, alg_aead, type, L)
    let info = (Bytes::new(id), id_context.map(Bytes::new), ALG, r#type, l);
    // Return the CBOR encoded version of that
    Ok(cbor::encode(info)?)
}

/// Returns the derived key/IV for this `info` structure.
///
/// This is deterministic in its inputs and runs exactly once per key and IV,
/// at context creation.
///
/// # Arguments
/// * `master_secret` - The master secret.
/// * `master_salt` - The master salt.
/// * `info` - The `info` structure, different for key and IV derivation.
/// * `l` - The size of the key/nonce for the AEAD used, in bytes.
pub fn hkdf(
    master_secret: &[u8],
    master_salt: &[u8],
    info: &[u8],
    l: usize,
) -> Result<Vec<u8>> {
    // This is the extract step, resulting in the pseudorandom key (PRK)
    let h = Hkdf::<Sha256>::new(Some(master_salt), master_secret);
    // Expand the PRK to the desired length output keying material (OKM)
    let mut okm = vec![0; l];
    h.expand(info, &mut okm)?;

    Ok(okm)
}

/// Returns the CBOR encoded AAD array.
///
/// Both ends build this from the request's kid and partial IV, so the AADs
/// used to seal and to open are identical, or authentication fails. There's
/// no argument for class I options, because the standard doesn't define any
/// at this point.
pub fn build_aad_array(
    request_kid: &[u8],
    request_piv: &[u8],
) -> Result<Vec<u8>> {
    // (oscore_version, algorithms, request_kid, request_piv, options)
    let arr = (
        1,
        [ALG],
        Bytes::new(request_kid),
        Bytes::new(request_piv),
        Bytes::new(&[]),
    );
    // Return the CBOR encoded version of that
    Ok(cbor::encode(arr)?)
}

/// Returns the AAD, the AAD array packed in an `Encrypt0` structure.
pub fn build_aad(request_kid: &[u8], request_piv: &[u8]) -> Result<Vec<u8>> {
    let aad_arr = build_aad_array(request_kid, request_piv)?;
    let aad = ("Encrypt0", Bytes::new(&[]), Bytes::new(&aad_arr));

    Ok(cbor::encode(aad)?)
}

/// Returns the nonce for the AEAD, the common IV XORed with a block holding
/// the ID length, the left-padded ID and the right-aligned partial IV.
pub fn compute_nonce(
    mut piv: &[u8],
    mut id_piv: &[u8],
    common_iv: &[u8; NONCE_LEN],
) -> [u8; NONCE_LEN] {
    // Since id_piv could be longer than it should, trim it if necessary
    if id_piv.len() > NONCE_LEN - 6 {
        id_piv = &id_piv[id_piv.len() - (NONCE_LEN - 6)..];
    }
    // Same for the piv itself
    if piv.len() > 5 {
        piv = &piv[piv.len() - 5..];
    }

    let mut nonce = [0; NONCE_LEN];
    // Left-pad the partial IV with zeros to exactly 5 bytes
    nonce[NONCE_LEN - piv.len()..].copy_from_slice(piv);
    // Left-pad the ID with zeros to exactly nonce length minus 6 bytes
    nonce[1 + NONCE_LEN - 6 - id_piv.len()..NONCE_LEN - 5]
        .copy_from_slice(id_piv);
    // The size of the ID goes in the leading byte
    nonce[0] = id_piv.len() as u8;
    // XOR with the common IV
    for (b1, b2) in nonce.iter_mut().zip(common_iv.iter()) {
        *b1 ^= b2;
    }

    nonce
}

/// Seals the plaintext, returning the ciphertext with the tag appended.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let ccm = CcmAes::new(GenericArray::from_slice(key));
    let ciphertext = ccm.encrypt(
        GenericArray::from_slice(nonce),
        Payload {
            aad,
            msg: plaintext,
        },
    )?;

    Ok(ciphertext)
}

/// Opens the ciphertext, verifying its tag against the AAD.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let ccm = CcmAes::new(GenericArray::from_slice(key));
    let plaintext = ccm.decrypt(
        GenericArray::from_slice(nonce),
        Payload {
            aad,
            msg: ciphertext,
        },
    )?;

    Ok(plaintext)
}

/// Returns the sequence number a partial IV stands for.
pub fn piv_to_u64(mut piv: &[u8]) -> u64 {
    // Trim the piv if it's too long
    if piv.len() > 8 {
        piv = &piv[piv.len() - 8..];
    }
    // Copy it into an appropriately sized array
    let mut piv_arr = [0; 8];
    piv_arr[8 - piv.len()..].copy_from_slice(piv);

    u64::from_be_bytes(piv_arr)
}

/// Returns the partial IV for a sequence number (no leading zero bytes).
pub fn format_piv(piv: u64) -> Vec<u8> {
    // Convert the sequence number to its byte representation
    let bytes = piv.to_be_bytes();
    // Find the index of the first byte that is not zero
    let first_nonzero = bytes.iter().position(|&x| x != 0);
    match first_nonzero {
        // If there is one, skip leading zero bytes and return the others
        Some(n) => bytes[n..].to_vec(),
        // If there isn't, we simply return 0
        None => vec![0x00],
    }
}
