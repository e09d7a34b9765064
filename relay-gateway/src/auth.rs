//! Identity verification for the websocket handshake.
//!
//! A client proves control of an address by signing the exact bytes of its
//! auth payload with the secp256k1 key behind that address, personal-sign
//! style: a 65-byte recoverable ECDSA signature over the keccak256 hash of
//! `"\x19Ethereum Signed Message:\n" + len(payload) + payload`. Verification
//! recovers the signer from the signature and compares the derived address
//! against the claimed one. No retries, no side effects.

use alloy::primitives::eip191_hash_message;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use relay_types::Address;

/// All the ways a signature can fail to prove control of an address.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The signature string does not start with `0x`.
    #[error("signature must be 0x-prefixed hex")]
    MissingHexPrefix,
    /// The signature string is not valid hex.
    #[error("signature is not valid hex: {0}")]
    SignatureEncoding(#[from] alloy::primitives::hex::FromHexError),
    /// The signature does not decode to exactly 65 bytes.
    #[error("expected a 65 byte signature, got {0} bytes")]
    SignatureLength(usize),
    /// The trailing recovery byte is out of range.
    #[error("recovery byte must be 27 or 28, got {0}")]
    RecoveryByte(u8),
    /// The curve rejected the signature or recovery failed.
    #[error("could not recover signer: {0}")]
    Recovery(#[from] k256::ecdsa::Error),
    /// The recovered signer is not the claimed address.
    #[error("signature does not prove ownership of {claimed}")]
    AddressMismatch {
        /// The address the client claimed.
        claimed: Address,
        /// The address actually recovered from the signature.
        recovered: Address,
    },
}

/// Checks that `signature` proves control of `address` for the exact
/// `payload` string.
///
/// `signature` must be `0x`-prefixed hex decoding to 65 bytes, with the
/// trailing recovery byte equal to 27 or 28.
pub fn verify_signature(address: Address, payload: &str, signature: &str) -> Result<(), AuthError> {
    let hex = signature
        .strip_prefix("0x")
        .ok_or(AuthError::MissingHexPrefix)?;
    let sig = alloy::primitives::hex::decode(hex)?;
    if sig.len() != 65 {
        return Err(AuthError::SignatureLength(sig.len()));
    }
    let v = sig[64];
    if v != 27 && v != 28 {
        return Err(AuthError::RecoveryByte(v));
    }
    let recovery_id = RecoveryId::from_byte(v - 27).expect("0 and 1 are valid recovery ids");
    let signature = Signature::from_slice(&sig[..64])?;

    let digest = eip191_hash_message(payload.as_bytes());
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)?;
    let recovered = address_of_key(&key);
    if recovered != address {
        return Err(AuthError::AddressMismatch {
            claimed: address,
            recovered,
        });
    }
    Ok(())
}

/// Derives the account address of a secp256k1 public key: the last 20 bytes
/// of the keccak256 hash of the uncompressed point.
pub fn address_of_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // skip the SEC1 uncompressed tag byte
    Address::new(alloy::primitives::Address::from_raw_public_key(
        &point.as_bytes()[1..],
    ))
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;

    const ADDRESS: &str = "0x33a8122f5c41eee796de9da8d63af7670f310964";
    const CHALLENGE: &str = "it is 2021-12-21 20:39:56.673319933 +0000 UTC";
    const SIGNATURE: &str = "0x04c257dea26031415f48776068a0549d6acce6b28c9095bba02e4d82757c3b944db2c94774ef6a63cd6374a49652c60e380f2fd681b65f2f2423e6bc6c3d67d61b";

    fn address() -> Address {
        ADDRESS.parse().unwrap()
    }

    fn sign(key: &SigningKey, payload: &str) -> String {
        let digest = eip191_hash_message(payload.as_bytes());
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(digest.as_slice())
            .expect("can sign");
        format!(
            "0x{}{:02x}",
            alloy::primitives::hex::encode(signature.to_bytes()),
            recovery_id.to_byte() + 27
        )
    }

    #[test]
    fn accepts_a_valid_signature() {
        verify_signature(address(), CHALLENGE, SIGNATURE).unwrap();
    }

    #[test]
    fn rejects_a_tampered_signature() {
        // 0x14... instead of the expected 0x04...
        let tampered = SIGNATURE.replacen("0x04", "0x14", 1);
        assert!(verify_signature(address(), CHALLENGE, &tampered).is_err());
    }

    #[test]
    fn rejects_extra_trailing_bytes() {
        let too_long = format!("{SIGNATURE}0000");
        assert!(matches!(
            verify_signature(address(), CHALLENGE, &too_long),
            Err(AuthError::SignatureLength(67))
        ));
    }

    #[test]
    fn rejects_short_and_busted_signatures() {
        assert!(matches!(
            verify_signature(address(), CHALLENGE, "0x00"),
            Err(AuthError::SignatureLength(1))
        ));
        let busted = format!("0x{}", "00".repeat(65));
        assert!(verify_signature(address(), CHALLENGE, &busted).is_err());
    }

    #[test]
    fn rejects_tiny_inputs() {
        assert!(verify_signature(address(), "", "0x").is_err());
    }

    #[test]
    fn rejects_a_missing_hex_prefix() {
        assert!(matches!(
            verify_signature(address(), CHALLENGE, SIGNATURE.trim_start_matches("0x")),
            Err(AuthError::MissingHexPrefix)
        ));
    }

    #[test]
    fn rejects_recovery_bytes_out_of_range() {
        for v in ["00", "1a", "1d", "ff"] {
            let mangled = format!("{}{v}", &SIGNATURE[..SIGNATURE.len() - 2]);
            assert!(matches!(
                verify_signature(address(), CHALLENGE, &mangled),
                Err(AuthError::RecoveryByte(_))
            ));
        }
    }

    #[test]
    fn round_trips_a_fresh_key() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of_key(key.verifying_key());
        let payload = r#"{"address":"0x0","expiresAt":0}"#;
        let signature = sign(&key, payload);
        verify_signature(address, payload, &signature).unwrap();
    }

    #[test]
    fn any_flipped_signature_bit_fails() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of_key(key.verifying_key());
        let payload = "challenge";
        let signature = sign(&key, payload);
        let mut bytes = alloy::primitives::hex::decode(&signature[2..]).unwrap();
        // flip one bit in r; the recovered key changes and the address no longer matches
        bytes[3] ^= 0x01;
        let flipped = format!("0x{}", alloy::primitives::hex::encode(&bytes));
        assert!(verify_signature(address, payload, &flipped).is_err());
    }

    #[test]
    fn rejects_the_wrong_claimed_address() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let other = address_of_key(SigningKey::random(&mut rand::thread_rng()).verifying_key());
        let payload = "challenge";
        let signature = sign(&key, payload);
        assert!(matches!(
            verify_signature(other, payload, &signature),
            Err(AuthError::AddressMismatch { .. })
        ));
    }
}
