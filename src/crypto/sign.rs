/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Ed25519 signing, used for identity signatures: proving possession of
//! an identity key during the transport handshake, and authenticating
//! revocation tokens end-to-end.

pub use ed25519_compact::{KeyPair, PublicKey, SecretKey, Signature};
use ed25519_compact::Seed;

use crate::{error::CryptoError, rng::Csprng};

/// Domain-separation prefix for revocation signatures (§ revocation protocol).
pub const REVOCATION_DOMAIN: &[u8] = b"revocation\0";
/// Domain-separation prefix for the transport handshake proof.
pub const HANDSHAKE_DOMAIN: &[u8] = b"handshake\0";

pub fn generate_signing_keypair(rng: &Csprng) -> KeyPair {
    KeyPair::from_seed(Seed::new(rng.bytes32()))
}

pub fn sign(secret: &SecretKey, msg: &[u8]) -> Signature {
    secret.sign(msg, None)
}

pub fn verify(public: &PublicKey, msg: &[u8], sig: &Signature) -> Result<(), CryptoError> {
    public.verify(msg, sig).map_err(|_| CryptoError::BadSignature)
}

/// Parses a raw 64-byte Ed25519 signature off the wire, per the invariant
/// that revocation signatures "must be exactly 64 bytes".
pub fn signature_from_bytes(bytes: &[u8]) -> Result<Signature, CryptoError> {
    if bytes.len() != Signature::BYTES {
        return Err(CryptoError::BadSignatureLength)
    }
    Signature::from_slice(bytes).map_err(|_| CryptoError::BadSignatureLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let rng = Csprng::new();
        let kp = generate_signing_keypair(&rng);
        let msg = b"hello";
        let sig = sign(&kp.sk, msg);
        assert!(verify(&kp.pk, msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let rng = Csprng::new();
        let kp = generate_signing_keypair(&rng);
        let sig = sign(&kp.sk, b"hello");
        assert!(verify(&kp.pk, b"hellp", &sig).is_err());
    }

    #[test]
    fn wrong_length_signature_rejected() {
        let bytes = [0u8; 10];
        assert!(signature_from_bytes(&bytes).is_err());
    }
}
