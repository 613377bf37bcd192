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

//! X25519 + XChaCha20-Poly1305 authenticated box, the same primitive
//! `crypto_box::ChaChaBox` gives the IRC salt box, but exposed with an
//! explicit caller-supplied nonce: the sealing protocol places nonces at
//! fixed offsets inside a larger envelope, so the box here never invents
//! its own framing.

pub use crypto_box::{PublicKey, SecretKey};
use crypto_box::{aead::Aead, ChaChaBox};

use crate::{error::CryptoError, rng::Csprng};

/// AEAD authentication tag overhead added by `ChaChaBox`.
pub const AEAD_OVERHEAD: usize = 16;
/// Nonce length used throughout the sealing protocol.
pub const NONCE_LEN: usize = 24;

pub fn generate_dh_keypair(rng: &Csprng) -> (SecretKey, PublicKey) {
    let bytes = rng.bytes32();
    let secret = SecretKey::from(bytes);
    let public = secret.public_key();
    (secret, public)
}

pub fn random_nonce(rng: &Csprng) -> [u8; NONCE_LEN] {
    rng.bytes24()
}

pub fn box_seal(
    plaintext: &[u8],
    nonce: &[u8; NONCE_LEN],
    their_pub: &PublicKey,
    my_priv: &SecretKey,
) -> Vec<u8> {
    let b = ChaChaBox::new(their_pub, my_priv);
    // The nonce is caller-managed and always freshly drawn, so an
    // encryption failure here would indicate a library bug, not bad input.
    b.encrypt((&nonce[..]).into(), plaintext)
        .expect("chacha box encryption cannot fail for valid inputs")
}

pub fn box_open(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    their_pub: &PublicKey,
    my_priv: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let b = ChaChaBox::new(their_pub, my_priv);
    b.decrypt((&nonce[..]).into(), ciphertext).map_err(|_| CryptoError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let rng = Csprng::new();
        let (a_priv, a_pub) = generate_dh_keypair(&rng);
        let (b_priv, b_pub) = generate_dh_keypair(&rng);
        let nonce = random_nonce(&rng);

        let ct = box_seal(b"hello pond", &nonce, &b_pub, &a_priv);
        let pt = box_open(&ct, &nonce, &a_pub, &b_priv).unwrap();
        assert_eq!(pt, b"hello pond");
    }

    #[test]
    fn wrong_key_fails() {
        let rng = Csprng::new();
        let (a_priv, a_pub) = generate_dh_keypair(&rng);
        let (_b_priv, b_pub) = generate_dh_keypair(&rng);
        let (c_priv, _c_pub) = generate_dh_keypair(&rng);
        let nonce = random_nonce(&rng);

        let ct = box_seal(b"hello pond", &nonce, &b_pub, &a_priv);
        assert!(box_open(&ct, &nonce, &a_pub, &c_priv).is_err());
    }
}
