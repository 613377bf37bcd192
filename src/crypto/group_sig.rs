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

//! Pairing-based group signatures on BLS12-381.
//!
//! A member key is a randomizable Pointcheval-Sanders-style credential
//! `(sigma1, sigma2) = (t*P1, t*(x + y*m)*P1)` over the group authority's
//! secret `(x, y)`, where `m` is the member's permanent secret identifier.
//! Verification checks the pairing relation `e(sigma1, X2 + m*Y2) =
//! e(sigma2, P2)` without learning `m`, via a Schnorr proof of knowledge
//! run in the target group `GT` (arkworks represents `GT` additively, so
//! what textbooks write as `B^m` appears below as `B * m`).
//!
//! Opening recovers the signer by brute-force matching the signature's
//! derived `GT` values against the small table of `m` values the
//! authority issued — practical at the group sizes a contact list has.
//! Revocation re-keys the authority's secret by a random delta and
//! re-binds every surviving member's `sigma2`; the revoked member's own
//! key is left unbound to the new secret and therefore stops verifying.

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{pairing::Pairing, CurveGroup, PrimeGroup};
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use sha2::{Digest, Sha256};

use crate::{error::CryptoError, rng::Csprng};

fn hash_to_fr(parts: &[&[u8]]) -> Fr {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    Fr::from_le_bytes_mod_order(&hasher.finalize())
}

fn rand_fr(rng: &Csprng) -> Fr {
    // arkworks' UniformRand needs an `ark_std::rand::RngCore`; OS entropy
    // via `Csprng` is fed through a seeded ChaCha rng for the trait bound.
    let seed = rng.bytes32();
    let mut chacha = rand_chacha::ChaCha20Rng::from_seed_bytes(seed);
    Fr::rand(&mut chacha)
}

/// Minimal adapter so `ark_std`'s `rand` (a pinned fork of the `rand`
/// crate) can be seeded from our shared CSPRNG.
mod rand_chacha {
    pub use ::rand_chacha::ChaCha20Rng;

    pub trait FromSeedBytes {
        fn from_seed_bytes(seed: [u8; 32]) -> Self;
    }

    impl FromSeedBytes for ChaCha20Rng {
        fn from_seed_bytes(seed: [u8; 32]) -> Self {
            use rand_core::SeedableRng;
            ChaCha20Rng::from_seed(seed)
        }
    }
}

fn ser<T: CanonicalSerialize>(v: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    v.serialize_compressed(&mut buf).expect("serialization of a valid curve point cannot fail");
    buf
}

fn de<T: CanonicalDeserialize>(bytes: &[u8]) -> Result<T, CryptoError> {
    T::deserialize_compressed(bytes).map_err(|_| CryptoError::BadGroupSignature)
}

/// The group authority's current secret key, generation counter, and the
/// private table of issued members needed to open signatures.
#[derive(Clone)]
pub struct GroupPrivate {
    pub x: Fr,
    pub y: Fr,
    pub generation: u64,
    members: Vec<(Fr, Tag)>,
}

/// The public half, distributed to every member and used for verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupPublic {
    pub x2: [u8; 96],
    pub y2: [u8; 96],
    pub generation: u64,
}

/// A member's randomizable credential.
#[derive(Clone)]
pub struct MemberKey {
    m: Fr,
    sigma1: G1Affine,
    sigma2: G1Affine,
    pub generation: u64,
    tag: Tag,
}

/// The opaque value an opening reveals: identifies the signer to the
/// group authority, without being derivable by an ordinary verifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 32]);

/// An anonymous proof of group membership over a message digest.
#[derive(Clone)]
pub struct GroupSignature {
    sigma1: G1Affine,
    sigma2: G1Affine,
    commit: Vec<u8>, // serialized GT commitment R
    response: Fr,
}

/// Shifts the authority's secret and re-binds every surviving member's
/// credential; the targeted member's key is excluded and left stale.
#[derive(Clone)]
pub struct Revocation {
    pub generation: u64,
    target_m: Fr,
    delta_x: Fr,
    delta_y: Fr,
}

impl Revocation {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 32 * 3);
        out.extend_from_slice(&self.generation.to_le_bytes());
        out.extend_from_slice(&ser(&self.target_m));
        out.extend_from_slice(&ser(&self.delta_x));
        out.extend_from_slice(&ser(&self.delta_y));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < 8 + 32 * 3 {
            return Err(CryptoError::BadGroupSignature)
        }
        let generation = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let target_m: Fr = de(&bytes[8..40])?;
        let delta_x: Fr = de(&bytes[40..72])?;
        let delta_y: Fr = de(&bytes[72..104])?;
        Ok(Self { generation, target_m, delta_x, delta_y })
    }
}

impl GroupPrivate {
    pub fn generate(rng: &Csprng) -> Self {
        Self { x: rand_fr(rng), y: rand_fr(rng), generation: 0, members: Vec::new() }
    }

    pub fn public(&self) -> GroupPublic {
        let x2 = (G2Projective::generator() * self.x).into_affine();
        let y2 = (G2Projective::generator() * self.y).into_affine();
        let x2v = ser(&x2);
        let y2v = ser(&y2);
        // G2Affine compresses to 96 bytes on BLS12-381.
        let mut x2_fixed = [0u8; 96];
        let mut y2_fixed = [0u8; 96];
        x2_fixed[..x2v.len().min(96)].copy_from_slice(&x2v[..x2v.len().min(96)]);
        y2_fixed[..y2v.len().min(96)].copy_from_slice(&y2v[..y2v.len().min(96)]);
        GroupPublic { x2: x2_fixed, y2: y2_fixed, generation: self.generation }
    }

    /// Issues a fresh, permanent member identifier bound to the current
    /// authority secret, and records it in the opening table.
    pub fn issue_member(&mut self, rng: &Csprng) -> MemberKey {
        let m = rand_fr(rng);
        let sigma1 = G1Projective::generator();
        let sigma2 = sigma1 * (self.x + self.y * m);
        let tag = Tag(tag_bytes(&m));
        self.members.push((m, tag));
        MemberKey {
            m,
            sigma1: sigma1.into_affine(),
            sigma2: sigma2.into_affine(),
            generation: self.generation,
            tag,
        }
    }

    /// Re-keys the authority secret away from `member` and returns the
    /// token needed to re-bind every other member's credential.
    pub fn generate_revocation(&mut self, member: &MemberKey) -> Revocation {
        let rng = Csprng::new();
        let delta_x = rand_fr(&rng);
        let delta_y = rand_fr(&rng);
        self.x += delta_x;
        self.y += delta_y;
        self.generation += 1;
        Revocation { generation: self.generation, target_m: member.m, delta_x, delta_y }
    }

    /// A deep copy retained so messages signed before this revocation
    /// (and not yet re-bound) can still be verified and opened.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Serializes the full authority secret, including the private
    /// opening table, so a reloaded authority can still open signatures
    /// from members issued before the save.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 32 + 8 + 4 + self.members.len() * 64);
        out.extend_from_slice(&ser(&self.x));
        out.extend_from_slice(&ser(&self.y));
        out.extend_from_slice(&self.generation.to_le_bytes());
        out.extend_from_slice(&(self.members.len() as u32).to_le_bytes());
        for (m, tag) in &self.members {
            out.extend_from_slice(&ser(m));
            out.extend_from_slice(&tag.0);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < 32 + 32 + 8 + 4 {
            return Err(CryptoError::BadGroupSignature)
        }
        let x: Fr = de(&bytes[0..32])?;
        let y: Fr = de(&bytes[32..64])?;
        let generation = u64::from_le_bytes(bytes[64..72].try_into().unwrap());
        let count = u32::from_le_bytes(bytes[72..76].try_into().unwrap()) as usize;

        let mut cursor = &bytes[76..];
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            if cursor.len() < 64 {
                return Err(CryptoError::BadGroupSignature)
            }
            let m: Fr = de(&cursor[0..32])?;
            let mut tag_bytes = [0u8; 32];
            tag_bytes.copy_from_slice(&cursor[32..64]);
            members.push((m, Tag(tag_bytes)));
            cursor = &cursor[64..];
        }

        Ok(Self { x, y, generation, members })
    }

    pub fn open(&self, sig: &GroupSignature) -> Result<Tag, CryptoError> {
        let x2 = (G2Projective::generator() * self.x).into_affine();
        let y2 = (G2Projective::generator() * self.y).into_affine();
        let a = Bls12_381::pairing(sig.sigma1, x2);
        let b = Bls12_381::pairing(sig.sigma1, y2);
        let cc = Bls12_381::pairing(sig.sigma2, G2Affine::from(G2Projective::generator()));
        for (m, tag) in &self.members {
            if cc == a + b * *m {
                return Ok(*tag)
            }
        }
        Err(CryptoError::TagRecoveryFailed)
    }
}

impl GroupPublic {
    fn points(&self) -> Result<(G2Affine, G2Affine), CryptoError> {
        let x2: G2Affine = de(&self.x2)?;
        let y2: G2Affine = de(&self.y2)?;
        Ok((x2, y2))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + 96 + 8);
        out.extend_from_slice(&self.x2);
        out.extend_from_slice(&self.y2);
        out.extend_from_slice(&self.generation.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 96 + 96 + 8 {
            return Err(CryptoError::BadGroupSignature)
        }
        let mut x2 = [0u8; 96];
        let mut y2 = [0u8; 96];
        x2.copy_from_slice(&bytes[0..96]);
        y2.copy_from_slice(&bytes[96..192]);
        let generation = u64::from_le_bytes(bytes[192..200].try_into().unwrap());
        Ok(Self { x2, y2, generation })
    }
}

impl MemberKey {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ser(&self.m));
        out.extend_from_slice(&ser(&self.sigma1));
        out.extend_from_slice(&ser(&self.sigma2));
        out.extend_from_slice(&self.generation.to_le_bytes());
        out.extend_from_slice(&self.tag.0);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        // Fr (32B) || G1Affine compressed (48B) || G1Affine compressed (48B)
        // || generation (8B) || tag (32B)
        if bytes.len() < 32 + 48 + 48 + 8 + 32 {
            return Err(CryptoError::BadGroupSignature)
        }
        let m: Fr = de(&bytes[0..32])?;
        let sigma1: G1Affine = de(&bytes[32..80])?;
        let sigma2: G1Affine = de(&bytes[80..128])?;
        let generation = u64::from_le_bytes(bytes[128..136].try_into().unwrap());
        let mut tag_bytes = [0u8; 32];
        tag_bytes.copy_from_slice(&bytes[136..168]);
        Ok(Self { m, sigma1, sigma2, generation, tag: Tag(tag_bytes) })
    }

    /// Re-binds this credential to the authority's new secret, unless it
    /// is the member being revoked, in which case the key is left stale
    /// under the old secret and will never verify again.
    pub fn update(&mut self, rev: &Revocation) -> bool {
        if self.m == rev.target_m {
            return false
        }
        let delta = (G1Projective::from(self.sigma1) * (rev.delta_x + rev.delta_y * self.m))
            .into_affine();
        self.sigma2 = (G1Projective::from(self.sigma2) + G1Projective::from(delta)).into_affine();
        self.generation = rev.generation;
        true
    }
}

impl GroupSignature {
    /// Serializes the signature for embedding in a wire envelope.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let s1 = ser(&self.sigma1);
        let s2 = ser(&self.sigma2);
        out.extend_from_slice(&(s1.len() as u16).to_le_bytes());
        out.extend_from_slice(&s1);
        out.extend_from_slice(&(s2.len() as u16).to_le_bytes());
        out.extend_from_slice(&s2);
        out.extend_from_slice(&(self.commit.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.commit);
        out.extend_from_slice(&ser(&self.response));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut cursor = bytes;
        let take_block = |cursor: &mut &[u8]| -> Result<Vec<u8>, CryptoError> {
            if cursor.len() < 2 {
                return Err(CryptoError::BadGroupSignature)
            }
            let len = u16::from_le_bytes([cursor[0], cursor[1]]) as usize;
            *cursor = &cursor[2..];
            if cursor.len() < len {
                return Err(CryptoError::BadGroupSignature)
            }
            let block = cursor[..len].to_vec();
            *cursor = &cursor[len..];
            Ok(block)
        };

        let s1 = take_block(&mut cursor)?;
        let s2 = take_block(&mut cursor)?;
        let commit = take_block(&mut cursor)?;
        let sigma1: G1Affine = de(&s1)?;
        let sigma2: G1Affine = de(&s2)?;
        let response: Fr = de(cursor)?;

        Ok(Self { sigma1, sigma2, commit, response })
    }
}

fn tag_bytes(m: &Fr) -> [u8; 32] {
    let mut buf = Vec::new();
    m.serialize_compressed(&mut buf).expect("Fr serialization cannot fail");
    let mut out = [0u8; 32];
    out[..buf.len().min(32)].copy_from_slice(&buf[..buf.len().min(32)]);
    out
}

/// Produces an anonymous proof that `member` belongs to `group_pub`'s
/// group and binds it to `digest`.
pub fn group_sign(
    member: &MemberKey,
    group_pub: &GroupPublic,
    digest: &[u8],
) -> Result<GroupSignature, CryptoError> {
    let (_x2, y2) = group_pub.points()?;
    let rng = Csprng::new();
    let t = rand_fr(&rng);
    let sigma1 = (G1Projective::from(member.sigma1) * t).into_affine();
    let sigma2 = (G1Projective::from(member.sigma2) * t).into_affine();

    let b = Bls12_381::pairing(sigma1, y2);
    let t2 = rand_fr(&rng);
    let commit = b * t2;
    let commit_bytes = ser(&commit);

    let c = hash_to_fr(&[&commit_bytes, &ser(&sigma1), &ser(&sigma2), digest]);
    let response = t2 + c * member.m;

    Ok(GroupSignature { sigma1, sigma2, commit: commit_bytes, response })
}

pub fn group_verify(
    group_pub: &GroupPublic,
    digest: &[u8],
    sig: &GroupSignature,
) -> Result<(), CryptoError> {
    let (x2, y2) = group_pub.points()?;
    let a = Bls12_381::pairing(sig.sigma1, x2);
    let b = Bls12_381::pairing(sig.sigma1, y2);
    let cc = Bls12_381::pairing(sig.sigma2, G2Affine::from(G2Projective::generator()));

    let r: ark_ec::pairing::PairingOutput<Bls12_381> = de(&sig.commit)?;
    let c = hash_to_fr(&[&sig.commit, &ser(&sig.sigma1), &ser(&sig.sigma2), digest]);

    let lhs = b * sig.response;
    let rhs = r + (cc - a) * c;
    if lhs == rhs {
        Ok(())
    } else {
        Err(CryptoError::BadGroupSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_and_open_round_trip() {
        let rng = Csprng::new();
        let mut authority = GroupPrivate::generate(&rng);
        let member = authority.issue_member(&rng);
        let group_pub = authority.public();

        let digest = b"some sealed message digest";
        let sig = group_sign(&member, &group_pub, digest).unwrap();
        assert!(group_verify(&group_pub, digest, &sig).is_ok());

        let tag = authority.open(&sig).unwrap();
        assert_eq!(tag, member.tag());
    }

    #[test]
    fn wrong_digest_fails_verification() {
        let rng = Csprng::new();
        let mut authority = GroupPrivate::generate(&rng);
        let member = authority.issue_member(&rng);
        let group_pub = authority.public();

        let sig = group_sign(&member, &group_pub, b"message one").unwrap();
        assert!(group_verify(&group_pub, b"message two", &sig).is_err());
    }

    #[test]
    fn revocation_blocks_only_the_target() {
        let rng = Csprng::new();
        let mut authority = GroupPrivate::generate(&rng);
        let mut alice = authority.issue_member(&rng);
        let mut bob = authority.issue_member(&rng);

        let rev = authority.generate_revocation(&alice);
        assert!(!alice.update(&rev));
        assert!(bob.update(&rev));

        let group_pub = authority.public();
        let digest = b"after revocation";
        let bob_sig = group_sign(&bob, &group_pub, digest).unwrap();
        assert!(group_verify(&group_pub, digest, &bob_sig).is_ok());

        // Alice's credential is still bound to the pre-revocation secret
        // and therefore fails to verify against the rekeyed public key.
        let alice_sig = group_sign(&alice, &group_pub, digest);
        if let Ok(sig) = alice_sig {
            assert!(group_verify(&group_pub, digest, &sig).is_err());
        }
    }

    #[test]
    fn generation_increases_monotonically() {
        let rng = Csprng::new();
        let mut authority = GroupPrivate::generate(&rng);
        let a = authority.issue_member(&rng);
        let gen0 = authority.generation;
        authority.generate_revocation(&a);
        assert_eq!(authority.generation, gen0 + 1);
    }
}
