//! Payload encryption for turn commands and per-player state: an ECDH
//! shared secret per (sender, recipient) pair keys a ChaCha20-Poly1305
//! AEAD; the random nonce travels in front of the ciphertext, base64 over
//! the whole thing. Tampering fails the tag check, never returns garbage.

use crate::identity::Identity;
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use secp256k1::{Parity, PublicKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// ECDH over the x-only peer key, hashed down to a symmetric key. The
/// derivation is symmetric in the pair, so either side recovers the same
/// key from its own secret and the other's pubkey.
fn shared_key(identity: &Identity, peer_pubkey_hex: &str) -> Result<[u8; 32]> {
    let xonly = XOnlyPublicKey::from_slice(&hex::decode(peer_pubkey_hex.trim()).context("peer pubkey is not hex")?)
        .context("peer pubkey is not a valid x-only key")?;
    let peer = PublicKey::from_x_only_public_key(xonly, Parity::Even);
    let point = secp256k1::ecdh::shared_secret_point(&peer, &identity.keypair().secret_key());
    // x coordinate only, per the usual convention
    let digest = Sha256::digest(&point[..32]);
    Ok(digest.into())
}

pub fn encrypt(identity: &Identity, peer_pubkey_hex: &str, plaintext: &[u8]) -> Result<String> {
    let key = shared_key(identity, peer_pubkey_hex)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| anyhow!("encryption failed"))?;

    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(framed))
}

pub fn decrypt(identity: &Identity, peer_pubkey_hex: &str, content: &str) -> Result<Vec<u8>> {
    let framed = BASE64.decode(content.trim()).context("payload is not base64")?;
    if framed.len() <= NONCE_LEN {
        bail!("payload too short to carry a nonce");
    }
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);

    let key = shared_key(identity, peer_pubkey_hex)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("AEAD authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn either_side_decrypts_what_the_other_sealed() {
        let daemon = Identity::generate();
        let player = Identity::generate();

        let sealed = encrypt(&daemon, &player.public_hex(), b"orders turn=1 house=1").unwrap();
        let opened = decrypt(&player, &daemon.public_hex(), &sealed).unwrap();
        assert_eq!(opened, b"orders turn=1 house=1");

        let sealed_back = encrypt(&player, &daemon.public_hex(), b"reply").unwrap();
        assert_eq!(decrypt(&daemon, &player.public_hex(), &sealed_back).unwrap(), b"reply");
    }

    #[test]
    fn any_bit_flip_fails_authentication() {
        let daemon = Identity::generate();
        let player = Identity::generate();
        let sealed = encrypt(&daemon, &player.public_hex(), b"secret state").unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);

        assert!(decrypt(&player, &daemon.public_hex(), &tampered).is_err());
    }

    #[test]
    fn wrong_recipient_cannot_decrypt() {
        let daemon = Identity::generate();
        let player = Identity::generate();
        let eavesdropper = Identity::generate();

        let sealed = encrypt(&daemon, &player.public_hex(), b"for player only").unwrap();
        assert!(decrypt(&eavesdropper, &daemon.public_hex(), &sealed).is_err());
    }
}
