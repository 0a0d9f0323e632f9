//! Relay event envelope: id over the canonical serialization, schnorr
//! signature with x-only keys, and the application tag vocabulary
//! (`g` game, `t` turn, `h` house).

use crate::identity::Identity;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use ec4x_domain::{GameId, HouseId};
use secp256k1::schnorr::Signature;
use secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const KIND_GAME_DEFINITION: u32 = 30400;
pub const KIND_SLOT_CLAIM: u32 = 30401;
pub const KIND_TURN_COMMAND: u32 = 30402;
pub const KIND_TURN_STATE: u32 = 30403;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

fn compute_id(pubkey: &str, created_at: i64, kind: u32, tags: &[Vec<String>], content: &str) -> Result<String> {
    let preimage = serde_json::to_string(&serde_json::json!([0, pubkey, created_at, kind, tags, content]))?;
    let digest = Sha256::digest(preimage.as_bytes());
    Ok(hex::encode(digest))
}

impl RelayEvent {
    /// Builds and signs an event with the daemon's (or a test player's)
    /// identity.
    pub fn sign(identity: &Identity, kind: u32, tags: Vec<Vec<String>>, content: String) -> Result<Self> {
        let pubkey = identity.public_hex();
        let created_at = Utc::now().timestamp();
        let id = compute_id(&pubkey, created_at, kind, &tags, &content)?;

        let digest: [u8; 32] = hex::decode(&id)?
            .try_into()
            .map_err(|_| anyhow!("event id is not 32 bytes"))?;
        let secp = Secp256k1::new();
        let sig = secp.sign_schnorr(&Message::from_digest(digest), identity.keypair());

        Ok(Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: hex::encode(sig.as_ref()),
        })
    }

    /// Checks the id recomputation and the signature against the claimed
    /// pubkey. Any mismatch is a crypto error; the caller drops the event.
    pub fn verify(&self) -> Result<()> {
        let expected = compute_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if expected != self.id {
            bail!("event id mismatch (claimed {}, computed {})", &self.id[..8.min(self.id.len())], &expected[..8]);
        }
        let digest: [u8; 32] = hex::decode(&self.id)
            .context("event id is not hex")?
            .try_into()
            .map_err(|_| anyhow!("event id is not 32 bytes"))?;
        let pubkey = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey).context("pubkey is not hex")?)
            .context("pubkey is not a valid x-only key")?;
        let sig = Signature::from_slice(&hex::decode(&self.sig).context("sig is not hex")?)
            .context("sig is not a valid schnorr signature")?;
        let secp = Secp256k1::new();
        secp.verify_schnorr(&sig, &Message::from_digest(digest), &pubkey)
            .context("schnorr verification failed")?;
        Ok(())
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(|n| n == name).unwrap_or(false))
            .and_then(|tag| tag.get(1))
            .map(|s| s.as_str())
    }

    pub fn game_id(&self) -> Option<GameId> {
        self.tag("g").map(|g| GameId(g.to_string()))
    }

    pub fn turn(&self) -> Option<u32> {
        self.tag("t").and_then(|t| t.parse().ok())
    }

    pub fn house_id(&self) -> Option<HouseId> {
        self.tag("h").and_then(|h| h.parse().ok()).map(HouseId)
    }

    pub fn invite_code(&self) -> Option<&str> {
        self.tag("invite")
    }

    /// First 8 hex characters, the log-friendly handle.
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }
}

pub fn game_tags(game_id: &GameId) -> Vec<Vec<String>> {
    vec![vec!["g".into(), game_id.0.clone()]]
}

pub fn turn_tags(game_id: &GameId, turn: u32) -> Vec<Vec<String>> {
    vec![vec!["g".into(), game_id.0.clone()], vec!["t".into(), turn.to_string()]]
}

pub fn state_tags(game_id: &GameId, turn: u32, house_id: HouseId) -> Vec<Vec<String>> {
    vec![
        vec!["g".into(), game_id.0.clone()],
        vec!["t".into(), turn.to_string()],
        vec!["h".into(), house_id.to_string()],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_events_verify_and_tampering_fails() {
        let identity = Identity::generate();
        let event = RelayEvent::sign(
            &identity,
            KIND_TURN_COMMAND,
            turn_tags(&GameId("g1".into()), 4),
            "payload".into(),
        )
        .unwrap();

        event.verify().unwrap();
        assert_eq!(event.game_id(), Some(GameId("g1".into())));
        assert_eq!(event.turn(), Some(4));

        let mut tampered = event.clone();
        tampered.content = "other payload".into();
        assert!(tampered.verify().is_err());

        let mut forged = event.clone();
        forged.pubkey = Identity::generate().public_hex();
        assert!(forged.verify().is_err());
    }

    #[test]
    fn tags_resolve_by_name() {
        let identity = Identity::generate();
        let event = RelayEvent::sign(
            &identity,
            KIND_TURN_STATE,
            state_tags(&GameId("g2".into()), 7, HouseId(3)),
            String::new(),
        )
        .unwrap();
        assert_eq!(event.house_id(), Some(HouseId(3)));
        assert_eq!(event.tag("missing"), None);
    }
}
