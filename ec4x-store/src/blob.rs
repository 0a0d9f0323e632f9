//! Binary codecs for the `games.state_blob` and snapshot columns: a single
//! version byte followed by the canonical bcs encoding. Unknown versions
//! fail loudly instead of guessing.

use anyhow::{bail, Context, Result};
use ec4x_domain::{GameState, PlayerState, STATE_BLOB_VERSION};

pub fn encode_state(state: &GameState) -> Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(4096);
    blob.push(STATE_BLOB_VERSION);
    let body = bcs::to_bytes(state).context("serializing game state")?;
    blob.extend_from_slice(&body);
    Ok(blob)
}

pub fn decode_state(blob: &[u8]) -> Result<GameState> {
    let Some((version, body)) = blob.split_first() else {
        bail!("empty state blob");
    };
    if *version != STATE_BLOB_VERSION {
        bail!("unsupported state blob version {version}");
    }
    bcs::from_bytes(body).context("deserializing game state")
}

pub fn encode_player_state(state: &PlayerState) -> Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(1024);
    blob.push(STATE_BLOB_VERSION);
    let body = bcs::to_bytes(state).context("serializing player state")?;
    blob.extend_from_slice(&body);
    Ok(blob)
}

pub fn decode_player_state(blob: &[u8]) -> Result<PlayerState> {
    let Some((version, body)) = blob.split_first() else {
        bail!("empty player state blob");
    };
    if *version != STATE_BLOB_VERSION {
        bail!("unsupported player state blob version {version}");
    }
    bcs::from_bytes(body).context("deserializing player state")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec4x_domain::GameId;

    #[test]
    fn state_round_trips_through_the_blob_codec() {
        let state = GameState::new(GameId("g1".into()), "Test Game".into(), "round trip".into());
        let blob = encode_state(&state).unwrap();
        let decoded = decode_state(&blob).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let state = GameState::new(GameId("g1".into()), "Test Game".into(), String::new());
        let mut blob = encode_state(&state).unwrap();
        blob[0] = 99;
        assert!(decode_state(&blob).is_err());
        assert!(decode_state(&[]).is_err());
    }
}
