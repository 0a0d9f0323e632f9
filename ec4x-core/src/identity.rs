//! Daemon identity: one secp256k1 keypair, persisted as hex with 0600
//! permissions. Regeneration destroys the daemon's relay identity and is
//! refused unless `EC4X_REGEN_IDENTITY=1` is set.

use anyhow::{bail, Context, Result};
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use std::path::Path;
use tracing::{event, Level};

pub const IDENTITY_FILE: &str = "daemon.identity";
pub const REGEN_ENV: &str = "EC4X_REGEN_IDENTITY";

#[derive(Clone)]
pub struct Identity {
    keypair: Keypair,
}

impl Identity {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut rand::thread_rng());
        Self {
            keypair: Keypair::from_secret_key(&secp, &secret_key),
        }
    }

    pub fn from_secret_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim()).context("identity file is not hex")?;
        let secret_key = SecretKey::from_slice(&bytes).context("identity file is not a valid secret key")?;
        let secp = Secp256k1::new();
        Ok(Self {
            keypair: Keypair::from_secret_key(&secp, &secret_key),
        })
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_key().secret_bytes())
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public_key().serialize())
    }
}

/// Loads the daemon keypair, creating one on first start. An existing but
/// corrupt identity is fatal unless regeneration was explicitly permitted
/// through the environment.
pub fn load_or_create(data_dir: &Path) -> Result<Identity> {
    let path = data_dir.join(IDENTITY_FILE);
    let regen_permitted = std::env::var(REGEN_ENV).map(|v| v == "1").unwrap_or(false);

    if path.exists() {
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        match Identity::from_secret_hex(&text) {
            Ok(identity) => {
                event!(Level::INFO, pubkey = %identity.public_hex(), "loaded daemon identity");
                return Ok(identity);
            }
            Err(error) if regen_permitted => {
                event!(Level::WARN, "identity corrupt ({error:#}); regenerating as permitted by {REGEN_ENV}");
            }
            Err(error) => {
                bail!(
                    "identity file {} is corrupt ({error:#}); set {REGEN_ENV}=1 to regenerate (destructive)",
                    path.display()
                );
            }
        }
    }

    let identity = Identity::generate();
    write_identity(&path, &identity)?;
    event!(Level::INFO, pubkey = %identity.public_hex(), "generated new daemon identity");
    Ok(identity)
}

fn write_identity(path: &Path, identity: &Identity) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, identity.secret_hex()).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hex_round_trips() {
        let identity = Identity::generate();
        let restored = Identity::from_secret_hex(&identity.secret_hex()).unwrap();
        assert_eq!(identity.public_hex(), restored.public_hex());
        assert_eq!(identity.public_hex().len(), 64);
    }

    #[test]
    fn load_or_create_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        let second = load_or_create(dir.path()).unwrap();
        assert_eq!(first.public_hex(), second.public_hex());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join(IDENTITY_FILE)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
