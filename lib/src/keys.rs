use p256::ecdsa::{SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use std::fs;
use std::path::Path;

use crate::error::KeyError;

const SYMMETRIC_KEY_LEN: usize = 32;

/// Key material of one instance, persisted as hex files in its directory.
pub struct KeyMaterial {
    pub identity: SigningKey,
    pub encryption: [u8; SYMMETRIC_KEY_LEN],
    pub transport: [u8; SYMMETRIC_KEY_LEN],
}

impl KeyMaterial {
    pub fn generate() -> Self {
        Self {
            identity: SigningKey::random(&mut OsRng),
            encryption: random_key(),
            transport: random_key(),
        }
    }

    /// Loads every key that already exists and generates the missing ones,
    /// so a restarted instance keeps its identity.
    pub fn load_or_generate(
        identity_path: &Path,
        encryption_path: &Path,
        transport_path: &Path,
    ) -> Result<Self, KeyError> {
        let identity = match read_hex(identity_path)? {
            Some(bytes) => {
                SigningKey::from_slice(&bytes).map_err(|e| KeyError::Malformed {
                    path: identity_path.to_path_buf(),
                    reason: e.to_string(),
                })?
            }
            None => {
                let key = SigningKey::random(&mut OsRng);
                write_hex(identity_path, &key.to_bytes())?;
                key
            }
        };

        Ok(Self {
            identity,
            encryption: load_or_generate_symmetric(encryption_path)?,
            transport: load_or_generate_symmetric(transport_path)?,
        })
    }

    pub fn public_identity(&self) -> VerifyingKey {
        VerifyingKey::from(&self.identity)
    }

    /// Hex of the SEC1-encoded public identity key.
    pub fn identity_hex(&self) -> String {
        hex::encode(self.public_identity().to_sec1_bytes())
    }
}

fn random_key() -> [u8; SYMMETRIC_KEY_LEN] {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

fn load_or_generate_symmetric(path: &Path) -> Result<[u8; SYMMETRIC_KEY_LEN], KeyError> {
    match read_hex(path)? {
        Some(bytes) => bytes.try_into().map_err(|bytes: Vec<u8>| KeyError::Malformed {
            path: path.to_path_buf(),
            reason: format!("expected {} bytes, found {}", SYMMETRIC_KEY_LEN, bytes.len()),
        }),
        None => {
            let key = random_key();
            write_hex(path, &key)?;
            Ok(key)
        }
    }
}

fn read_hex(path: &Path) -> Result<Option<Vec<u8>>, KeyError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    hex::decode(contents.trim())
        .map(Some)
        .map_err(|e| KeyError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn write_hex(path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, hex::encode(bytes))?;
    Ok(())
}
