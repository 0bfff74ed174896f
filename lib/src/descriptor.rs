use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use crate::config::Role;
use crate::error::DescriptorError;
use crate::keys::KeyMaterial;

/// The signed self-descriptor an instance publishes so others can join
/// through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub nickname: Option<String>,
    pub netid: String,
    pub role: Role,
    pub address: SocketAddr,
    /// Hex SEC1 public identity key.
    pub identity: String,
    /// Hex ECDSA P-256 signature over the other fields.
    pub signature: String,
}

#[derive(Serialize)]
struct UnsignedDescriptor<'a> {
    nickname: &'a Option<String>,
    netid: &'a str,
    role: Role,
    address: SocketAddr,
    identity: &'a str,
}

impl Descriptor {
    pub fn sign(
        keys: &KeyMaterial,
        nickname: Option<String>,
        netid: &str,
        role: Role,
        address: SocketAddr,
    ) -> Result<Self, DescriptorError> {
        let mut descriptor = Self {
            nickname,
            netid: netid.to_string(),
            role,
            address,
            identity: keys.identity_hex(),
            signature: String::new(),
        };
        let signature: Signature = keys.identity.sign(&descriptor.signed_bytes()?);
        descriptor.signature = hex::encode(signature.to_bytes());
        Ok(descriptor)
    }

    fn signed_bytes(&self) -> Result<Vec<u8>, DescriptorError> {
        serde_json::to_vec(&UnsignedDescriptor {
            nickname: &self.nickname,
            netid: &self.netid,
            role: self.role,
            address: self.address,
            identity: &self.identity,
        })
        .map_err(|e| DescriptorError::Malformed(e.to_string()))
    }

    pub fn verify(&self) -> Result<(), DescriptorError> {
        let identity = hex::decode(&self.identity)
            .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&identity)
            .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        let signature = hex::decode(&self.signature)
            .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        let signature =
            Signature::from_slice(&signature).map_err(|_| DescriptorError::BadSignature)?;

        key.verify(&self.signed_bytes()?, &signature)
            .map_err(|_| DescriptorError::BadSignature)
    }

    pub fn write(&self, path: &Path) -> Result<(), DescriptorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        // Write then rename so readers never observe a half-written file.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, DescriptorError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| DescriptorError::Malformed(e.to_string()))
    }

    /// Reads a descriptor and checks its signature and network id.
    pub fn read_verified(path: &Path, netid: &str) -> Result<Self, DescriptorError> {
        let descriptor = Self::read(path)?;
        descriptor.verify()?;
        if descriptor.netid != netid {
            return Err(DescriptorError::NetworkMismatch {
                expected: netid.to_string(),
                found: descriptor.netid,
            });
        }
        Ok(descriptor)
    }
}
