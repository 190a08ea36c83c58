// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Author keystore: the node's Ed25519 identity used to sign blocks it
//! composes. Key material lives in `data_dir/author.key` (PKCS#8) with
//! owner-only permissions and atomic replacement.

use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519},
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use zeroize::Zeroize;

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("io")]
    Io,
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("crypto")]
    Crypto,
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Atomic write to disk (best-effort fsync, then rename).
fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeyError::Io)?;
    }

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeyError::Io)?;
        f.write_all(bytes).map_err(|_| KeyError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeyError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

/// File-backed Ed25519 author key.
pub struct AuthorKey {
    keypair: Ed25519KeyPair,
}

impl AuthorKey {
    /// Load the key from `data_dir/author.key`, creating one on first boot.
    pub fn load_or_create(data_dir: &str) -> Result<Self, KeyError> {
        let mut path = PathBuf::from(data_dir);
        path.push("author.key");

        if path.exists() {
            let bytes = fs::read(&path).map_err(|_| KeyError::Io)?;
            let kp = Ed25519KeyPair::from_pkcs8(&bytes).map_err(|_| KeyError::InvalidKey)?;
            return Ok(Self { keypair: kp });
        }

        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyError::Crypto)?;

        let mut buf = pkcs8.as_ref().to_vec();
        atomic_write_private(&path, &buf)?;
        buf.zeroize();

        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| KeyError::InvalidKey)?;
        Ok(Self { keypair: kp })
    }

    /// Construct from raw PKCS#8 bytes (tests and tooling).
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, KeyError> {
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|_| KeyError::InvalidKey)?;
        Ok(Self { keypair: kp })
    }

    /// Generate an ephemeral key (tests and tooling).
    pub fn generate() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyError::Crypto)?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        let pk = self.keypair.public_key().as_ref();
        let mut out = [0u8; 32];
        out.copy_from_slice(pk);
        out
    }

    /// Sign message bytes, returning the 64-byte detached signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        let sig = self.keypair.sign(msg);
        let mut out = [0u8; 64];
        out.copy_from_slice(sig.as_ref());
        out
    }
}

/// Verify a detached Ed25519 signature against raw public key bytes.
pub fn verify_detached(pk: &[u8; 32], msg: &[u8], sig: &[u8; 64]) -> bool {
    UnparsedPublicKey::new(&ED25519, pk).verify(msg, sig).is_ok()
}
