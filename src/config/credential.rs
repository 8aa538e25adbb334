//! Single-credential OAuth store (§4.15), adapted from the teacher's
//! `keystore.rs`: same keyring-first-with-encrypted-file-fallback design
//! and the same chacha20poly1305/argon2/zeroize crypto stack, but without
//! the interactive master-password prompt — a headless multi-agent run has
//! no TTY to prompt on. In place of a typed password, the encrypted-file
//! backend derives its key from a random local key file created with
//! owner-only permissions on first use, analogous to an SSH private key.

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SERVICE_NAME: &str = "swarm-re-core";
const KEYRING_USER: &str = "oauth";
const KEY_FILE_NAME: &str = "local.key";
const CREDENTIALS_FILE_NAME: &str = "oauth.enc";
const ARGON2_SALT: &[u8] = b"swarm-re-core-credential-store-v1";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential not found")]
    NotFound,
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("encryption error: {0}")]
    Encryption(String),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// An OAuth access/refresh token pair. Zeroized on drop so a core dump
/// doesn't leak a live session.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    #[zeroize(skip)]
    pub expires_at: i64,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl OAuthCredentials {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        now_unix >= self.expires_at
    }
}

enum Backend {
    SystemKeyring,
    EncryptedFile,
}

pub struct CredentialStore {
    backend: Backend,
    state_dir: PathBuf,
}

impl CredentialStore {
    /// Probes for a usable system keyring, falling back to the encrypted
    /// file backend if none is reachable (matches the teacher's `KeyStore`
    /// auto-detection in `new()`).
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let backend = if keyring_available() { Backend::SystemKeyring } else { Backend::EncryptedFile };
        Self { backend, state_dir }
    }

    pub fn with_backend_encrypted_file(state_dir: impl Into<PathBuf>) -> Self {
        Self { backend: Backend::EncryptedFile, state_dir: state_dir.into() }
    }

    pub fn store(&self, credentials: &OAuthCredentials) -> Result<()> {
        let json = serde_json::to_string(credentials)?;
        match self.backend {
            Backend::SystemKeyring => store_keyring(&json),
            Backend::EncryptedFile => self.store_encrypted(&json),
        }
    }

    pub fn load(&self) -> Result<OAuthCredentials> {
        let json = match self.backend {
            Backend::SystemKeyring => load_keyring()?,
            Backend::EncryptedFile => self.load_encrypted()?,
        };
        Ok(serde_json::from_str(&json)?)
    }

    pub fn delete(&self) -> Result<()> {
        match self.backend {
            Backend::SystemKeyring => delete_keyring(),
            Backend::EncryptedFile => {
                let path = self.credentials_path();
                if path.exists() {
                    fs::remove_file(path)?;
                }
                Ok(())
            }
        }
    }

    fn key_file_path(&self) -> PathBuf {
        self.state_dir.join(KEY_FILE_NAME)
    }

    fn credentials_path(&self) -> PathBuf {
        self.state_dir.join(CREDENTIALS_FILE_NAME)
    }

    /// Loads the local key, generating and persisting one (mode 0600) on
    /// first use.
    fn local_key(&self) -> Result<[u8; 32]> {
        let path = self.key_file_path();
        if path.exists() {
            let raw = fs::read(&path)?;
            let mut key = [0u8; 32];
            if raw.len() == 32 {
                key.copy_from_slice(&raw);
                return Ok(key);
            }
        }

        fs::create_dir_all(&self.state_dir)?;
        let mut seed = [0u8; 32];
        for byte in seed.iter_mut() {
            *byte = fastrand::u8(..);
        }
        fs::write(&path, seed)?;
        set_owner_only_permissions(&path)?;
        Ok(seed)
    }

    fn derive_cipher(&self) -> Result<ChaCha20Poly1305> {
        let local_key = self.local_key()?;
        let mut derived = [0u8; 32];
        Argon2::default()
            .hash_password_into(&local_key, ARGON2_SALT, &mut derived)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        let cipher = ChaCha20Poly1305::new((&derived).into());
        derived.zeroize();
        Ok(cipher)
    }

    fn store_encrypted(&self, plaintext: &str) -> Result<()> {
        let cipher = self.derive_cipher()?;
        let mut nonce_bytes = [0u8; 12];
        for byte in nonce_bytes.iter_mut() {
            *byte = fastrand::u8(..);
        }
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        let envelope = EncryptedEnvelope { nonce: nonce_bytes, ciphertext };
        let serialized = serde_json::to_string(&envelope)?;
        fs::create_dir_all(&self.state_dir)?;
        let path = self.credentials_path();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &path)?;
        set_owner_only_permissions(&path)?;
        Ok(())
    }

    fn load_encrypted(&self) -> Result<String> {
        let path = self.credentials_path();
        if !path.exists() {
            return Err(CredentialError::NotFound);
        }
        let content = fs::read_to_string(&path)?;
        let envelope: EncryptedEnvelope = serde_json::from_str(&content)?;
        let cipher = self.derive_cipher()?;
        let nonce = Nonce::from_slice(&envelope.nonce);
        let plaintext = cipher
            .decrypt(nonce, envelope.ciphertext.as_ref())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        Ok(String::from_utf8_lossy(&plaintext).to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct EncryptedEnvelope {
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn keyring_available() -> bool {
    keyring::Entry::new(SERVICE_NAME, "probe")
        .map(|entry| entry.get_password().is_ok() || entry.set_password("probe").is_ok())
        .unwrap_or(false)
}

fn store_keyring(json: &str) -> Result<()> {
    let entry = keyring::Entry::new(SERVICE_NAME, KEYRING_USER).map_err(|e| CredentialError::Keyring(e.to_string()))?;
    entry.set_password(json).map_err(|e| CredentialError::Keyring(e.to_string()))
}

fn load_keyring() -> Result<String> {
    let entry = keyring::Entry::new(SERVICE_NAME, KEYRING_USER).map_err(|e| CredentialError::Keyring(e.to_string()))?;
    entry.get_password().map_err(|_| CredentialError::NotFound)
}

fn delete_keyring() -> Result<()> {
    let entry = keyring::Entry::new(SERVICE_NAME, KEYRING_USER).map_err(|e| CredentialError::Keyring(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(CredentialError::Keyring(e.to_string())),
    }
}
