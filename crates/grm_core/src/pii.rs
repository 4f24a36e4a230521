//! PII anonymization: masks citizen-identifying fields on the issue
//! document and keeps a reversible, encrypted copy in a side vault
//! keyed by issue id.
//!
//! The mask sentinel is distinguishable from real data, so running the
//! unit twice is a no-op. Reversal exists only for the notification
//! path; decrypted values are never written back into the issue.

use std::collections::HashMap;
use std::sync::Mutex;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use sha2::{Digest, Sha256};

use crate::error::GrmError;
use crate::model::Issue;

/// Replacement value for anonymized fields.
pub const PII_MASK: &str = "*";

/// The two independently-masked PII categories of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    /// Citizen identity (`issue.citizen`).
    Citizen,
    /// Contact value (`issue.contact_information.contact`); the channel
    /// type stays cleartext.
    Contact,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Citizen => "citizen",
            PiiKind::Contact => "contact",
        }
    }
}

/// Symmetric encryption primitive, deterministic per key.
pub trait Cipher {
    fn encrypt(&self, plaintext: &str, key_material: &str) -> Result<String, GrmError>;
    fn decrypt(&self, ciphertext: &str, key_material: &str) -> Result<String, GrmError>;
}

/// ChaCha20-Poly1305 with key and nonce derived from SHA-256 of the
/// key material (the issue id). Deterministic per key by construction;
/// acceptable here because each key encrypts at most one value per
/// [`PiiKind`].
#[derive(Debug, Default, Clone, Copy)]
pub struct IssueKeyCipher;

impl IssueKeyCipher {
    fn cipher_and_nonce(key_material: &str) -> (ChaCha20Poly1305, Nonce) {
        let key_bytes = Sha256::digest(key_material.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));

        let mut hasher = Sha256::new();
        hasher.update(b"grm-pii-nonce:");
        hasher.update(key_material.as_bytes());
        let nonce_bytes = hasher.finalize();
        (cipher, *Nonce::from_slice(&nonce_bytes[..12]))
    }
}

impl Cipher for IssueKeyCipher {
    fn encrypt(&self, plaintext: &str, key_material: &str) -> Result<String, GrmError> {
        let (cipher, nonce) = Self::cipher_and_nonce(key_material);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| GrmError::Crypto(format!("encrypt: {e}")))?;
        Ok(hex::encode(ciphertext))
    }

    fn decrypt(&self, ciphertext: &str, key_material: &str) -> Result<String, GrmError> {
        let (cipher, nonce) = Self::cipher_and_nonce(key_material);
        let bytes =
            hex::decode(ciphertext).map_err(|e| GrmError::Crypto(format!("decode: {e}")))?;
        let plaintext = cipher
            .decrypt(&nonce, bytes.as_slice())
            .map_err(|e| GrmError::Crypto(format!("decrypt: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| GrmError::Crypto(format!("utf-8: {e}")))
    }
}

/// Side store for encrypted PII records, one record per (kind, issue).
pub trait PiiVault {
    fn put(&self, kind: PiiKind, key: &str, ciphertext: &str) -> Result<(), GrmError>;
    fn get(&self, kind: PiiKind, key: &str) -> Result<Option<String>, GrmError>;
    /// Deleting an absent record is a no-op.
    fn delete(&self, kind: PiiKind, key: &str) -> Result<(), GrmError>;
}

/// Mask both PII fields of an issue, upserting vault records for
/// non-empty values and deleting records for emptied fields. Returns
/// whether the issue document changed.
pub fn anonymize_issue(
    issue: &mut Issue,
    vault: &dyn PiiVault,
    cipher: &dyn Cipher,
) -> Result<bool, GrmError> {
    let key = issue.id.clone();
    let mut changed = false;

    if issue.citizen.is_empty() {
        vault.delete(PiiKind::Citizen, &key)?;
    } else if issue.citizen != PII_MASK {
        let ciphertext = cipher.encrypt(&issue.citizen, &key)?;
        vault.put(PiiKind::Citizen, &key, &ciphertext)?;
        issue.citizen = PII_MASK.to_string();
        changed = true;
    }

    match issue.contact_information.as_mut() {
        None => vault.delete(PiiKind::Contact, &key)?,
        Some(contact) if contact.contact.is_empty() => vault.delete(PiiKind::Contact, &key)?,
        Some(contact) if contact.contact != PII_MASK => {
            let ciphertext = cipher.encrypt(&contact.contact, &key)?;
            vault.put(PiiKind::Contact, &key, &ciphertext)?;
            contact.contact = PII_MASK.to_string();
            changed = true;
        }
        Some(_) => {}
    }

    Ok(changed)
}

/// Decrypt the stored value of one PII field. `None` when no record
/// exists for this issue/kind.
pub fn reveal(
    issue_id: &str,
    kind: PiiKind,
    vault: &dyn PiiVault,
    cipher: &dyn Cipher,
) -> Result<Option<String>, GrmError> {
    match vault.get(kind, issue_id)? {
        Some(ciphertext) => Ok(Some(cipher.decrypt(&ciphertext, issue_id)?)),
        None => Ok(None),
    }
}

/// In-memory vault for tests.
#[derive(Debug, Default)]
pub struct InMemoryPiiVault {
    records: Mutex<HashMap<(PiiKind, String), String>>,
}

impl InMemoryPiiVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PiiVault for InMemoryPiiVault {
    fn put(&self, kind: PiiKind, key: &str, ciphertext: &str) -> Result<(), GrmError> {
        let mut records = self.records.lock().expect("pii vault lock poisoned");
        records.insert((kind, key.to_string()), ciphertext.to_string());
        Ok(())
    }

    fn get(&self, kind: PiiKind, key: &str) -> Result<Option<String>, GrmError> {
        let records = self.records.lock().expect("pii vault lock poisoned");
        Ok(records.get(&(kind, key.to_string())).cloned())
    }

    fn delete(&self, kind: PiiKind, key: &str) -> Result<(), GrmError> {
        let mut records = self.records.lock().expect("pii vault lock poisoned");
        records.remove(&(kind, key.to_string()));
        Ok(())
    }
}
