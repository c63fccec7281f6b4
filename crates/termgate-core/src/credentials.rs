//! Credential store: accepted authentication material and yes/no queries.
//!
//! Passwords are stored as salted SHA-256 digests and compared in constant
//! time. Public keys are stored as authorized key blobs; the store answers
//! membership only — verifying a signed challenge against the key belongs
//! to the secure-transport collaborator.
//!
//! The store is loaded once at startup and treated as read-only while the
//! server runs; the mutation API exists for provisioning and tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// A single piece of accepted authentication material.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Salted SHA-256 password digest
    PasswordHash {
        /// Random per-password salt
        salt: Vec<u8>,
        /// SHA-256(salt || password)
        hash: Vec<u8>,
    },
    /// Authorized public key blob
    PublicKey(String),
}

/// Proof presented by a connecting client.
#[derive(Debug, Clone)]
pub enum Proof {
    /// Cleartext password (received over the secured transport)
    Password(String),
    /// Public key the transport verified a signed challenge against
    PublicKey(String),
}

/// Holds accepted authentication material and answers authentication
/// queries.
#[derive(Debug, Default)]
pub struct CredentialStore {
    users: HashMap<String, Vec<Credential>>,
    /// File the store was loaded from, used by [`CredentialStore::save`].
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a passwords file.
    ///
    /// One line per user in the format `username:salthex$hashhex`. Lines
    /// starting with `#` and blank lines are ignored, as is surrounding
    /// whitespace. Malformed lines are skipped with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let mut store = Self::from_str_content(&content);
        store.path = Some(path.as_ref().to_path_buf());
        Ok(store)
    }

    fn from_str_content(content: &str) -> Self {
        let mut store = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, rest)) = line.split_once(':') else {
                warn!("skipping malformed credential line (no ':')");
                continue;
            };
            let user = user.trim();
            let rest = rest.trim();
            let Some((salt_hex, hash_hex)) = rest.split_once('$') else {
                warn!(user, "skipping malformed credential line (no '$')");
                continue;
            };
            match (hex::decode(salt_hex), hex::decode(hash_hex)) {
                (Ok(salt), Ok(hash)) => {
                    store
                        .users
                        .entry(user.to_string())
                        .or_default()
                        .push(Credential::PasswordHash { salt, hash });
                }
                _ => warn!(user, "skipping credential line with invalid hex"),
            }
        }
        store
    }

    /// Save password credentials to the given file (or the file the store
    /// was loaded from).
    pub fn save<P: AsRef<Path>>(&self, path: Option<P>) -> Result<()> {
        let target = match path {
            Some(p) => p.as_ref().to_path_buf(),
            None => self
                .path
                .clone()
                .ok_or_else(|| Error::Config("no passwords file to save to".to_string()))?,
        };
        let mut out = String::new();
        for (user, creds) in &self.users {
            for cred in creds {
                if let Credential::PasswordHash { salt, hash } = cred {
                    out.push_str(user);
                    out.push(':');
                    out.push_str(&hex::encode(salt));
                    out.push('$');
                    out.push_str(&hex::encode(hash));
                    out.push('\n');
                }
            }
        }
        std::fs::write(target, out)?;
        Ok(())
    }

    /// Answer an authentication query.
    ///
    /// Returns false for unknown principals, wrong proofs, and malformed
    /// input alike; nothing observable distinguishes the cases. Attempts
    /// are logged, never printed.
    pub fn authenticate(&self, principal: &str, proof: &Proof) -> bool {
        let creds = self.users.get(principal);
        let ok = match proof {
            Proof::Password(password) => {
                // Unknown principals burn the same hash work against a
                // dummy record so lookup timing reveals nothing.
                match creds {
                    Some(creds) => creds
                        .iter()
                        .fold(false, |acc, c| acc | check_password(c, password)),
                    None => {
                        let _ = check_password(&dummy_credential(), password);
                        false
                    }
                }
            }
            Proof::PublicKey(key) => match creds {
                Some(creds) => creds.iter().fold(false, |acc, c| acc | check_key(c, key)),
                None => false,
            },
        };
        debug!(principal, ok, "authentication attempt");
        ok
    }

    /// Add a new user with no credentials.
    ///
    /// Fails if the user exists or the name is not a valid identifier
    /// (letters, digits, underscore; must not start with a digit).
    pub fn add_user(&mut self, username: &str) -> Result<()> {
        Self::check_username(username)?;
        if self.users.contains_key(username) {
            return Err(Error::Config(format!("user '{username}' already exists")));
        }
        self.users.insert(username.to_string(), Vec::new());
        Ok(())
    }

    /// Set (or replace) the password credential for a user.
    pub fn set_password(&mut self, username: &str, password: &str) -> Result<()> {
        let creds = self
            .users
            .get_mut(username)
            .ok_or_else(|| Error::Config(format!("unknown user '{username}'")))?;
        creds.retain(|c| !matches!(c, Credential::PasswordHash { .. }));
        let salt = Uuid::new_v4().as_bytes().to_vec();
        let hash = hash_password(&salt, password);
        creds.push(Credential::PasswordHash { salt, hash });
        Ok(())
    }

    /// Add an authorized public key for a user.
    pub fn add_public_key(&mut self, username: &str, key: &str) -> Result<()> {
        let creds = self
            .users
            .get_mut(username)
            .ok_or_else(|| Error::Config(format!("unknown user '{username}'")))?;
        creds.push(Credential::PublicKey(key.trim().to_string()));
        Ok(())
    }

    /// Whether the user exists.
    pub fn has_user(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Remove a user and all their credentials.
    pub fn remove_user(&mut self, username: &str) {
        self.users.remove(username);
    }

    fn check_username(username: &str) -> Result<()> {
        let valid = !username.is_empty()
            && !username.starts_with(|c: char| c.is_ascii_digit())
            && username.chars().all(|c| c.is_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "'{username}' is not a valid username"
            )))
        }
    }
}

fn hash_password(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

fn check_password(cred: &Credential, password: &str) -> bool {
    match cred {
        Credential::PasswordHash { salt, hash } => {
            let presented = hash_password(salt, password);
            presented.ct_eq(hash).into()
        }
        Credential::PublicKey(_) => false,
    }
}

fn check_key(cred: &Credential, key: &str) -> bool {
    match cred {
        Credential::PublicKey(stored) => stored.as_bytes().ct_eq(key.trim().as_bytes()).into(),
        Credential::PasswordHash { .. } => false,
    }
}

fn dummy_credential() -> Credential {
    Credential::PasswordHash {
        salt: vec![0u8; 16],
        hash: vec![0u8; 32],
    }
}
