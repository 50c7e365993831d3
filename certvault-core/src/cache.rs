//! Client-side encrypted secret cache.
//!
//! Secrets live in memory behind a mutex and are mirrored to a JSON file
//! `{ "secrets": [...], "version": n }` after every mutation. Payloads are
//! sealed with [`CacheCipher`] before they enter the cache, so neither the
//! file nor the server ever sees plaintext.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::{CacheCipher, CryptoError};
use crate::sync::conflict::{ConflictResolver, Resolution};
use crate::sync::models::{Secret, SecretKind, SyncRequest};

/// Errors from the local cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Secret already exists: {0}")]
    Duplicate(String),

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    secrets: Vec<Secret>,
    #[serde(default)]
    version: i64,
    /// Ids changed locally that the server has not acknowledged yet.
    /// Missing in files written before it was tracked; every entry counts as
    /// changed then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default)]
struct CacheState {
    file: CacheFile,
    deleted: HashSet<String>,
    pending: BTreeSet<String>,
}

impl CacheState {
    fn from_file(mut file: CacheFile) -> Self {
        let deleted = file
            .secrets
            .iter()
            .filter(|s| s.deleted)
            .map(|s| s.id.clone())
            .collect();
        let pending = file
            .pending
            .take()
            .unwrap_or_else(|| file.secrets.iter().map(|s| s.id.clone()).collect());
        Self {
            file,
            deleted,
            pending,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.file.secrets.iter().position(|s| s.id == id)
    }

    fn live_mut(&mut self, id: &str) -> Option<&mut Secret> {
        if self.deleted.contains(id) {
            return None;
        }
        self.file.secrets.iter_mut().find(|s| s.id == id)
    }

    fn mark(&mut self, secret: &Secret) {
        if secret.deleted {
            self.deleted.insert(secret.id.clone());
        } else {
            self.deleted.remove(&secret.id);
        }
    }

    /// Forget an entry entirely.
    fn remove(&mut self, idx: usize) {
        let gone = self.file.secrets.remove(idx);
        self.deleted.remove(&gone.id);
        self.pending.remove(&gone.id);
    }
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    secrets: &'a [Secret],
    version: i64,
    pending: &'a BTreeSet<String>,
}

/// A live secret with its payload opened, or the reason it could not be.
#[derive(Debug, Clone)]
pub struct SecretView {
    pub id: String,
    pub kind: SecretKind,
    pub comment: String,
    pub version: i64,
    pub plaintext: std::result::Result<Vec<u8>, String>,
}

/// Result of folding a server response into the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub replaced: usize,
    pub appended: usize,
    pub removed: usize,
    pub kept: usize,
}

pub struct LocalCache {
    path: PathBuf,
    cipher: CacheCipher,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

impl LocalCache {
    /// Load the cache file at `path`, or start empty when it does not exist.
    pub fn open(path: impl Into<PathBuf>, cipher: CacheCipher) -> Result<Self> {
        let path = path.into();
        let file: CacheFile = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => CacheFile::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheFile::default(),
            Err(e) => return Err(e.into()),
        };
        let state = CacheState::from_file(file);

        tracing::debug!(
            path = %path.display(),
            secrets = state.file.secrets.len(),
            pending = state.pending.len(),
            version = state.file.version,
            "Opened local cache"
        );

        Ok(Self {
            path,
            cipher,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Apply `change` to a copy of the state, persist the copy, then swap it
    /// in. A failed write leaves the in-memory state as it was. `Ok(None)`
    /// from `change` means nothing changed and nothing is written.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut CacheState) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        let Some(out) = change(&mut next)? else {
            return Ok(None);
        };
        self.persist(&next)?;
        *state = next;
        Ok(Some(out))
    }

    /// Append an already sealed secret and persist.
    pub fn add(&self, secret: Secret) -> Result<()> {
        self.update(|state| {
            if state.position(&secret.id).is_some() {
                return Err(CacheError::Duplicate(secret.id));
            }
            state.mark(&secret);
            state.pending.insert(secret.id.clone());
            state.file.version = secret.version;
            state.file.secrets.push(secret);
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Seal `plaintext` under a new id and add it.
    pub fn create(&self, kind: SecretKind, comment: &str, plaintext: &[u8]) -> Result<Secret> {
        let secret = Secret {
            id: Uuid::new_v4().to_string(),
            kind,
            payload: self.cipher.encrypt(plaintext)?,
            comment: comment.to_string(),
            version: now_unix(),
            deleted: false,
        };
        self.add(secret.clone())?;
        Ok(secret)
    }

    /// Copy of the live secret with this id.
    pub fn get(&self, id: &str) -> Result<Option<Secret>> {
        let state = self.lock()?;
        if state.deleted.contains(id) {
            return Ok(None);
        }
        Ok(state.file.secrets.iter().find(|s| s.id == id).cloned())
    }

    /// Open a secret's payload.
    pub fn decrypt(&self, secret: &Secret) -> Result<Vec<u8>> {
        Ok(self.cipher.decrypt(&secret.payload)?)
    }

    /// Replace a live secret's payload, and its comment when given.
    ///
    /// Returns `false` when the id is unknown or tombstoned.
    pub fn edit(&self, id: &str, plaintext: &[u8], comment: Option<&str>) -> Result<bool> {
        let payload = self.cipher.encrypt(plaintext)?;
        let edited = self.update(|state| {
            let Some(secret) = state.live_mut(id) else {
                return Ok(None);
            };
            secret.payload = payload;
            if let Some(comment) = comment {
                secret.comment = comment.to_string();
            }
            secret.version = ConflictResolver::next_version(secret.version, now_unix());
            let version = secret.version;
            state.file.version = version;
            state.pending.insert(id.to_string());
            Ok(Some(()))
        })?;
        Ok(edited.is_some())
    }

    /// Tombstone a live secret. Returns `false` when absent or already
    /// deleted.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self.update(|state| {
            let Some(secret) = state.live_mut(id) else {
                return Ok(None);
            };
            secret.deleted = true;
            secret.version = ConflictResolver::next_version(secret.version, now_unix());
            let version = secret.version;
            state.deleted.insert(id.to_string());
            state.pending.insert(id.to_string());
            state.file.version = version;
            Ok(Some(()))
        })?;
        Ok(deleted.is_some())
    }

    /// Every live secret with its payload opened.
    pub fn list(&self) -> Result<Vec<SecretView>> {
        let state = self.lock()?;
        Ok(state
            .file
            .secrets
            .iter()
            .filter(|s| !state.deleted.contains(&s.id))
            .map(|s| SecretView {
                id: s.id.clone(),
                kind: s.kind,
                comment: s.comment.clone(),
                version: s.version,
                plaintext: self.cipher.decrypt(&s.payload).map_err(|e| e.to_string()),
            })
            .collect())
    }

    /// What the server should see on the next sync: the secrets changed
    /// since the server last acknowledged them, tombstones included, plus
    /// the version held for every id.
    pub fn snapshot(&self) -> Result<SyncRequest> {
        let state = self.lock()?;
        let versions: HashMap<String, i64> = state
            .file
            .secrets
            .iter()
            .map(|s| (s.id.clone(), s.version))
            .collect();
        let secrets = state
            .file
            .secrets
            .iter()
            .filter(|s| state.pending.contains(&s.id))
            .cloned()
            .collect();
        Ok(SyncRequest { secrets, versions })
    }

    /// Number of entries waiting for the server.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.pending.len())
    }

    /// Settle secrets the server has answered for.
    ///
    /// `sent` is what went out in the request; an id in `updated` or
    /// `skipped` means the server now holds that version or a newer one.
    /// Such entries stop being resent, and acknowledged tombstones are
    /// dropped from the cache. Entries changed again since `sent` was taken
    /// stay pending. Returns the number of settled entries.
    pub fn acknowledge(
        &self,
        sent: &[Secret],
        updated: &[String],
        skipped: &[String],
    ) -> Result<usize> {
        let answered: HashSet<&str> = updated
            .iter()
            .chain(skipped)
            .map(String::as_str)
            .collect();

        let settled = self.update(|state| {
            let mut settled = 0;
            for secret in sent.iter().filter(|s| answered.contains(s.id.as_str())) {
                let Some(idx) = state.position(&secret.id) else {
                    continue;
                };
                let local = &state.file.secrets[idx];
                if local.version != secret.version || local.deleted != secret.deleted {
                    continue;
                }
                if local.deleted {
                    state.remove(idx);
                } else {
                    state.pending.remove(&secret.id);
                }
                settled += 1;
            }
            Ok((settled > 0).then_some(settled))
        })?;
        Ok(settled.unwrap_or(0))
    }

    /// Highest server version observed.
    pub fn version(&self) -> Result<i64> {
        Ok(self.lock()?.file.version)
    }

    /// Fold secrets returned by the server into the cache.
    ///
    /// An incoming copy replaces the local one only when its version is
    /// strictly greater; unknown ids are appended. A newer tombstone removes
    /// the local entry, and a tombstone for an id the cache never held is
    /// ignored.
    pub fn merge_remote(&self, secrets: Vec<Secret>, server_version: i64) -> Result<MergeOutcome> {
        let outcome = self.update(|state| {
            let mut outcome = MergeOutcome::default();

            for incoming in secrets {
                match state.position(&incoming.id) {
                    Some(idx) => {
                        let local = state.file.secrets[idx].version;
                        match ConflictResolver::resolve(Some(local), incoming.version) {
                            Resolution::AcceptIncoming if incoming.deleted => {
                                state.remove(idx);
                                outcome.removed += 1;
                            }
                            Resolution::AcceptIncoming => {
                                state.mark(&incoming);
                                state.pending.remove(&incoming.id);
                                state.file.secrets[idx] = incoming;
                                outcome.replaced += 1;
                            }
                            Resolution::KeepExisting => outcome.kept += 1,
                        }
                    }
                    None if incoming.deleted => {}
                    None => {
                        state.mark(&incoming);
                        state.file.secrets.push(incoming);
                        outcome.appended += 1;
                    }
                }
            }

            state.file.version = server_version;
            Ok(Some(outcome))
        })?;
        Ok(outcome.unwrap_or_default())
    }

    /// Write the cache to a sibling temp file and rename it over the target.
    fn persist(&self, state: &CacheState) -> Result<()> {
        let json = serde_json::to_vec_pretty(&CacheFileRef {
            secrets: &state.file.secrets,
            version: state.file.version,
            pending: &state.pending,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
