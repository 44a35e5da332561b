//! JSON-file backed credential store.
//!
//! The whole record set lives in memory behind an `Arc` snapshot. Readers grab the
//! current snapshot and never wait on hashing or disk I/O. Writers are serialized,
//! build the next snapshot off to the side, persist it (temp file + fsync + rename)
//! and only then publish it, so a failed write leaves both disk and memory untouched.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::hashing::{check_phc, hash_password, verify_against_dummy, verify_password};
use super::store::{normalize_username, CredentialRecord, CredentialStore, CredentialValidator};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct Records {
    by_id: HashMap<Uuid, CredentialRecord>,
    by_name: HashMap<String, Uuid>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    users: Vec<CredentialRecord>,
}

pub struct JsonCredentialStore {
    label: String,
    path: Option<PathBuf>,
    records: RwLock<Arc<Records>>,
    writer: Mutex<()>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.display().to_string(), source }
}

impl JsonCredentialStore {
    /// Store without a backing file; changes live only as long as the value.
    pub fn in_memory(label: impl Into<String>) -> Self {
        Self { label: label.into(), path: None, records: RwLock::new(Arc::new(Records::default())), writer: Mutex::new(()) }
    }

    /// Open (or prepare) the store at `path`. A missing file is an empty store;
    /// it is created on the first successful write.
    pub fn open(path: impl Into<PathBuf>, label: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let label = label.into();
        let records = if path.exists() { Self::read_file(&path, &label)? } else { Records::default() };
        info!(store = %label, path = %path.display(), users = records.by_id.len(), "credential store loaded");
        Ok(Self { label, path: Some(path), records: RwLock::new(Arc::new(records)), writer: Mutex::new(()) })
    }

    fn read_file(path: &Path, label: &str) -> Result<Records, StoreError> {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        let file: CredentialFile = if text.trim().is_empty() {
            CredentialFile::default()
        } else {
            serde_json::from_str(&text).map_err(|source| StoreError::Serde { path: path.display().to_string(), source })?
        };
        let mut out = Records::default();
        for mut rec in file.users {
            rec.username = normalize_username(&rec.username);
            if out.by_id.contains_key(&rec.uuid) || out.by_name.contains_key(&rec.username) {
                warn!(store = %label, user_id = %rec.uuid, "duplicate credential record in file, keeping the first");
                continue;
            }
            out.by_name.insert(rec.username.clone(), rec.uuid);
            out.by_id.insert(rec.uuid, rec);
        }
        Ok(out)
    }

    fn snapshot(&self) -> Arc<Records> { self.records.read().clone() }

    pub fn label(&self) -> &str { &self.label }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    pub fn len(&self) -> usize { self.snapshot().by_id.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// All (identity, name) pairs, sorted by name.
    pub fn list(&self) -> Vec<(Uuid, String)> {
        let snap = self.snapshot();
        let mut out: Vec<(Uuid, String)> = snap.by_id.values().map(|r| (r.uuid, r.username.clone())).collect();
        out.sort_by(|a, b| a.1.cmp(&b.1));
        out
    }

    fn upsert(&self, id: Uuid, name: Option<&str>, password_hash: String) -> Result<(), StoreError> {
        let _w = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let name = match name {
            Some(n) => {
                let n = normalize_username(n);
                if n.is_empty() { return Err(StoreError::EmptyName); }
                n
            }
            None => next.by_id.get(&id).map(|r| r.username.clone()).ok_or(StoreError::NotFound(id))?,
        };
        if let Some(owner) = next.by_name.get(&name) {
            if *owner != id { return Err(StoreError::NameTaken { name, owner: *owner }); }
        }
        if let Some(old) = next.by_id.get(&id) {
            if old.username != name { next.by_name.remove(&old.username); }
        }
        next.by_name.insert(name.clone(), id);
        next.by_id.insert(id, CredentialRecord { uuid: id, username: name, password_hash, updated_at: Utc::now() });
        self.commit(next)
    }

    fn commit(&self, next: Records) -> Result<(), StoreError> {
        if let Err(e) = self.persist(&next) {
            error!(store = %self.label, "failed to persist credential store: {e}");
            return Err(e);
        }
        *self.records.write() = Arc::new(next);
        Ok(())
    }

    fn persist(&self, recs: &Records) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else { return Ok(()); };
        let mut users: Vec<CredentialRecord> = recs.by_id.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        let body = serde_json::to_vec_pretty(&CredentialFile { users })
            .map_err(|source| StoreError::Serde { path: path.display().to_string(), source })?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() { std::fs::create_dir_all(dir).map_err(io_err(dir))?; }
        }
        let tmp = path.with_extension("json.tmp");
        let written = (|| {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&body)?;
            f.sync_all()?;
            std::fs::rename(&tmp, path)
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path)(e));
        }
        // Make the rename itself durable where the platform allows opening directories.
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Ok(d) = std::fs::File::open(dir) { let _ = d.sync_all(); }
        }
        debug!(store = %self.label, users = recs.by_id.len(), "credential store persisted");
        Ok(())
    }
}

impl CredentialStore for JsonCredentialStore {
    fn set_credential(&self, id: Uuid, name: Option<&str>, secret: &str) -> Result<(), StoreError> {
        if name.is_none() && !self.snapshot().by_id.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        // Hash outside the writer lock; it is by far the slowest step.
        let hash = hash_password(secret)?;
        self.upsert(id, name, hash)
    }

    fn import_credential(&self, id: Uuid, name: &str, pre_hashed: &str) -> Result<(), StoreError> {
        check_phc(pre_hashed)?;
        self.upsert(id, Some(name), pre_hashed.to_string())
    }

    fn delete_credential_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let _w = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let Some(old) = next.by_id.remove(&id) else { return Ok(false); };
        next.by_name.remove(&old.username);
        self.commit(next)?;
        Ok(true)
    }

    fn delete_credential_by_name(&self, name: &str) -> Result<bool, StoreError> {
        match self.lookup_identity(name) {
            Some(id) => self.delete_credential_by_id(id),
            None => Ok(false),
        }
    }

    fn lookup_identity(&self, name: &str) -> Option<Uuid> {
        self.snapshot().by_name.get(&normalize_username(name)).copied()
    }

    fn lookup_name(&self, id: Uuid) -> Option<String> {
        self.snapshot().by_id.get(&id).map(|r| r.username.clone())
    }
}

impl CredentialValidator for JsonCredentialStore {
    fn has_user_name(&self, name: &str) -> bool { self.lookup_identity(name).is_some() }

    fn has_user_id(&self, id: Uuid) -> bool { self.snapshot().by_id.contains_key(&id) }

    fn validate_by_name(&self, name: &str, secret: &str) -> Option<Uuid> {
        let snap = self.snapshot();
        match snap.by_name.get(&normalize_username(name)).and_then(|id| snap.by_id.get(id)) {
            Some(rec) => verify_password(&rec.password_hash, secret).then_some(rec.uuid),
            None => { verify_against_dummy(secret); None }
        }
    }

    fn validate_by_id(&self, id: Uuid, secret: &str) -> Option<Uuid> {
        match self.snapshot().by_id.get(&id) {
            Some(rec) => verify_password(&rec.password_hash, secret).then_some(rec.uuid),
            None => { verify_against_dummy(secret); None }
        }
    }
}

#[cfg(test)]
#[path = "json_store_tests.rs"]
mod tests;
