//! Credential storage
//!
//! Credentials are created once by a successful registration and afterwards
//! only their signature counter and `last_used_at` change. Nothing in the
//! ceremony engine deletes them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::challenge_store::{Clock, SystemClock};
use super::errors::StoreError;
use super::types::{CredentialId, StoredCredential};
use super::user::UserHandle;

pub trait CredentialStore: Send + Sync {
    /// Persist a new credential
    ///
    /// # Errors
    /// Returns `StoreError::Duplicate` if the id is taken (the stored record
    /// is left untouched) and `StoreError::Backend` on I/O failure.
    fn create(&self, credential: StoredCredential) -> Result<(), StoreError>;

    /// # Errors
    /// Returns `StoreError::Backend` if the backing medium fails.
    fn find_by_id(&self, id: &CredentialId) -> Result<Option<StoredCredential>, StoreError>;

    /// All credentials owned by `user`, oldest first
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backing medium fails.
    fn find_by_owner(&self, user: &UserHandle) -> Result<Vec<StoredCredential>, StoreError>;

    /// Compare-and-set the signature counter from `observed` to `new`
    ///
    /// # Errors
    /// * `StoreError::CounterRegression` if the stored counter is no longer
    ///   `observed` or `new` does not advance it.
    /// * `StoreError::NotFound` if the credential does not exist.
    /// * `StoreError::Backend` on I/O failure.
    fn update_counter(&self, id: &CredentialId, observed: u32, new: u32)
        -> Result<(), StoreError>;
}

/// Whether `received` is an acceptable successor of the `stored` counter
///
/// The counter must strictly increase. Authenticators that do not implement
/// a counter report zero forever, so `0 -> 0` is accepted.
#[must_use]
pub fn counter_advances(stored: u32, received: u32) -> bool {
    received > stored || (stored == 0 && received == 0)
}

fn check_counter(current: u32, observed: u32, new: u32) -> Result<(), StoreError> {
    if current != observed || !counter_advances(current, new) {
        return Err(StoreError::CounterRegression {
            stored: current,
            received: new,
        });
    }
    Ok(())
}

/// In-process credential store backed by a `DashMap`
pub struct MemoryCredentialStore {
    credentials: DashMap<CredentialId, StoredCredential>,
    clock: Arc<dyn Clock>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            credentials: DashMap::new(),
            clock,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn create(&self, credential: StoredCredential) -> Result<(), StoreError> {
        match self.credentials.entry(credential.credential_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(credential);
                Ok(())
            }
        }
    }

    fn find_by_id(&self, id: &CredentialId) -> Result<Option<StoredCredential>, StoreError> {
        Ok(self.credentials.get(id).map(|entry| entry.value().clone()))
    }

    fn find_by_owner(&self, user: &UserHandle) -> Result<Vec<StoredCredential>, StoreError> {
        let mut owned: Vec<StoredCredential> = self
            .credentials
            .iter()
            .filter(|entry| &entry.owner == user)
            .map(|entry| entry.value().clone())
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    fn update_counter(
        &self,
        id: &CredentialId,
        observed: u32,
        new: u32,
    ) -> Result<(), StoreError> {
        // The shard write lock is held for the whole compare-and-set
        let mut entry = self.credentials.get_mut(id).ok_or(StoreError::NotFound)?;
        check_counter(entry.signature_counter, observed, new)?;
        entry.signature_counter = new;
        entry.last_used_at = Some(self.clock.now());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    credentials: Vec<StoredCredential>,
}

const FILE_VERSION: u32 = 1;

/// Credential store persisted as a single JSON document
///
/// Every mutation rewrites the whole file through a temporary sibling that
/// is renamed into place, so readers never observe a half-written snapshot.
/// The in-memory index is only updated after the write succeeded.
pub struct JsonFileCredentialStore {
    path: PathBuf,
    index: Mutex<HashMap<CredentialId, StoredCredential>>,
    clock: Arc<dyn Clock>,
}

impl JsonFileCredentialStore {
    /// Open the store at `path`, loading existing credentials if the file exists
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the file cannot be read or parsed, or
    /// holds the same credential id twice.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// # Errors
    /// See [`JsonFileCredentialStore::open`].
    pub fn open_with_clock(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut index = HashMap::new();

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let file: CredentialFile = serde_json::from_str(&contents)?;
            if file.version != FILE_VERSION {
                return Err(StoreError::Backend(format!(
                    "unsupported credential file version {}",
                    file.version
                )));
            }
            for credential in file.credentials {
                let id = credential.credential_id.clone();
                if index.insert(id.clone(), credential).is_some() {
                    return Err(StoreError::Backend(format!(
                        "credential {id} appears twice in {}",
                        path.display()
                    )));
                }
            }
            info!(
                "Loaded {} credentials from {}",
                index.len(),
                path.display()
            );
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            index: Mutex::new(index),
            clock,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CredentialId, StoredCredential>>, StoreError>
    {
        self.index
            .lock()
            .map_err(|_| StoreError::Backend("credential index lock poisoned".to_string()))
    }

    /// Write `credentials` plus `changed` (replacing any record with its id)
    fn persist(
        &self,
        credentials: &HashMap<CredentialId, StoredCredential>,
        changed: &StoredCredential,
    ) -> Result<(), StoreError> {
        let mut snapshot: Vec<StoredCredential> = credentials
            .values()
            .filter(|c| c.credential_id != changed.credential_id)
            .cloned()
            .collect();
        snapshot.push(changed.clone());
        snapshot.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.credential_id.cmp(&b.credential_id))
        });

        let document = CredentialFile {
            version: FILE_VERSION,
            credentials: snapshot,
        };
        let json = serde_json::to_string_pretty(&document)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote credential snapshot to {}", self.path.display());
        Ok(())
    }
}

impl CredentialStore for JsonFileCredentialStore {
    fn create(&self, credential: StoredCredential) -> Result<(), StoreError> {
        let mut index = self.lock()?;
        if index.contains_key(&credential.credential_id) {
            return Err(StoreError::Duplicate);
        }
        self.persist(&index, &credential)?;
        index.insert(credential.credential_id.clone(), credential);
        Ok(())
    }

    fn find_by_id(&self, id: &CredentialId) -> Result<Option<StoredCredential>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn find_by_owner(&self, user: &UserHandle) -> Result<Vec<StoredCredential>, StoreError> {
        let mut owned: Vec<StoredCredential> = self
            .lock()?
            .values()
            .filter(|c| &c.owner == user)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    fn update_counter(
        &self,
        id: &CredentialId,
        observed: u32,
        new: u32,
    ) -> Result<(), StoreError> {
        let mut index = self.lock()?;
        let current = index.get(id).ok_or(StoreError::NotFound)?;
        check_counter(current.signature_counter, observed, new)?;

        let mut updated = current.clone();
        updated.signature_counter = new;
        updated.last_used_at = Some(self.clock.now());

        self.persist(&index, &updated)?;
        index.insert(id.clone(), updated);
        Ok(())
    }
}
