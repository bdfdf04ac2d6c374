use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::CredentialError;

/// Persistence seam for provider credentials.
pub trait CredentialStore: Send + Sync {
    fn load(&self, provider: &str) -> Result<Option<Credential>, CredentialError>;

    fn save(&self, credential: &Credential) -> Result<(), CredentialError>;

    fn remove(&self, provider: &str) -> Result<(), CredentialError>;
}

const STORE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    credentials: BTreeMap<String, Credential>,
}

/// JSON file store, rewritten atomically on every save.
///
/// On unix the file is created with mode `0600`.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<StoreFile, CredentialError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Ok(StoreFile {
                    version: STORE_VERSION,
                    credentials: BTreeMap::new(),
                })
            }
            Err(error) => return Err(CredentialError::io(&self.path, error)),
        };

        if raw.trim().is_empty() {
            return Ok(StoreFile {
                version: STORE_VERSION,
                credentials: BTreeMap::new(),
            });
        }

        serde_json::from_str(&raw).map_err(|source| CredentialError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn write_file(&self, contents: &StoreFile) -> Result<(), CredentialError> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|error| CredentialError::io(parent, error))?;

        let json = serde_json::to_vec_pretty(contents).map_err(|source| {
            CredentialError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|error| CredentialError::io(parent, error))?;
        restrict_permissions(temp.as_file()).map_err(|error| CredentialError::io(temp.path(), error))?;
        temp.write_all(&json)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|error| CredentialError::io(temp.path(), error))?;
        temp.persist(&self.path)
            .map_err(|error| CredentialError::io(&self.path, error.error))?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, provider: &str) -> Result<Option<Credential>, CredentialError> {
        Ok(self.read_file()?.credentials.remove(provider))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let mut contents = self.read_file()?;
        contents.version = STORE_VERSION;
        contents
            .credentials
            .insert(credential.provider.clone(), credential.clone());
        self.write_file(&contents)?;
        tracing::debug!(provider = %credential.provider, path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn remove(&self, provider: &str) -> Result<(), CredentialError> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let mut contents = self.read_file()?;
        if contents.credentials.remove(provider).is_some() {
            self.write_file(&contents)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

/// Process-local store used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<BTreeMap<String, Credential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn with_credentials(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            credentials: Mutex::new(
                credentials
                    .into_iter()
                    .map(|credential| (credential.provider.clone(), credential))
                    .collect(),
            ),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, provider: &str) -> Result<Option<Credential>, CredentialError> {
        Ok(lock_unpoisoned(&self.credentials).get(provider).cloned())
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        lock_unpoisoned(&self.credentials).insert(credential.provider.clone(), credential.clone());
        Ok(())
    }

    fn remove(&self, provider: &str) -> Result<(), CredentialError> {
        lock_unpoisoned(&self.credentials).remove(provider);
        Ok(())
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
