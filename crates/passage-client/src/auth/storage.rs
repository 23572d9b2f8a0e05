/*
[INPUT]:  Storage keys and string values (access token, registration email)
[OUTPUT]: Durable or in-memory key/value persistence behind one capability trait
[POS]:    Auth layer - injected client-side storage
[UPDATE]: When storage backends or file naming conventions change
*/

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Key under which the access token is persisted
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Key under which an in-progress registration email is persisted
pub const REGISTRATION_EMAIL_KEY: &str = "registrationEmail";

/// Client-side key/value storage capability.
///
/// Absence of a key is equivalent to "nothing stored".
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> io::Result<()>;

    fn remove(&self, key: &str) -> io::Result<()>;

    /// Whether values survive beyond this process
    fn is_durable(&self) -> bool {
        false
    }
}

/// Storage for contexts with no client storage at all. Reads are always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

impl KeyValueStorage for NoopStorage {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> io::Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory, readable only by the owner
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Get the expected file path for a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.session"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let content = fs::read_to_string(self.path_for(key)).ok()?;
        let value = content.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }

        let path = self.path_for(key);
        fs::write(&path, value)?;
        restrict_permissions(&path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn is_durable(&self) -> bool {
        true
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
