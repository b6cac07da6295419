//! Small persisted flags, e.g. whether the legacy event store has been imported.
use std::{
    collections::HashMap,
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use crate::Result;

/// Key-value preference store.
pub trait Preferences: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;

    /// Persist `value` under `key`. Durable once this returns `Ok`.
    fn set_bool(&self, key: &str, value: bool) -> Result<()>;
}

/// Preferences kept in a single JSON object file.
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<HashMap<String, bool>>,
}

impl FilePreferences {
    pub fn open(path: impl Into<PathBuf>) -> Result<FilePreferences> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!(target: "beacon",
                           path:display = path.display();
                           "preferences file is corrupt, starting empty: {:?}", err);
                HashMap::new()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(FilePreferences {
            path,
            values: Mutex::new(values),
        })
    }

    fn write(path: &Path, values: &HashMap<String, bool>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec(values)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Preferences for FilePreferences {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).copied().unwrap_or(default)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value);
        FilePreferences::write(&self.path, &values)
    }
}

/// Preferences that last for the lifetime of the process.
#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, bool>>,
}

impl MemoryPreferences {
    pub fn new() -> MemoryPreferences {
        MemoryPreferences::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).copied().unwrap_or(default)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value);
        Ok(())
    }
}
