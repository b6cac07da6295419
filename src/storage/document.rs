use std::{
    fs,
    io::{self, Write as _},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use super::{Storable, Storage};
use crate::Result;

/// Embedded document store: every record is a JSON document in its own file.
///
/// Documents live under `<root>/<T::COLLECTION>/`, so several entity types can share one root
/// without [`Storage::clear`] touching each other. Writes go through a temporary file that is
/// fsynced and renamed over the target, so a document is either fully written or absent.
pub struct DocumentBackend<T> {
    dir: PathBuf,
    /// Serializes writers and hands out insertion sequence numbers.
    next_seq: Mutex<u64>,
    _entity: PhantomData<fn() -> T>,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    seq: u64,
    document: T,
}

const EXTENSION: &str = "json";

impl<T: Storable> DocumentBackend<T> {
    /// Open (creating if needed) the collection for `T` under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(T::COLLECTION);
        fs::create_dir_all(&dir)?;

        let backend = Self {
            dir,
            next_seq: Mutex::new(0),
            _entity: PhantomData,
        };
        let max_seq = backend
            .read_all()?
            .iter()
            .map(|(seq, _)| *seq)
            .max()
            .unwrap_or(0);
        *backend.next_seq.lock().unwrap_or_else(PoisonError::into_inner) = max_seq;

        log::debug!(target: "beacon",
                    collection = T::COLLECTION,
                    path:display = backend.dir.display();
                    "opened document collection");
        Ok(backend)
    }

    /// File names are the hex-encoded id so that any id maps to a safe, unique name.
    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", hex::encode(id)))
    }

    fn read_envelope(path: &Path) -> Option<Envelope<T>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            // Removed concurrently.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!(target: "beacon",
                           path:display = path.display();
                           "failed to read document, skipping: {:?}", err);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                log::warn!(target: "beacon",
                           path:display = path.display();
                           "dropping corrupt document: {:?}", err);
                None
            }
        }
    }

    fn read_all(&self) -> Result<Vec<(u64, T)>> {
        let mut documents = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(envelope) = Self::read_envelope(&path) {
                documents.push((envelope.seq, envelope.document));
            }
        }
        documents.sort_by_key(|(seq, _)| *seq);
        Ok(documents)
    }

    fn upsert(&self, item: &T) -> Result<()> {
        let path = self.path_for(item.id());
        let mut next_seq = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);

        let seq = match Self::read_envelope(&path) {
            Some(existing) => existing.seq,
            None => {
                *next_seq += 1;
                *next_seq
            }
        };
        Self::write_envelope(&path, seq, item)
    }

    fn write_envelope(path: &Path, seq: u64, item: &T) -> Result<()> {
        let bytes = serde_json::to_vec(&Envelope {
            seq,
            document: item,
        })?;

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl<T: Storable> Storage<T> for DocumentBackend<T> {
    fn all(&self) -> Result<Vec<T>> {
        Ok(self
            .read_all()?
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    fn add(&self, item: &T) -> Result<()> {
        self.upsert(item)
    }

    fn update(&self, item: &T) -> Result<()> {
        self.upsert(item)
    }

    fn replace(&self, item: &T) -> Result<bool> {
        let path = self.path_for(item.id());
        let _writer = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
        match Self::read_envelope(&path) {
            Some(existing) => {
                Self::write_envelope(&path, existing.seq, item)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, id: &str) -> Result<Option<T>> {
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Self::read_envelope(&self.path_for(id)).map(|envelope| envelope.document))
    }

    fn remove(&self, id: &str) -> Result<bool> {
        if id.is_empty() {
            return Ok(true);
        }
        let _writer = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        let _writer = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Counts decodable documents only, so it always agrees with [`Storage::all`].
    fn count(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }
}
