use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{path::normalize, Error, Result};

pub const METADATA_EXTENSION: &str = "resmeta";

/// Persisted pairing of a resource uuid with the path of its file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub uuid: Uuid,
    pub path: PathBuf,
}

/// Path <-> uuid database backed by one record file per resource.
///
/// Both lookup directions are indexed and kept consistent by every mutation; a mutation is
/// persisted before it returns.
pub struct MetadataStore {
    dir: PathBuf,
    records: Vec<Record>,
    uuid_to_record: HashMap<Uuid, usize, fxhash::FxBuildHasher>,
    path_to_record: HashMap<PathBuf, usize, fxhash::FxBuildHasher>,
}

impl MetadataStore {
    /// Opens the store in `dir`, creating the directory if needed.
    /// Unreadable or conflicting records are skipped.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        std::fs::create_dir_all(&dir)?;

        let mut store = Self {
            dir,
            records: Vec::new(),
            uuid_to_record: HashMap::default(),
            path_to_record: HashMap::default(),
        };

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&store.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(METADATA_EXTENSION) {
                entries.push(path);
            }
        }
        entries.sort();

        for file in entries {
            let record = match read_record(&file) {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("Skipping malformed metadata record {:?}: {}", file, err);
                    continue;
                }
            };

            if store.contains_uuid(&record.uuid) || store.contains_path(&record.path) {
                log::warn!(
                    "Skipping metadata record {:?}, {} or {:?} is already registered",
                    file,
                    record.uuid,
                    record.path
                );
                continue;
            }

            store.insert(record);
        }

        log::info!(
            "Loaded {} metadata record(s) from {:?}",
            store.records.len(),
            store.dir
        );

        Ok(store)
    }
    pub fn dir(&self) -> &Path {
        &self.dir
    }
    pub fn add(&mut self, uuid: Uuid, path: impl AsRef<Path>) -> Result<()> {
        let path = normalize(path);

        if self.contains_path(&path) {
            return Err(Error::DuplicatePath(path));
        }
        if self.contains_uuid(&uuid) {
            return Err(Error::DuplicateUuid(uuid));
        }

        let record = Record { uuid, path };
        self.persist(&record)?;
        self.insert(record);

        log::debug!("Registered {}", uuid);
        Ok(())
    }
    /// Returns false and leaves the store untouched if `uuid` isn't registered
    pub fn remove(&mut self, uuid: &Uuid) -> Result<bool> {
        let Some(&record_index) = self.uuid_to_record.get(uuid) else {
            log::warn!("Cannot remove metadata for {}: not registered", uuid);
            return Ok(false);
        };

        match std::fs::remove_file(self.record_file(uuid)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Metadata record file of {} was already gone", uuid);
            }
            Err(err) => return Err(err.into()),
        }

        let removed = self.records.swap_remove(record_index);
        self.uuid_to_record.remove(&removed.uuid);
        self.path_to_record.remove(&removed.path);

        //Update references to the moved record
        if let Some(moved) = self.records.get(record_index) {
            self.uuid_to_record.insert(moved.uuid, record_index);
            self.path_to_record.insert(moved.path.clone(), record_index);
        }

        log::debug!("Removed metadata of {}", uuid);
        Ok(true)
    }
    pub fn update(&mut self, uuid: &Uuid, new_path: impl AsRef<Path>) -> Result<()> {
        let new_path = normalize(new_path);
        let &record_index = self
            .uuid_to_record
            .get(uuid)
            .ok_or(Error::UnknownUuid(*uuid))?;

        match self.path_to_record.get(&new_path) {
            Some(&owner) if owner == record_index => return Ok(()),
            Some(_) => return Err(Error::DuplicatePath(new_path)),
            None => {}
        }

        let updated = Record {
            uuid: *uuid,
            path: new_path.clone(),
        };
        self.persist(&updated)?;

        let old_path = std::mem::replace(&mut self.records[record_index].path, new_path.clone());
        self.path_to_record.remove(&old_path);
        self.path_to_record.insert(new_path, record_index);

        log::debug!("Moved {} from {:?} to {:?}", uuid, old_path, updated.path);
        Ok(())
    }
    pub fn path_for(&self, uuid: &Uuid) -> Option<&Path> {
        self.uuid_to_record
            .get(uuid)
            .map(|&index| self.records[index].path.as_path())
    }
    pub fn uuid_for(&self, path: impl AsRef<Path>) -> Option<Uuid> {
        self.path_to_record
            .get(&normalize(path))
            .map(|&index| self.records[index].uuid)
    }
    pub fn contains_uuid(&self, uuid: &Uuid) -> bool {
        self.uuid_to_record.contains_key(uuid)
    }
    pub fn contains_path(&self, path: impl AsRef<Path>) -> bool {
        self.path_to_record.contains_key(&normalize(path))
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// Returns the records in no particular order
    pub fn records(&self) -> &[Record] {
        &self.records
    }
    fn insert(&mut self, record: Record) {
        let index = self.records.len();
        self.uuid_to_record.insert(record.uuid, index);
        self.path_to_record.insert(record.path.clone(), index);
        self.records.push(record);
    }
    fn record_file(&self, uuid: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", uuid, METADATA_EXTENSION))
    }
    /// Writes the record next to its final location and renames it over the old one, a crash
    /// never leaves a truncated record behind
    fn persist(&self, record: &Record) -> Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(serde_yaml::to_string(record)?.as_bytes())?;
        file.persist(self.record_file(&record.uuid))
            .map_err(|err| err.error)?;

        Ok(())
    }
}

fn read_record(file: &Path) -> anyhow::Result<Record> {
    let reader = std::fs::File::open(file)?;
    let mut record: Record = serde_yaml::from_reader(reader)?;
    record.path = normalize(&record.path);

    Ok(record)
}
