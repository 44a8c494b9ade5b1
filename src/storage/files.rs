use redb::{ReadableTable, Table, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{FileRecord, Insertion, Origin, StorageTotals};
use super::tables::*;

type IndexTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Read a msgpack id list from an index table.
fn index_ids<T>(table: &T, key: &str) -> Result<Vec<String>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(data) => Ok(rmp_serde::from_slice(data.value())?),
        None => Ok(Vec::new()),
    }
}

fn index_add(table: &mut IndexTable<'_>, key: &str, id: &str) -> Result<(), DatabaseError> {
    let mut ids = index_ids(&*table, key)?;
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
        let data = rmp_serde::to_vec_named(&ids)?;
        table.insert(key, data.as_slice())?;
    }
    Ok(())
}

fn index_remove(table: &mut IndexTable<'_>, key: &str, id: &str) -> Result<(), DatabaseError> {
    let mut ids = index_ids(&*table, key)?;
    ids.retain(|existing| existing != id);
    if ids.is_empty() {
        table.remove(key)?;
    } else {
        let data = rmp_serde::to_vec_named(&ids)?;
        table.insert(key, data.as_slice())?;
    }
    Ok(())
}

/// The file table and its three indexes, opened together inside one write transaction.
struct FileTables<'txn> {
    files: Table<'txn, &'static str, &'static [u8]>,
    digests: IndexTable<'txn>,
    locators: IndexTable<'txn>,
    projects: IndexTable<'txn>,
}

impl<'txn> FileTables<'txn> {
    fn open(write_txn: &'txn WriteTransaction) -> Result<Self, DatabaseError> {
        Ok(Self {
            files: write_txn.open_table(FILES)?,
            digests: write_txn.open_table(DIGEST_FILES)?,
            locators: write_txn.open_table(LOCATOR_FILES)?,
            projects: write_txn.open_table(PROJECT_FILES)?,
        })
    }

    fn get(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        match self.files.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    fn first_with_digest(&self, digest: &str) -> Result<Option<FileRecord>, DatabaseError> {
        for id in index_ids(&self.digests, digest)? {
            if let Some(file) = self.get(&id)? {
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    fn put(&mut self, file: &FileRecord) -> Result<(), DatabaseError> {
        let data = rmp_serde::to_vec_named(file)?;
        self.files.insert(file.id.as_str(), data.as_slice())?;

        if let Some(ref digest) = file.content_digest {
            index_add(&mut self.digests, digest, &file.id)?;
        }
        index_add(&mut self.locators, &file.storage_locator, &file.id)?;
        index_add(&mut self.projects, &file.project_id.to_string(), &file.id)?;
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let Some(file) = self.get(id)? else {
            return Ok(None);
        };

        self.files.remove(id)?;
        if let Some(ref digest) = file.content_digest {
            index_remove(&mut self.digests, digest, id)?;
        }
        index_remove(&mut self.locators, &file.storage_locator, id)?;
        index_remove(&mut self.projects, &file.project_id.to_string(), id)?;
        Ok(Some(file))
    }
}

impl Database {
    // ========================================================================
    // File operations
    // ========================================================================

    /// Store a file record verbatim and update its indexes.
    pub fn put_file(&self, file: &FileRecord) -> Result<(), DatabaseError> {
        debug_assert!(!file.id.is_empty(), "file id must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut tables = FileTables::open(&write_txn)?;
            tables.put(file)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert a new file record while keeping every record with the same
    /// digest on a single locator and size.
    ///
    /// The digest index is re-checked inside the write transaction, so two
    /// uploads of the same content that both stored a fresh object end up
    /// sharing whichever locator committed first.
    pub fn insert_file(&self, file: &FileRecord, origin: Origin) -> Result<Insertion, DatabaseError> {
        debug_assert!(!file.id.is_empty(), "file id must not be empty");

        let write_txn = self.begin_write()?;
        let insertion = {
            let mut tables = FileTables::open(&write_txn)?;
            let existing = match file.content_digest.as_deref() {
                Some(digest) => tables.first_with_digest(digest)?,
                None => None,
            };

            let insertion = match (existing, origin) {
                (None, Origin::Reused) => Insertion::Stale,
                (None, Origin::Stored) => Insertion::Inserted(file.clone()),
                (Some(existing), Origin::Reused) => Insertion::Inserted(FileRecord {
                    storage_locator: existing.storage_locator,
                    size: existing.size,
                    ..file.clone()
                }),
                (Some(existing), Origin::Stored) => {
                    if existing.storage_locator == file.storage_locator {
                        Insertion::Inserted(FileRecord {
                            size: existing.size,
                            ..file.clone()
                        })
                    } else {
                        Insertion::Adopted {
                            record: FileRecord {
                                storage_locator: existing.storage_locator,
                                size: existing.size,
                                ..file.clone()
                            },
                            discarded_locator: file.storage_locator.clone(),
                        }
                    }
                }
            };

            match &insertion {
                Insertion::Inserted(record) | Insertion::Adopted { record, .. } => {
                    tables.put(record)?;
                }
                Insertion::Stale => {}
            }
            insertion
        };

        if matches!(insertion, Insertion::Stale) {
            write_txn.abort()?;
        } else {
            write_txn.commit()?;
        }
        Ok(insertion)
    }

    /// Get a file by its UUID
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        match table.get(id)? {
            Some(data) => {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    /// Any one record holding this digest.
    pub fn find_file_by_digest(&self, digest: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let digests = read_txn.open_table(DIGEST_FILES)?;
        let files = read_txn.open_table(FILES)?;

        for id in index_ids(&digests, digest)? {
            if let Some(data) = files.get(id.as_str())? {
                return Ok(Some(rmp_serde::from_slice(data.value())?));
            }
        }
        Ok(None)
    }

    pub fn count_files_by_digest(&self, digest: &str) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DIGEST_FILES)?;
        Ok(index_ids(&table, digest)?.len() as u64)
    }

    pub fn count_files_by_locator(&self, locator: &str) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(LOCATOR_FILES)?;
        Ok(index_ids(&table, locator)?.len() as u64)
    }

    /// Delete a file record and its index entries, returning the removed record.
    pub fn delete_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut tables = FileTables::open(&write_txn)?;
            tables.remove(id)?
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Files of a project, newest first
    pub fn list_project_files(&self, project_id: u64) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(PROJECT_FILES)?;
        let files_table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for file_id in index_ids(&index, &project_id.to_string())? {
            if let Some(data) = files_table.get(file_id.as_str())? {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                files.push(file);
            }
        }

        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    /// Get all files (for purge statistics and owner totals)
    pub fn get_all_files(&self) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let file: FileRecord = rmp_serde::from_slice(value.value())?;
            files.push(file);
        }

        Ok(files)
    }

    /// Bytes and record count attributed to an owner. Deduplicated records
    /// count in full, since each is a file the owner uploaded.
    pub fn owner_storage_totals(&self, owner_id: &str) -> Result<StorageTotals, DatabaseError> {
        let totals = self
            .get_all_files()?
            .iter()
            .filter(|f| f.owner_id == owner_id)
            .fold(StorageTotals::default(), |acc, f| StorageTotals {
                total_storage: acc.total_storage + f.size,
                total_files: acc.total_files + 1,
            });
        Ok(totals)
    }

    pub fn project_storage_totals(&self, project_id: u64) -> Result<StorageTotals, DatabaseError> {
        let totals = self
            .list_project_files(project_id)?
            .iter()
            .fold(StorageTotals::default(), |acc, f| StorageTotals {
                total_storage: acc.total_storage + f.size,
                total_files: acc.total_files + 1,
            });
        Ok(totals)
    }
}
