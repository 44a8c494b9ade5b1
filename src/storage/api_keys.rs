use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{next_id, Database, DatabaseError};
use super::models::ApiKey;
use super::tables::*;

/// Prefix of every minted key value
pub const API_KEY_PREFIX: &str = "openupload_sk_";

impl Database {
    // ========================================================================
    // API key operations
    // ========================================================================

    /// Mint a new active key for a project.
    pub fn create_api_key(
        &self,
        name: &str,
        owner_id: &str,
        project_id: u64,
    ) -> Result<ApiKey, DatabaseError> {
        let write_txn = self.begin_write()?;
        let api_key = {
            let id = next_id(&write_txn, "api_keys")?;
            let api_key = ApiKey {
                id,
                key: format!("{API_KEY_PREFIX}{}", uuid::Uuid::new_v4()),
                name: name.to_string(),
                is_active: true,
                created_at: Utc::now(),
                last_used_at: None,
                owner_id: owner_id.to_string(),
                project_id,
            };

            let mut keys = write_txn.open_table(API_KEYS)?;
            let data = rmp_serde::to_vec_named(&api_key)?;
            keys.insert(id, data.as_slice())?;

            let mut values = write_txn.open_table(API_KEY_VALUES)?;
            values.insert(api_key.key.as_str(), id)?;
            api_key
        };
        write_txn.commit()?;
        Ok(api_key)
    }

    pub fn get_api_key(&self, id: u64) -> Result<Option<ApiKey>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(API_KEYS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a key value to its record, ignoring deactivated keys.
    pub fn find_active_api_key(&self, value: &str) -> Result<Option<ApiKey>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let values = read_txn.open_table(API_KEY_VALUES)?;
        let Some(id) = values.get(value)?.map(|v| v.value()) else {
            return Ok(None);
        };

        let keys = read_txn.open_table(API_KEYS)?;
        let key: Option<ApiKey> = match keys.get(id)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(key.filter(|k| k.is_active))
    }

    /// Record that a key was just used.
    pub fn touch_api_key(&self, id: u64, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let touched = {
            let mut table = write_txn.open_table(API_KEYS)?;
            let existing: Option<ApiKey> = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            match existing {
                Some(mut key) => {
                    key.last_used_at = Some(at);
                    let data = rmp_serde::to_vec_named(&key)?;
                    table.insert(id, data.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(touched)
    }

    /// Keys owned by `owner_id`, optionally narrowed to one project, oldest first
    pub fn list_api_keys(
        &self,
        owner_id: &str,
        project_id: Option<u64>,
    ) -> Result<Vec<ApiKey>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(API_KEYS)?;

        let mut keys = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let key: ApiKey = rmp_serde::from_slice(value.value())?;
            if key.owner_id == owner_id && project_id.map_or(true, |p| key.project_id == p) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub fn list_project_api_keys(&self, project_id: u64) -> Result<Vec<ApiKey>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(API_KEYS)?;

        let mut keys = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let key: ApiKey = rmp_serde::from_slice(value.value())?;
            if key.project_id == project_id {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub fn delete_api_key(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut keys = write_txn.open_table(API_KEYS)?;
            let existing: Option<ApiKey> = match keys.remove(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            match existing {
                Some(key) => {
                    let mut values = write_txn.open_table(API_KEY_VALUES)?;
                    values.remove(key.key.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(deleted)
    }
}
