use chrono::Utc;
use redb::ReadableTable;

use super::db::{next_id, Database, DatabaseError};
use super::models::{ApiKey, Project};
use super::tables::*;

impl Database {
    // ========================================================================
    // Project operations
    // ========================================================================

    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        owner_id: &str,
    ) -> Result<Project, DatabaseError> {
        let write_txn = self.begin_write()?;
        let project = {
            let id = next_id(&write_txn, "projects")?;
            let project = Project {
                id,
                name: name.to_string(),
                description: description.map(|d| d.to_string()),
                created_at: Utc::now(),
                owner_id: owner_id.to_string(),
            };
            let mut table = write_txn.open_table(PROJECTS)?;
            let data = rmp_serde::to_vec_named(&project)?;
            table.insert(id, data.as_slice())?;
            project
        };
        write_txn.commit()?;
        Ok(project)
    }

    pub fn get_project(&self, id: u64) -> Result<Option<Project>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PROJECTS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Projects owned by `owner_id`, newest first
    pub fn list_projects(&self, owner_id: &str) -> Result<Vec<Project>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PROJECTS)?;

        let mut projects = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let project: Project = rmp_serde::from_slice(value.value())?;
            if project.owner_id == owner_id {
                projects.push(project);
            }
        }

        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(projects)
    }

    /// Delete a project together with its API keys. File records are left to
    /// the caller, which must release them through reference counting first.
    pub fn delete_project(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut projects = write_txn.open_table(PROJECTS)?;
            let existed = projects.remove(id)?.is_some();

            if existed {
                let mut keys = write_txn.open_table(API_KEYS)?;
                let mut values = write_txn.open_table(API_KEY_VALUES)?;

                let mut doomed: Vec<ApiKey> = Vec::new();
                for result in keys.iter()? {
                    let (_, value) = result?;
                    let key: ApiKey = rmp_serde::from_slice(value.value())?;
                    if key.project_id == id {
                        doomed.push(key);
                    }
                }
                for key in doomed {
                    keys.remove(key.id)?;
                    values.remove(key.key.as_str())?;
                }
            }
            existed
        };
        write_txn.commit()?;
        Ok(deleted)
    }
}
