use chrono::Utc;
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::User;
use super::tables::USERS;

impl Database {
    pub fn get_user(&self, uid: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(uid)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Return the stored profile for `uid`, creating it on first sight.
    pub fn get_or_create_user(&self, uid: &str, email: &str) -> Result<User, DatabaseError> {
        let write_txn = self.begin_write()?;
        let user = {
            let mut table = write_txn.open_table(USERS)?;
            let existing: Option<User> = match table.get(uid)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match existing {
                Some(user) => user,
                None => {
                    let user = User {
                        uid: uid.to_string(),
                        email: email.to_string(),
                        created_at: Utc::now(),
                    };
                    let data = rmp_serde::to_vec_named(&user)?;
                    table.insert(uid, data.as_slice())?;
                    user
                }
            }
        };
        write_txn.commit()?;
        Ok(user)
    }
}
