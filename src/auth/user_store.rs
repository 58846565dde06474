//! Sysop account storage, backed by SQLite (spec.md §4.AMBIENT-AUTH).

use crate::auth::models::{User, UserRole};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

pub struct UserStore {
    db_path: String,
}

impl UserStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.create_default_sysop(&conn)?;
        Ok(())
    }

    fn create_default_sysop(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("failed to check for an existing sysop account")?;

        if count == 0 {
            let password_hash =
                hash("sysop123", DEFAULT_COST).context("failed to hash password")?;

            let sysop = User {
                id: Uuid::new_v4(),
                username: "sysop".to_string(),
                password_hash,
                role: UserRole::Sysop,
                created_at: Utc::now().to_rfc3339(),
            };

            conn.execute(
                "INSERT INTO users (id, username, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    sysop.id.to_string(),
                    sysop.username,
                    sysop.password_hash,
                    sysop.role.as_str(),
                    sysop.created_at,
                ],
            )
            .context("failed to insert the default sysop account")?;

            info!("default sysop account created (username: sysop, password: sysop123)");
            warn!("change the default sysop password in production");
        }

        Ok(())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?1",
        )?;

        let user_result = stmt.query_row(params![username], |row| {
            Ok(User {
                id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
                username: row.get(1)?,
                password_hash: row.get(2)?,
                role: UserRole::Sysop,
                created_at: row.get(4)?,
            })
        });

        match user_result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("failed to verify password")?;
                Ok(valid)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        (store, temp_file)
    }

    #[test]
    fn default_sysop_account_is_created() {
        let (store, _temp) = create_test_store();
        let sysop = store.get_user_by_username("sysop").unwrap();
        assert!(sysop.is_some());
        assert_eq!(sysop.unwrap().role, UserRole::Sysop);
    }

    #[test]
    fn password_verification_checks_the_hash() {
        let (store, _temp) = create_test_store();
        assert!(store.verify_password("sysop", "sysop123").unwrap());
        assert!(!store.verify_password("sysop", "wrongpassword").unwrap());
        assert!(!store.verify_password("nonexistent", "password").unwrap());
    }
}
