//! Persisted-state repository (spec.md §6 "Persisted state layout", §4.D.3,
//! §4.G): the append-only action log, the belief catalog, and the lead
//! credential table. Grounded on `auth::user_store::UserStore`'s
//! open-per-call `rusqlite::Connection` style, wrapped in `spawn_blocking`
//! so the core's async call sites never block the runtime on file I/O.

use crate::error::{CoreError, CoreResult};
use crate::ids::{FingerprintId, LeadId, VisitId};
use async_trait::async_trait;
use bcrypt::verify;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One row of the append-only `actions` log (spec.md §6).
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub id: String,
    pub object_id: String,
    pub object_type: String,
    pub verb: String,
    pub visit_id: VisitId,
    pub fingerprint_id: FingerprintId,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Reverse lookup used by session resolution (spec.md §4.D.1): the
    /// fingerprint currently owned by this lead, if any.
    async fn fingerprint_for_lead(&self, lead_id: &LeadId) -> CoreResult<Option<FingerprintId>>;

    /// Rebuild `held_beliefs` for a fingerprint from its action history
    /// (spec.md §4.D.3) — used only on a fresh-fingerprint cache miss when a
    /// lead is already known.
    async fn load_held_beliefs(
        &self,
        fingerprint_id: &FingerprintId,
    ) -> CoreResult<HashMap<String, Vec<String>>>;

    async fn ensure_fingerprint(
        &self,
        fingerprint_id: &FingerprintId,
        lead_id: Option<&LeadId>,
    ) -> CoreResult<()>;

    async fn ensure_visit(
        &self,
        visit_id: &VisitId,
        fingerprint_id: &FingerprintId,
        campaign_id: Option<&str>,
    ) -> CoreResult<()>;

    async fn append_action(&self, action: ActionRecord) -> CoreResult<()>;

    /// Belief-slug -> belief-id resolution (spec.md §4.G): a single-row
    /// query against the canonical `beliefs` catalog. A missing slug is not
    /// an error here — the caller turns `None` into a warning and drops the
    /// event.
    async fn resolve_belief_id(&self, slug: &str) -> CoreResult<Option<String>>;

    /// Verify a lead's unlock credentials (spec.md §6 `leads` table).
    async fn verify_lead_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> CoreResult<Option<LeadId>>;
}

/// SQLite-backed implementation. One connection is opened per call, same as
/// `UserStore`, and run via `spawn_blocking` since `rusqlite` is synchronous.
#[derive(Clone)]
pub struct SqliteRepository {
    db_path: Arc<String>,
}

impl SqliteRepository {
    pub fn new(db_path: impl Into<String>) -> CoreResult<Self> {
        let db_path = db_path.into();
        let repo = Self {
            db_path: Arc::new(db_path),
        };
        repo.init_db()?;
        Ok(repo)
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(self.db_path.as_str())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    fn init_db(&self) -> CoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                id TEXT PRIMARY KEY,
                lead_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS visits (
                id TEXT PRIMARY KEY,
                fingerprint_id TEXT NOT NULL,
                campaign_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                object_id TEXT NOT NULL,
                object_type TEXT NOT NULL,
                verb TEXT NOT NULL,
                visit_id TEXT NOT NULL,
                fingerprint_id TEXT NOT NULL,
                duration_ms INTEGER,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS beliefs (
                id TEXT PRIMARY KEY,
                slug TEXT UNIQUE NOT NULL
            );
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                first_name TEXT,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actions_fingerprint ON actions(fingerprint_id, created_at);
            ",
        )?;
        Ok(())
    }

    async fn blocking<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(db_path.as_str())?;
            f(&conn)
        })
        .await
        .map_err(|e| CoreError::Transient(anyhow::anyhow!(e)))?
        .map_err(CoreError::from)
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn fingerprint_for_lead(&self, lead_id: &LeadId) -> CoreResult<Option<FingerprintId>> {
        let lead_id = lead_id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id FROM fingerprints WHERE lead_id = ?1",
                params![lead_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
        .await?
        .map(|s| s.parse().map_err(|e: uuid::Error| CoreError::invariant(e.to_string())))
        .transpose()
    }

    async fn load_held_beliefs(
        &self,
        fingerprint_id: &FingerprintId,
    ) -> CoreResult<HashMap<String, Vec<String>>> {
        let fingerprint_id = fingerprint_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT object_id, verb FROM actions
                 WHERE fingerprint_id = ?1 AND object_type = 'Belief'
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![fingerprint_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut beliefs: HashMap<String, Vec<String>> = HashMap::new();
            for (slug, verb) in rows {
                if verb == "UNSET" {
                    beliefs.remove(&slug);
                    continue;
                }
                let values = beliefs.entry(slug).or_default();
                if !values.iter().any(|v| v == &verb) {
                    values.push(verb);
                }
            }
            Ok(beliefs)
        })
        .await
    }

    async fn ensure_fingerprint(
        &self,
        fingerprint_id: &FingerprintId,
        lead_id: Option<&LeadId>,
    ) -> CoreResult<()> {
        let fingerprint_id = fingerprint_id.to_string();
        let lead_id = lead_id.map(|l| l.to_string());
        let now = Utc::now().to_rfc3339();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO fingerprints (id, lead_id, created_at) VALUES (?1, ?2, ?3)",
                params![fingerprint_id, lead_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn ensure_visit(
        &self,
        visit_id: &VisitId,
        fingerprint_id: &FingerprintId,
        campaign_id: Option<&str>,
    ) -> CoreResult<()> {
        let visit_id = visit_id.to_string();
        let fingerprint_id = fingerprint_id.to_string();
        let campaign_id = campaign_id.map(|c| c.to_string());
        let now = Utc::now().to_rfc3339();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO visits (id, fingerprint_id, campaign_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![visit_id, fingerprint_id, campaign_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_action(&self, action: ActionRecord) -> CoreResult<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO actions (id, object_id, object_type, verb, visit_id, fingerprint_id, duration_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    action.id,
                    action.object_id,
                    action.object_type,
                    action.verb,
                    action.visit_id.to_string(),
                    action.fingerprint_id.to_string(),
                    action.duration_ms,
                    action.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn resolve_belief_id(&self, slug: &str) -> CoreResult<Option<String>> {
        let slug = slug.to_string();
        let result = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT id FROM beliefs WHERE slug = ?1",
                    params![slug],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await?;

        if result.is_none() {
            warn!(slug = %slug, "belief slug not found in catalog");
        }
        Ok(result)
    }

    async fn verify_lead_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> CoreResult<Option<LeadId>> {
        let email = email.to_string();
        let row = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT id, password_hash FROM leads WHERE email = ?1",
                    params![email],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
            })
            .await?;

        let Some((id, hash)) = row else {
            return Ok(None);
        };
        let ok = verify(password, &hash).map_err(|e| CoreError::invariant(e.to_string()))?;
        if !ok {
            return Ok(None);
        }
        id.parse()
            .map(Some)
            .map_err(|e: uuid::Error| CoreError::invariant(e.to_string()))
    }
}

/// In-memory test double used by unit tests throughout the crate.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: parking_lot::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    fingerprint_by_lead: HashMap<String, FingerprintId>,
    actions: Vec<ActionRecord>,
    belief_ids: HashMap<String, String>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_belief(&self, slug: impl Into<String>, id: impl Into<String>) {
        self.inner.lock().belief_ids.insert(slug.into(), id.into());
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn fingerprint_for_lead(&self, lead_id: &LeadId) -> CoreResult<Option<FingerprintId>> {
        Ok(self.inner.lock().fingerprint_by_lead.get(&lead_id.to_string()).cloned())
    }

    async fn load_held_beliefs(
        &self,
        fingerprint_id: &FingerprintId,
    ) -> CoreResult<HashMap<String, Vec<String>>> {
        let state = self.inner.lock();
        let mut beliefs: HashMap<String, Vec<String>> = HashMap::new();
        for action in state
            .actions
            .iter()
            .filter(|a| a.object_type == "Belief" && a.fingerprint_id == *fingerprint_id)
        {
            if action.verb == "UNSET" {
                beliefs.remove(&action.object_id);
            } else {
                let values = beliefs.entry(action.object_id.clone()).or_default();
                if !values.contains(&action.verb) {
                    values.push(action.verb.clone());
                }
            }
        }
        Ok(beliefs)
    }

    async fn ensure_fingerprint(&self, _fingerprint_id: &FingerprintId, _lead_id: Option<&LeadId>) -> CoreResult<()> {
        Ok(())
    }

    async fn ensure_visit(&self, _visit_id: &VisitId, _fingerprint_id: &FingerprintId, _campaign_id: Option<&str>) -> CoreResult<()> {
        Ok(())
    }

    async fn append_action(&self, action: ActionRecord) -> CoreResult<()> {
        self.inner.lock().actions.push(action);
        Ok(())
    }

    async fn resolve_belief_id(&self, slug: &str) -> CoreResult<Option<String>> {
        Ok(self.inner.lock().belief_ids.get(slug).cloned())
    }

    async fn verify_lead_credentials(&self, _email: &str, _password: &str) -> CoreResult<Option<LeadId>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_repository_round_trips_an_action_into_held_beliefs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.sqlite3");
        let repo = SqliteRepository::new(path.to_str().unwrap()).unwrap();

        let fingerprint_id = FingerprintId::new();
        let visit_id = VisitId::new();
        repo.append_action(ActionRecord {
            id: "a1".to_string(),
            object_id: "tier".to_string(),
            object_type: "Belief".to_string(),
            verb: "pro".to_string(),
            visit_id,
            fingerprint_id,
            duration_ms: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let beliefs = repo.load_held_beliefs(&fingerprint_id).await.unwrap();
        assert_eq!(beliefs.get("tier"), Some(&vec!["pro".to_string()]));
    }

    #[tokio::test]
    async fn unset_action_removes_the_belief_from_the_rebuilt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.sqlite3");
        let repo = SqliteRepository::new(path.to_str().unwrap()).unwrap();

        let fingerprint_id = FingerprintId::new();
        let visit_id = VisitId::new();
        for (verb, created_at) in [("pro", Utc::now()), ("UNSET", Utc::now() + chrono::Duration::seconds(1))] {
            repo.append_action(ActionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                object_id: "tier".to_string(),
                object_type: "Belief".to_string(),
                verb: verb.to_string(),
                visit_id,
                fingerprint_id,
                duration_ms: None,
                created_at,
            })
            .await
            .unwrap();
        }

        let beliefs = repo.load_held_beliefs(&fingerprint_id).await.unwrap();
        assert!(!beliefs.contains_key("tier"));
    }
}
