//! SQLite-backed durable store for workflow instances

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use progress_core::{DurableStore, InstanceUpdate, StoreError, WorkflowInstance};

/// Durable store keyed by (owner_id, instance_id)
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Raw column values, decoded outside the rusqlite row closure
struct InstanceRow {
    instance_id: String,
    owner_id: String,
    preset_id: String,
    status: String,
    current_step_id: String,
    completed_steps: String,
    skipped_steps: String,
    context_data: String,
    started_at: String,
    last_active_at: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`
    pub fn open(db_path: &Path) -> rusqlite::Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
                owner_id TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                preset_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_step_id TEXT NOT NULL,
                completed_steps TEXT NOT NULL,
                skipped_steps TEXT NOT NULL,
                context_data TEXT NOT NULL,
                started_at TEXT NOT NULL,
                last_active_at TEXT NOT NULL,
                PRIMARY KEY (owner_id, instance_id)
            );
            CREATE INDEX IF NOT EXISTS idx_instances_owner ON workflow_instances(owner_id);
            "#,
        )
    }
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {value:?}: {e}")))
}

impl InstanceRow {
    fn into_instance(self) -> Result<WorkflowInstance, StoreError> {
        Ok(WorkflowInstance {
            id: self.instance_id,
            owner_id: self.owner_id,
            preset_id: self.preset_id,
            status: self.status.parse().map_err(StoreError::Serialization)?,
            current_step_id: self.current_step_id,
            completed_steps: serde_json::from_str(&self.completed_steps)?,
            skipped_steps: serde_json::from_str(&self.skipped_steps)?,
            context_data: serde_json::from_str(&self.context_data)?,
            started_at: parse_time(&self.started_at)?,
            last_active_at: parse_time(&self.last_active_at)?,
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
    ) -> Result<WorkflowInstance, StoreError> {
        let conn = self.conn.lock().await;

        let row = conn
            .query_row(
                "SELECT instance_id, owner_id, preset_id, status, current_step_id,
                        completed_steps, skipped_steps, context_data, started_at, last_active_at
                 FROM workflow_instances WHERE owner_id = ?1 AND instance_id = ?2",
                params![owner_id, instance_id],
                |row| {
                    Ok(InstanceRow {
                        instance_id: row.get(0)?,
                        owner_id: row.get(1)?,
                        preset_id: row.get(2)?,
                        status: row.get(3)?,
                        current_step_id: row.get(4)?,
                        completed_steps: row.get(5)?,
                        skipped_steps: row.get(6)?,
                        context_data: row.get(7)?,
                        started_at: row.get(8)?,
                        last_active_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .map_err(unavailable)?;

        match row {
            Some(row) => row.into_instance(),
            None => Err(StoreError::NotFound {
                owner_id: owner_id.to_string(),
                instance_id: instance_id.to_string(),
            }),
        }
    }

    async fn update_instance(
        &self,
        owner_id: &str,
        instance_id: &str,
        update: &InstanceUpdate,
    ) -> Result<(), StoreError> {
        let completed = serde_json::to_string(&update.completed_steps)?;
        let skipped = serde_json::to_string(&update.skipped_steps)?;
        let context = serde_json::to_string(&update.context_data)?;

        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE workflow_instances
                 SET current_step_id = ?3, completed_steps = ?4, skipped_steps = ?5,
                     context_data = ?6, status = ?7, last_active_at = ?8
                 WHERE owner_id = ?1 AND instance_id = ?2",
                params![
                    owner_id,
                    instance_id,
                    update.current_step_id,
                    completed,
                    skipped,
                    context,
                    update.status.as_str(),
                    update.last_active_at.to_rfc3339(),
                ],
            )
            .map_err(unavailable)?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                owner_id: owner_id.to_string(),
                instance_id: instance_id.to_string(),
            });
        }

        tracing::debug!(owner_id, instance_id, "Updated workflow instance");
        Ok(())
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        let completed = serde_json::to_string(&instance.completed_steps)?;
        let skipped = serde_json::to_string(&instance.skipped_steps)?;
        let context = serde_json::to_string(&instance.context_data)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_instances
             (owner_id, instance_id, preset_id, status, current_step_id,
              completed_steps, skipped_steps, context_data, started_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                instance.owner_id,
                instance.id,
                instance.preset_id,
                instance.status.as_str(),
                instance.current_step_id,
                completed,
                skipped,
                context,
                instance.started_at.to_rfc3339(),
                instance.last_active_at.to_rfc3339(),
            ],
        )
        .map_err(unavailable)?;

        tracing::debug!(
            owner_id = %instance.owner_id,
            instance_id = %instance.id,
            preset_id = %instance.preset_id,
            "Inserted workflow instance"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::{builtin_presets, WorkflowStatus};
    use serde_json::json;

    fn started() -> WorkflowInstance {
        let presets = builtin_presets();
        WorkflowInstance::start("owner-1", &presets["market-research"]).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        let instance = started();

        store.insert_instance(&instance).await.unwrap();
        let loaded = store.get_instance("owner-1", &instance.id).await.unwrap();

        assert_eq!(loaded.id, instance.id);
        assert_eq!(loaded.preset_id, "market-research");
        assert_eq!(loaded.current_step_id, "define-area");
        assert_eq!(loaded.status, WorkflowStatus::Active);
        assert!(loaded.completed_steps.is_empty());
        assert_eq!(loaded.started_at.timestamp(), instance.started_at.timestamp());
    }

    #[tokio::test]
    async fn test_update_overwrites_mutable_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let mut instance = started();
        store.insert_instance(&instance).await.unwrap();

        instance.completed_steps.insert("define-area");
        instance.current_step_id = "comparables".to_string();
        instance
            .context_data
            .insert("location".to_string(), json!("Leith"));
        store
            .update_instance("owner-1", &instance.id, &instance.to_update())
            .await
            .unwrap();

        let loaded = store.get_instance("owner-1", &instance.id).await.unwrap();
        assert_eq!(loaded.current_step_id, "comparables");
        assert!(loaded.completed_steps.contains("define-area"));
        assert_eq!(loaded.context_data["location"], json!("Leith"));
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let instance = started();

        let err = store.get_instance("owner-1", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = store
            .update_instance("owner-1", &instance.id, &instance.to_update())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        let store = SqliteStore::in_memory().unwrap();
        let instance = started();
        store.insert_instance(&instance).await.unwrap();

        let err = store.get_instance("owner-2", &instance.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.db");
        let instance = started();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_instance(&instance).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.get_instance("owner-1", &instance.id).await.unwrap();
        assert_eq!(loaded.id, instance.id);
    }
}
