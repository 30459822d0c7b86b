use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{
    engine::StepKey,
    error::Result,
    storage::{DialogueSession, SessionStorage},
};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dialogue_sessions (
    id TEXT PRIMARY KEY,
    state JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// PostgreSQL implementation of SessionStorage.
///
/// The whole session (step + context) is stored as one JSONB column; the
/// table is created on connect if it does not exist.
pub struct PostgresSessionStorage {
    pool: PgPool,
}

impl PostgresSessionStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl<S: StepKey> SessionStorage<S> for PostgresSessionStorage {
    async fn load(&self, id: &str) -> Result<Option<DialogueSession<S>>> {
        let row = sqlx::query("SELECT state FROM dialogue_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let state: serde_json::Value = row.try_get("state")?;
                let session = serde_json::from_value(state)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session: DialogueSession<S>) -> Result<()> {
        let state = serde_json::to_value(&session)?;
        sqlx::query(
            "INSERT INTO dialogue_sessions (id, state, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (id) DO UPDATE SET state = EXCLUDED.state, updated_at = now()",
        )
        .bind(&session.id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dialogue_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
