use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::{NoteStore, StoreError};
use crate::models::{AuthorProfile, AuthorshipRange, NoteRecord, NoteUpdate, PermissionLevel};

/// Author row as aggregated by `load_note`
#[derive(Debug, Deserialize)]
struct AuthorRow {
    user_id: String,
    name: Option<String>,
    color: String,
}

/// PostgreSQL note store. Tables are described in `db/schema.sql`.
pub struct PgNoteStore {
    pool: PgPool,
}

impl PgNoteStore {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    fn log_pool(&self, action: &str, note: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{} note {}. Pool connections: {} idle, {} in use",
            action,
            note,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, StoreError> {
        match self.pool.begin().await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool: {}. Pool state: {} idle, {} total",
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                Err(e.into())
            }
        }
    }
}

fn parse_id(note_id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(note_id).map_err(|_| StoreError::NotFound(note_id.to_string()))
}

#[async_trait]
impl NoteStore for PgNoteStore {
    async fn load_note(&self, key: &str) -> Result<NoteRecord, StoreError> {
        self.log_pool("Loading", key);

        let mut tx = self.begin().await?;

        let query_sql = r#"
            SELECT
                n.id,
                n.alias,
                n.title,
                n.content,
                n.owner,
                n.permission,
                n.last_change_user,
                n.authorship,
                n.created_at,
                n.updated_at,
                COALESCE(
                    (SELECT json_agg(json_build_object(
                        'user_id', a.user_id,
                        'name', a.name,
                        'color', a.color
                    )) FROM note_authors a WHERE a.note_id = n.id),
                    '[]'
                ) AS authors
            FROM notes n
            WHERE
                (n.id::text = $1 OR n.alias = $1)
                AND n.deleted = FALSE
            LIMIT 1;
        "#;

        let row = sqlx::query(query_sql)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        let row = row.ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let id: Uuid = row.try_get("id")?;
        let permission_raw: String = row.try_get("permission")?;
        let permission = permission_raw
            .parse::<PermissionLevel>()
            .map_err(StoreError::Corrupt)?;

        let authorship: Option<Json<Vec<AuthorshipRange>>> = row.try_get("authorship")?;
        let authors: Vec<AuthorRow> = serde_json::from_value(row.try_get("authors")?)
            .map_err(|e| StoreError::Corrupt(format!("authors of note {}: {}", id, e)))?;

        let record = NoteRecord {
            id: id.to_string(),
            alias: row.try_get("alias")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            owner: row.try_get("owner")?,
            permission,
            last_change_user: row.try_get("last_change_user")?,
            authorship: authorship.map(|j| j.0).unwrap_or_default(),
            authors: authors
                .into_iter()
                .map(|a| AuthorProfile { user_id: a.user_id, name: a.name, color: a.color })
                .collect(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        info!("Note '{}' loaded ({} chars)", record.id, record.content.chars().count());
        Ok(record)
    }

    async fn update_note(&self, update: &NoteUpdate) -> Result<(), StoreError> {
        self.log_pool("Updating", &update.note_id);
        let note_uuid = parse_id(&update.note_id)?;

        let mut tx = self.begin().await?;

        let update_sql = r#"
            UPDATE notes
            SET title = $1,
                content = $2,
                authorship = $3,
                last_change_user = $4,
                updated_at = $5
            WHERE id = $6
                AND deleted = FALSE
            RETURNING id;
        "#;
        let updated = sqlx::query(update_sql)
            .bind(&update.title)
            .bind(&update.content)
            .bind(Json(&update.authorship))
            .bind(&update.last_change_user)
            .bind(update.updated_at)
            .bind(note_uuid)
            .fetch_optional(&mut *tx)
            .await?;

        if updated.is_none() {
            // Dropping the transaction rolls it back
            error!("Note not found for update: {}", update.note_id);
            return Err(StoreError::NotFound(update.note_id.clone()));
        }

        let author_sql = r#"
            INSERT INTO note_authors(note_id, user_id, name, color)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (note_id, user_id) DO NOTHING;
        "#;
        for author in &update.new_authors {
            sqlx::query(author_sql)
                .bind(note_uuid)
                .bind(&author.user_id)
                .bind(&author.name)
                .bind(&author.color)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Note updated: {}", update.note_id);
        Ok(())
    }

    async fn create_revision(&self, note_id: &str) -> Result<(), StoreError> {
        self.log_pool("Saving revision of", note_id);
        let note_uuid = parse_id(note_id)?;

        let query_sql = r#"
            INSERT INTO note_revisions(note_id, content, authorship, created_at)
            SELECT n.id, n.content, n.authorship, NOW()
            FROM notes n
            WHERE n.id = $1 AND n.deleted = FALSE
            RETURNING id;
        "#;
        let row = sqlx::query(query_sql)
            .bind(note_uuid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let revision_id: Uuid = row.try_get("id")?;
                info!("Revision {} saved for note {}", revision_id, note_id);
                Ok(())
            }
            None => Err(StoreError::NotFound(note_id.to_string())),
        }
    }

    async fn increment_view_count(&self, note_id: &str) -> Result<(), StoreError> {
        let note_uuid = parse_id(note_id)?;
        let result = sqlx::query("UPDATE notes SET view_count = view_count + 1 WHERE id = $1 AND deleted = FALSE")
            .bind(note_uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(note_id.to_string()));
        }
        Ok(())
    }

    async fn update_permission(&self, note_id: &str, permission: PermissionLevel) -> Result<(), StoreError> {
        self.log_pool("Changing permission of", note_id);
        let note_uuid = parse_id(note_id)?;
        let result = sqlx::query("UPDATE notes SET permission = $1, updated_at = NOW() WHERE id = $2 AND deleted = FALSE")
            .bind(permission.to_string())
            .bind(note_uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(note_id.to_string()));
        }
        Ok(())
    }

    async fn delete_note(&self, note_id: &str) -> Result<(), StoreError> {
        self.log_pool("Deleting", note_id);
        let note_uuid = parse_id(note_id)?;
        let result = sqlx::query("UPDATE notes SET deleted = TRUE, updated_at = NOW() WHERE id = $1 AND deleted = FALSE")
            .bind(note_uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(note_id.to_string()));
        }
        Ok(())
    }

    async fn touch_user_history(&self, user_id: &str, note_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let note_uuid = parse_id(note_id)?;
        let query_sql = r#"
            INSERT INTO user_history(user_id, note_id, visited_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, note_id) DO UPDATE
                SET visited_at = GREATEST(user_history.visited_at, EXCLUDED.visited_at);
        "#;
        sqlx::query(query_sql)
            .bind(user_id)
            .bind(note_uuid)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
