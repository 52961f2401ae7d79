use crate::gateway::BatchGateway;
use crate::models::FileRecord;
use crate::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const SELECT_FILES: &str = "SELECT id, name, path, size, mtime, category, needs_categorization, is_new, excluded_from_move, active FROM files";

// Keeps every statement well under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;
const INSERT_CHUNK: usize = 90;

/// `BatchGateway` over the `files` table.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl BatchGateway for SqliteGateway {
    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, FileRecord>> {
        let mut found = HashMap::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(SELECT_FILES);
            query.push(" WHERE id IN (");
            let mut list = query.separated(", ");
            for id in chunk {
                list.push_bind(id.as_str());
            }
            list.push_unseparated(")");
            let rows = query
                .build_query_as::<FileRecord>()
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                found.insert(row.id.clone(), row);
            }
        }
        debug!(requested = ids.len(), found = found.len(), "get_by_ids");
        Ok(found)
    }

    async fn batch_update(&self, records: &[FileRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut updated = 0usize;
        for record in records {
            let res = sqlx::query(
                r#"
                UPDATE files SET
                    name = ?2,
                    path = ?3,
                    size = ?4,
                    mtime = ?5,
                    category = ?6,
                    needs_categorization = ?7,
                    is_new = ?8,
                    excluded_from_move = ?9,
                    active = ?10,
                    updated_at = strftime('%s','now')
                WHERE id = ?1
                "#,
            )
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.path)
            .bind(record.size)
            .bind(record.mtime)
            .bind(&record.category)
            .bind(record.needs_categorization)
            .bind(record.is_new)
            .bind(record.excluded_from_move)
            .bind(record.active)
            .execute(&mut *tx)
            .await?;
            updated += res.rows_affected() as usize;
        }
        tx.commit().await?;
        debug!(requested = records.len(), updated, "batch_update");
        Ok(updated)
    }

    async fn batch_insert(&self, records: &[FileRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for chunk in records.chunks(INSERT_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "INSERT INTO files (id, name, path, size, mtime, category, needs_categorization, is_new, excluded_from_move, active) ",
            );
            query.push_values(chunk, |mut row, record| {
                row.push_bind(record.id.as_str())
                    .push_bind(record.name.as_str())
                    .push_bind(record.path.as_str())
                    .push_bind(record.size)
                    .push_bind(record.mtime)
                    .push_bind(record.category.as_deref())
                    .push_bind(record.needs_categorization)
                    .push_bind(record.is_new)
                    .push_bind(record.excluded_from_move)
                    .push_bind(record.active);
            });
            query.push(" ON CONFLICT(id) DO NOTHING");
            let res = query.build().execute(&mut *tx).await?;
            inserted += res.rows_affected() as usize;
        }
        tx.commit().await?;
        debug!(requested = records.len(), inserted, "batch_insert");
        Ok(inserted)
    }

    async fn get_existing_names(&self, names: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        for chunk in names.chunks(IN_CHUNK) {
            let mut query =
                QueryBuilder::<Sqlite>::new("SELECT name FROM files WHERE active = 1 AND name IN (");
            let mut list = query.separated(", ");
            for name in chunk {
                list.push_bind(name.as_str());
            }
            list.push_unseparated(")");
            let rows = query
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await?;
            existing.extend(rows);
        }
        Ok(existing)
    }

    async fn get_uncategorized(&self) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "{} WHERE active = 1 AND needs_categorization = 1 ORDER BY name",
            SELECT_FILES
        );
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
