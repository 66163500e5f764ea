use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Accumulator, AggregatedResult, CacheEntry, RawRow, RowFilter, VersionId, VersionSchema,
};
use crate::store::{ResultCache, RowStore, SchemaProvider, StoreError, StoreResult};

pub const DEMO_VERSION_ID: &str = "6f1c9a52-8d0e-4c1b-9a53-2f4e7d1b0c11";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads a small finalized survey version so the pipeline can be tried out.
pub async fn seed(pool: &PgPool) -> anyhow::Result<VersionId> {
    let version_id = Uuid::parse_str(DEMO_VERSION_ID)?;
    let criteria = vec![
        "1) Calidad docente".to_string(),
        "2) Infraestructura".to_string(),
        "3) Atención administrativa".to_string(),
    ];

    let programs = [
        ("Facultad de Ingeniería", "Ingeniería de Sistemas", "Norte"),
        ("Facultad de Ingeniería", "Ingeniería Civil", "Sur"),
        ("Facultad de Ciencias de la Salud", "Enfermería", "Norte"),
        ("Facultad de Ciencias de la Salud", "Medicina", "Norte"),
        ("Facultad de Derecho", "Derecho", "Sur"),
    ];
    let answers = [
        [json!("5"), json!("4"), json!("4")],
        [json!(4), json!("3★"), json!("no aplica")],
        [json!("3"), json!(2), json!("5")],
        [json!("5 - Excelente"), json!(5), Value::Null],
        [json!("2"), json!("3"), json!("1")],
    ];

    let mut rows: Vec<Value> = Vec::new();
    for (index, (faculty, program, campus)) in programs.iter().enumerate() {
        for offset in 0..answers.len() {
            let [quality, infrastructure, attention] =
                answers[(index + offset) % answers.len()].clone();
            rows.push(json!({
                "Facultad": faculty,
                "Programa": program,
                "Sede": campus,
                "1) Calidad docente": quality,
                "2) Infraestructura": infrastructure,
                "3) Atención administrativa": attention,
            }));
        }
    }

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO survey_satisfaction.versions
        (id, label, faculty_column, program_column, criteria, row_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET label = EXCLUDED.label,
            faculty_column = EXCLUDED.faculty_column,
            program_column = EXCLUDED.program_column,
            criteria = EXCLUDED.criteria,
            row_count = EXCLUDED.row_count
        "#,
    )
    .bind(version_id)
    .bind("Encuesta de satisfacción (demo)")
    .bind("Facultad")
    .bind("Programa")
    .bind(&criteria)
    .bind(rows.len() as i64)
    .execute(&mut *tx)
    .await?;

    for (row_index, data) in rows.into_iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO survey_satisfaction.rows (version_id, row_index, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (version_id, row_index) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(version_id)
        .bind(row_index as i64)
        .bind(Json(data))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await.context("failed to commit seed data")?;

    info!(%version_id, "seeded demo survey version");
    Ok(version_id)
}

/// Row store, result cache and schema provider backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("{value} exceeds BIGINT")))
}

#[async_trait]
impl RowStore for PgStore {
    async fn count_rows(
        &self,
        version_id: VersionId,
        filter: Option<&RowFilter>,
    ) -> StoreResult<u64> {
        let count: i64 = match filter {
            Some(filter) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM survey_satisfaction.rows \
                     WHERE version_id = $1 AND data ->> $2 = $3",
                )
                .bind(version_id)
                .bind(&filter.column)
                .bind(&filter.value)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM survey_satisfaction.rows WHERE version_id = $1",
                )
                .bind(version_id)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(to_u64(count))
    }

    async fn fetch_rows(
        &self,
        version_id: VersionId,
        offset: u64,
        limit: u64,
        filter: Option<&RowFilter>,
    ) -> StoreResult<Vec<RawRow>> {
        let mut query = String::from(
            "SELECT data FROM survey_satisfaction.rows WHERE version_id = $1",
        );
        if filter.is_some() {
            query.push_str(" AND data ->> $4 = $5");
        }
        query.push_str(" ORDER BY row_index LIMIT $2 OFFSET $3");

        let mut rows = sqlx::query(&query)
            .bind(version_id)
            .bind(to_i64(limit)?)
            .bind(to_i64(offset)?);
        if let Some(filter) = filter {
            rows = rows.bind(&filter.column).bind(&filter.value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        let mut page = Vec::with_capacity(records.len());
        for record in records {
            let Json(data): Json<RawRow> = record.try_get("data")?;
            page.push(data);
        }
        Ok(page)
    }

    async fn distinct_values(
        &self,
        version_id: VersionId,
        column: &str,
    ) -> StoreResult<Vec<String>> {
        let values: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT data ->> $2 AS value
            FROM survey_satisfaction.rows
            WHERE version_id = $1 AND btrim(COALESCE(data ->> $2, '')) <> ''
            ORDER BY value
            "#,
        )
        .bind(version_id)
        .bind(column)
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }
}

#[async_trait]
impl ResultCache for PgStore {
    async fn get(&self, version_id: VersionId) -> StoreResult<Option<CacheEntry>> {
        let record = sqlx::query(
            "SELECT result, accumulator, computed_at FROM survey_satisfaction.result_cache \
             WHERE version_id = $1",
        )
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };
        let Json(result): Json<AggregatedResult> = record.try_get("result")?;
        let Json(accumulator): Json<Accumulator> = record.try_get("accumulator")?;
        let computed_at: DateTime<Utc> = record.try_get("computed_at")?;
        Ok(Some(CacheEntry {
            result,
            accumulator,
            computed_at,
        }))
    }

    async fn upsert(&self, version_id: VersionId, entry: &CacheEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO survey_satisfaction.result_cache
            (version_id, result, accumulator, computed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (version_id) DO UPDATE
            SET result = EXCLUDED.result,
                accumulator = EXCLUDED.accumulator,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(version_id)
        .bind(Json(&entry.result))
        .bind(Json(&entry.accumulator))
        .bind(entry.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaProvider for PgStore {
    async fn get_schema(&self, version_id: VersionId) -> StoreResult<Option<VersionSchema>> {
        let record = sqlx::query(
            "SELECT faculty_column, program_column, criteria, row_count \
             FROM survey_satisfaction.versions WHERE id = $1",
        )
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = record else {
            return Ok(None);
        };
        let row_count: Option<i64> = row.try_get("row_count")?;
        Ok(Some(VersionSchema {
            faculty_column: row.try_get("faculty_column")?,
            program_column: row.try_get("program_column")?,
            criteria: row.try_get("criteria")?,
            row_count: row_count.map(to_u64),
        }))
    }
}
