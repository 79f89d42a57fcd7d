// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Repository Implementation
//!
//! sqlx-backed implementation of both domain persistence ports
//! ([`OpportunityRepository`] and [`RunRepository`]) over SQLite.
//!
//! ## Contract Realization
//!
//! - **Conflict policy**: opportunity inserts upsert on
//!   `(source_id, api_opportunity_id)`; a conflicting insert refreshes the
//!   mutable columns rather than duplicating the row.
//! - **Batch atomicity**: one transaction per insert batch; any row error
//!   rolls the whole batch back and the error propagates to the writer.
//! - **Raw-response idempotency**: `(source_id, content_hash)` is unique;
//!   re-capturing a payload returns the existing row id.
//! - **Advisory lock**: an atomic `INSERT OR IGNORE` into a lock table -
//!   rows-affected 1 means the lock was taken.
//! - **Stage idempotence**: stage upserts keep the row with the highest
//!   sequence, making repeated updates latest-write-wins.
//!
//! Collection-valued columns (taxonomy term sets) are stored as JSON text;
//! timestamps as RFC3339 text via the sqlx chrono bindings.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use ingest_pipeline_domain::entities::source::{SourceConfiguration, SourceEndpoint};
use ingest_pipeline_domain::repositories::opportunity_repository::{
    OpportunityFieldUpdates, OpportunityRepository, RowWriteOutcome,
};
use ingest_pipeline_domain::repositories::run_repository::RunRepository;
use ingest_pipeline_domain::{
    AnalyzedOpportunity, ApiSource, PipelineError, PipelineRun, PipelineStageRecord, RawResponse, SourceId,
    StoredOpportunity,
};
use ingest_pipeline_domain::entities::opportunity::OpportunityScoring;
use ingest_pipeline_domain::services::change_detector::parse_wire_date;
use ingest_pipeline_domain::services::freshness::parse_wire_timestamp;

/// SQLite-backed persistence for the ingestion pipeline.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Wraps an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a database file and ensures the schema exists.
    pub async fn from_file(database_path: &str) -> Result<Self, PipelineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", database_path))
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let repository = Self::new(pool);
        repository.ensure_schema().await?;
        Ok(repository)
    }

    /// Opens an in-memory database and ensures the schema exists.
    pub async fn in_memory() -> Result<Self, PipelineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let repository = Self::new(pool);
        repository.ensure_schema().await?;
        Ok(repository)
    }

    /// Creates all tables and indexes if absent.
    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS api_sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                organization TEXT,
                endpoint_url TEXT NOT NULL,
                page_size INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                force_full_reprocessing INTEGER NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE IF NOT EXISTS funding_opportunities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                api_opportunity_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                total_funding_available REAL,
                minimum_award REAL,
                maximum_award REAL,
                open_date TEXT,
                close_date TEXT,
                eligible_applicants TEXT NOT NULL DEFAULT '[]',
                eligible_project_types TEXT NOT NULL DEFAULT '[]',
                eligible_activities TEXT NOT NULL DEFAULT '[]',
                funding_type TEXT,
                updated_at TEXT NOT NULL,
                api_updated_at TEXT,
                last_checked TEXT,
                client_relevance INTEGER,
                project_type_relevance INTEGER,
                funding_attractiveness INTEGER,
                funding_type_score REAL,
                activity_multiplier REAL,
                base_score REAL,
                final_score REAL,
                relevance_reasoning TEXT,
                enhanced_description TEXT,
                actionable_summary TEXT,
                UNIQUE(source_id, api_opportunity_id)
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_funding_opportunities_title
                ON funding_opportunities(source_id, title)"#,
            r#"CREATE TABLE IF NOT EXISTS api_source_configurations (
                source_id TEXT PRIMARY KEY,
                processing_instructions TEXT,
                run_timeout_secs INTEGER
            )"#,
            r#"CREATE TABLE IF NOT EXISTS raw_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                payload TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                call_type TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                item_count INTEGER NOT NULL,
                UNIQUE(source_id, content_hash)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS advisory_locks (
                source_id TEXT PRIMARY KEY,
                locked_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                pipeline_version TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_opportunities INTEGER NOT NULL DEFAULT 0,
                stored INTEGER NOT NULL DEFAULT 0,
                updated INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                filtered_out INTEGER NOT NULL DEFAULT 0,
                error TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS pipeline_stages (
                run_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                input_count INTEGER NOT NULL,
                output_count INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                tokens_used INTEGER NOT NULL,
                api_calls INTEGER NOT NULL,
                error_message TEXT,
                stage_results TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                PRIMARY KEY(run_id, stage)
            )"#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Seeds a source row (admin-surface stand-in, used by embedders and
    /// tests).
    pub async fn insert_source(&self, source: &ApiSource) -> Result<(), PipelineError> {
        sqlx::query(
            r#"INSERT INTO api_sources
               (id, name, organization, endpoint_url, page_size, active, force_full_reprocessing)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   organization = excluded.organization,
                   endpoint_url = excluded.endpoint_url,
                   page_size = excluded.page_size,
                   active = excluded.active,
                   force_full_reprocessing = excluded.force_full_reprocessing"#,
        )
        .bind(source.id.to_string())
        .bind(&source.name)
        .bind(&source.organization)
        .bind(&source.endpoint.url)
        .bind(source.endpoint.page_size)
        .bind(source.active)
        .bind(source.force_full_reprocessing)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_source", e))?;
        Ok(())
    }

    /// Seeds per-source overrides (admin-surface stand-in).
    pub async fn insert_source_configuration(
        &self,
        source_id: SourceId,
        configuration: &SourceConfiguration,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"INSERT INTO api_source_configurations (source_id, processing_instructions, run_timeout_secs)
               VALUES (?, ?, ?)
               ON CONFLICT(source_id) DO UPDATE SET
                   processing_instructions = excluded.processing_instructions,
                   run_timeout_secs = excluded.run_timeout_secs"#,
        )
        .bind(source_id.to_string())
        .bind(&configuration.processing_instructions)
        .bind(configuration.run_timeout_secs.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_source_configuration", e))?;
        Ok(())
    }
}

fn map_sqlx_error(context: &str, error: sqlx::Error) -> PipelineError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("deadlock") || lower.contains("40p01") {
        PipelineError::deadlock(format!("{}: {}", context, message))
    } else {
        PipelineError::database_error(format!("{}: {}", context, message))
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn json_terms(terms: &[String]) -> String {
    serde_json::to_string(terms).unwrap_or_else(|_| "[]".to_string())
}

fn parse_terms(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_opportunity(row: &sqlx::sqlite::SqliteRow) -> Result<StoredOpportunity, PipelineError> {
    let source_id: String = row.try_get("source_id").map_err(|e| map_sqlx_error("decode", e))?;
    let applicants: String = row
        .try_get("eligible_applicants")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let project_types: String = row
        .try_get("eligible_project_types")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let activities: String = row
        .try_get("eligible_activities")
        .map_err(|e| map_sqlx_error("decode", e))?;

    let final_score: Option<f64> = row.try_get("final_score").map_err(|e| map_sqlx_error("decode", e))?;
    let scoring = match final_score {
        None => None,
        Some(final_score) => Some(OpportunityScoring {
            client_relevance: row.try_get::<i64, _>("client_relevance").unwrap_or(0) as u8,
            project_type_relevance: row.try_get::<i64, _>("project_type_relevance").unwrap_or(0) as u8,
            funding_attractiveness: row.try_get::<i64, _>("funding_attractiveness").unwrap_or(0) as u8,
            funding_type_score: row.try_get("funding_type_score").unwrap_or(0.0),
            activity_multiplier: row.try_get("activity_multiplier").unwrap_or(1.0),
            base_score: row.try_get("base_score").unwrap_or(0.0),
            final_score,
            relevance_reasoning: row.try_get("relevance_reasoning").unwrap_or_default(),
        }),
    };

    let open_date: Option<String> = row.try_get("open_date").map_err(|e| map_sqlx_error("decode", e))?;
    let close_date: Option<String> = row.try_get("close_date").map_err(|e| map_sqlx_error("decode", e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| map_sqlx_error("decode", e))?;
    let api_updated_at: Option<String> = row.try_get("api_updated_at").map_err(|e| map_sqlx_error("decode", e))?;
    let last_checked: Option<String> = row.try_get("last_checked").map_err(|e| map_sqlx_error("decode", e))?;

    Ok(StoredOpportunity {
        id: row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?,
        source_id: SourceId::parse(&source_id)?,
        api_opportunity_id: row
            .try_get("api_opportunity_id")
            .map_err(|e| map_sqlx_error("decode", e))?,
        title: row.try_get("title").map_err(|e| map_sqlx_error("decode", e))?,
        description: row.try_get("description").map_err(|e| map_sqlx_error("decode", e))?,
        total_funding_available: row
            .try_get("total_funding_available")
            .map_err(|e| map_sqlx_error("decode", e))?,
        minimum_award: row.try_get("minimum_award").map_err(|e| map_sqlx_error("decode", e))?,
        maximum_award: row.try_get("maximum_award").map_err(|e| map_sqlx_error("decode", e))?,
        open_date: open_date.as_deref().and_then(parse_wire_date),
        close_date: close_date.as_deref().and_then(parse_wire_date),
        eligible_applicants: parse_terms(&applicants),
        eligible_project_types: parse_terms(&project_types),
        eligible_activities: parse_terms(&activities),
        funding_type: row.try_get("funding_type").map_err(|e| map_sqlx_error("decode", e))?,
        updated_at: parse_wire_timestamp(&updated_at).unwrap_or_else(Utc::now),
        api_updated_at: api_updated_at.as_deref().and_then(parse_wire_timestamp),
        last_checked: last_checked.as_deref().and_then(parse_wire_timestamp),
        scoring,
        enhanced_description: row
            .try_get("enhanced_description")
            .map_err(|e| map_sqlx_error("decode", e))?,
        actionable_summary: row
            .try_get("actionable_summary")
            .map_err(|e| map_sqlx_error("decode", e))?,
    })
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

fn timestamp_text(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

#[async_trait]
impl OpportunityRepository for SqliteRepository {
    async fn find_source(&self, source_id: SourceId) -> Result<ApiSource, PipelineError> {
        let row = sqlx::query(
            "SELECT id, name, organization, endpoint_url, page_size, active, force_full_reprocessing \
             FROM api_sources WHERE id = ?",
        )
        .bind(source_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_source", e))?;

        let row = row.ok_or_else(|| PipelineError::SourceNotFound(source_id.to_string()))?;
        Ok(ApiSource {
            id: source_id,
            name: row.try_get("name").map_err(|e| map_sqlx_error("decode", e))?,
            organization: row.try_get("organization").map_err(|e| map_sqlx_error("decode", e))?,
            endpoint: SourceEndpoint {
                url: row.try_get("endpoint_url").map_err(|e| map_sqlx_error("decode", e))?,
                page_size: row
                    .try_get::<Option<i64>, _>("page_size")
                    .map_err(|e| map_sqlx_error("decode", e))?
                    .map(|v| v as u32),
            },
            active: row.try_get("active").map_err(|e| map_sqlx_error("decode", e))?,
            force_full_reprocessing: row
                .try_get("force_full_reprocessing")
                .map_err(|e| map_sqlx_error("decode", e))?,
        })
    }

    async fn find_source_configuration(
        &self,
        source_id: SourceId,
    ) -> Result<Option<SourceConfiguration>, PipelineError> {
        let row = sqlx::query(
            "SELECT processing_instructions, run_timeout_secs FROM api_source_configurations WHERE source_id = ?",
        )
        .bind(source_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_source_configuration", e))?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(SourceConfiguration {
                processing_instructions: row
                    .try_get("processing_instructions")
                    .map_err(|e| map_sqlx_error("decode", e))?,
                run_timeout_secs: row
                    .try_get::<Option<i64>, _>("run_timeout_secs")
                    .map_err(|e| map_sqlx_error("decode", e))?
                    .map(|v| v as u64),
            })),
        }
    }

    async fn find_by_api_ids(
        &self,
        source_id: SourceId,
        ids: &[String],
    ) -> Result<Vec<StoredOpportunity>, PipelineError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM funding_opportunities WHERE source_id = ? AND api_opportunity_id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(source_id.to_string());
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_api_ids", e))?;
        rows.iter().map(row_to_opportunity).collect()
    }

    async fn find_by_titles(
        &self,
        source_id: SourceId,
        titles: &[String],
    ) -> Result<Vec<StoredOpportunity>, PipelineError> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM funding_opportunities WHERE source_id = ? AND title IN ({})",
            placeholders(titles.len())
        );
        let mut query = sqlx::query(&sql).bind(source_id.to_string());
        for title in titles {
            query = query.bind(title);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_titles", e))?;
        rows.iter().map(row_to_opportunity).collect()
    }

    async fn insert_opportunities(
        &self,
        source_id: SourceId,
        records: &[AnalyzedOpportunity],
    ) -> Result<Vec<RowWriteOutcome>, PipelineError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut outcomes = Vec::with_capacity(records.len());
        let now = Utc::now().to_rfc3339();

        for record in records {
            let opportunity = &record.opportunity;
            let scoring = record.scoring.as_ref();
            let result = sqlx::query(
                r#"INSERT INTO funding_opportunities (
                       source_id, api_opportunity_id, title, description,
                       total_funding_available, minimum_award, maximum_award,
                       open_date, close_date,
                       eligible_applicants, eligible_project_types, eligible_activities,
                       funding_type, updated_at, api_updated_at, last_checked,
                       client_relevance, project_type_relevance, funding_attractiveness,
                       funding_type_score, activity_multiplier, base_score, final_score,
                       relevance_reasoning, enhanced_description, actionable_summary
                   ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(source_id, api_opportunity_id) DO UPDATE SET
                       title = excluded.title,
                       description = excluded.description,
                       total_funding_available = excluded.total_funding_available,
                       minimum_award = excluded.minimum_award,
                       maximum_award = excluded.maximum_award,
                       open_date = excluded.open_date,
                       close_date = excluded.close_date,
                       funding_type = excluded.funding_type,
                       updated_at = excluded.updated_at,
                       api_updated_at = excluded.api_updated_at,
                       last_checked = excluded.last_checked
                   RETURNING id"#,
            )
            .bind(source_id.to_string())
            .bind(&opportunity.api_opportunity_id)
            .bind(opportunity.title.trim())
            .bind(&opportunity.description)
            .bind(opportunity.total_funding_available)
            .bind(opportunity.minimum_award)
            .bind(opportunity.maximum_award)
            .bind(date_text(opportunity.open_date.as_deref().and_then(parse_wire_date)))
            .bind(date_text(opportunity.close_date.as_deref().and_then(parse_wire_date)))
            .bind(json_terms(&opportunity.eligible_applicants))
            .bind(json_terms(&opportunity.eligible_project_types))
            .bind(json_terms(&opportunity.eligible_activities))
            .bind(&opportunity.funding_type)
            .bind(&now)
            .bind(timestamp_text(
                opportunity.api_updated_at.as_deref().and_then(parse_wire_timestamp),
            ))
            .bind(&now)
            .bind(scoring.map(|s| i64::from(s.client_relevance)))
            .bind(scoring.map(|s| i64::from(s.project_type_relevance)))
            .bind(scoring.map(|s| i64::from(s.funding_attractiveness)))
            .bind(scoring.map(|s| s.funding_type_score))
            .bind(scoring.map(|s| s.activity_multiplier))
            .bind(scoring.map(|s| s.base_score))
            .bind(scoring.map(|s| s.final_score))
            .bind(scoring.map(|s| s.relevance_reasoning.clone()))
            .bind(&record.enhanced_description)
            .bind(&record.actionable_summary)
            .fetch_one(&mut *tx)
            .await;

            match result {
                Ok(row) => {
                    let database_id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?;
                    outcomes.push(RowWriteOutcome {
                        api_opportunity_id: opportunity.api_opportunity_id.clone(),
                        success: true,
                        database_id: Some(database_id),
                        error: None,
                    });
                }
                Err(error) => {
                    // One bad row aborts the batch; the writer reports all
                    // rows failed and the caller may retry smaller batches
                    tx.rollback().await.ok();
                    return Err(map_sqlx_error("insert_opportunities", error));
                }
            }
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(outcomes)
    }

    async fn update_opportunity_fields(
        &self,
        opportunity_id: i64,
        updates: &OpportunityFieldUpdates,
    ) -> Result<(), PipelineError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<&'static str> = Vec::new();
        if updates.title.is_some() {
            sets.push("title = ?");
        }
        if updates.minimum_award.is_some() {
            sets.push("minimum_award = ?");
        }
        if updates.maximum_award.is_some() {
            sets.push("maximum_award = ?");
        }
        if updates.total_funding_available.is_some() {
            sets.push("total_funding_available = ?");
        }
        if updates.open_date.is_some() {
            sets.push("open_date = ?");
        }
        if updates.close_date.is_some() {
            sets.push("close_date = ?");
        }
        if updates.api_updated_at.is_some() {
            sets.push("api_updated_at = ?");
        }
        sets.push("last_checked = ?");
        sets.push("updated_at = ?");

        let sql = format!("UPDATE funding_opportunities SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);
        if let Some(title) = &updates.title {
            query = query.bind(title);
        }
        if let Some(minimum_award) = updates.minimum_award {
            query = query.bind(minimum_award);
        }
        if let Some(maximum_award) = updates.maximum_award {
            query = query.bind(maximum_award);
        }
        if let Some(total) = updates.total_funding_available {
            query = query.bind(total);
        }
        if let Some(open_date) = &updates.open_date {
            query = query.bind(date_text(*open_date));
        }
        if let Some(close_date) = &updates.close_date {
            query = query.bind(date_text(*close_date));
        }
        if let Some(api_updated_at) = &updates.api_updated_at {
            query = query.bind(timestamp_text(*api_updated_at));
        }
        let now = Utc::now();
        query = query
            .bind(timestamp_text(updates.last_checked.or(Some(now))))
            .bind(now.to_rfc3339())
            .bind(opportunity_id);

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_opportunity_fields", e))?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::database_error(format!(
                "update_opportunity_fields: no row with id {}",
                opportunity_id
            )));
        }
        Ok(())
    }

    async fn insert_raw_response(&self, raw: &RawResponse) -> Result<i64, PipelineError> {
        let inserted = sqlx::query(
            r#"INSERT INTO raw_responses
               (source_id, content_hash, payload, endpoint, call_type, captured_at, item_count)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(source_id, content_hash) DO NOTHING
               RETURNING id"#,
        )
        .bind(raw.source_id.to_string())
        .bind(&raw.content_hash)
        .bind(raw.payload.to_string())
        .bind(&raw.metadata.endpoint)
        .bind(raw.metadata.call_type.to_string())
        .bind(raw.metadata.captured_at.to_rfc3339())
        .bind(raw.metadata.item_count as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_raw_response", e))?;

        if let Some(row) = inserted {
            return row.try_get("id").map_err(|e| map_sqlx_error("decode", e));
        }

        // Conflict path: the payload was captured before; return its id
        let row = sqlx::query("SELECT id FROM raw_responses WHERE source_id = ? AND content_hash = ?")
            .bind(raw.source_id.to_string())
            .bind(&raw.content_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_raw_response", e))?;
        row.try_get("id").map_err(|e| map_sqlx_error("decode", e))
    }

    async fn try_advisory_lock(&self, source_id: SourceId) -> Result<bool, PipelineError> {
        let result = sqlx::query("INSERT OR IGNORE INTO advisory_locks (source_id, locked_at) VALUES (?, ?)")
            .bind(source_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("try_advisory_lock", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_advisory_lock(&self, source_id: SourceId) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM advisory_locks WHERE source_id = ?")
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("release_advisory_lock", e))?;
        Ok(())
    }

    async fn should_force_full_reprocessing(&self, source_id: SourceId) -> Result<bool, PipelineError> {
        let row = sqlx::query("SELECT force_full_reprocessing FROM api_sources WHERE id = ?")
            .bind(source_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("should_force_full_reprocessing", e))?;
        match row {
            Some(row) => row
                .try_get("force_full_reprocessing")
                .map_err(|e| map_sqlx_error("decode", e)),
            None => Ok(false),
        }
    }

    async fn disable_force_full_reprocessing(&self, source_id: SourceId) -> Result<(), PipelineError> {
        sqlx::query("UPDATE api_sources SET force_full_reprocessing = 0 WHERE id = ?")
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("disable_force_full_reprocessing", e))?;
        Ok(())
    }
}

#[async_trait]
impl RunRepository for SqliteRepository {
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        sqlx::query(
            r#"INSERT INTO pipeline_runs
               (id, source_id, pipeline_version, status, started_at, completed_at,
                total_opportunities, stored, updated, skipped, filtered_out, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.source_id.to_string())
        .bind(&run.pipeline_version)
        .bind(run.status.to_string())
        .bind(run.started_at.to_rfc3339())
        .bind(timestamp_text(run.completed_at))
        .bind(run.counters.total_opportunities as i64)
        .bind(run.counters.stored as i64)
        .bind(run.counters.updated as i64)
        .bind(run.counters.skipped as i64)
        .bind(run.counters.filtered_out as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_run", e))?;
        Ok(())
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        sqlx::query(
            r#"UPDATE pipeline_runs SET
                   status = ?, completed_at = ?, total_opportunities = ?, stored = ?,
                   updated = ?, skipped = ?, filtered_out = ?, error = ?
               WHERE id = ?"#,
        )
        .bind(run.status.to_string())
        .bind(timestamp_text(run.completed_at))
        .bind(run.counters.total_opportunities as i64)
        .bind(run.counters.stored as i64)
        .bind(run.counters.updated as i64)
        .bind(run.counters.skipped as i64)
        .bind(run.counters.filtered_out as i64)
        .bind(&run.error)
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_run", e))?;
        Ok(())
    }

    async fn upsert_stage(&self, stage: &PipelineStageRecord) -> Result<(), PipelineError> {
        sqlx::query(
            r#"INSERT INTO pipeline_stages
               (run_id, stage, status, input_count, output_count, execution_time_ms,
                tokens_used, api_calls, error_message, stage_results, sequence)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, stage) DO UPDATE SET
                   status = excluded.status,
                   input_count = excluded.input_count,
                   output_count = excluded.output_count,
                   execution_time_ms = excluded.execution_time_ms,
                   tokens_used = excluded.tokens_used,
                   api_calls = excluded.api_calls,
                   error_message = excluded.error_message,
                   stage_results = excluded.stage_results,
                   sequence = excluded.sequence
               WHERE excluded.sequence > pipeline_stages.sequence"#,
        )
        .bind(stage.run_id.to_string())
        .bind(stage.stage.as_str())
        .bind(stage.status.to_string())
        .bind(stage.input_count as i64)
        .bind(stage.output_count as i64)
        .bind(stage.execution_time_ms as i64)
        .bind(stage.tokens_used as i64)
        .bind(stage.api_calls as i64)
        .bind(&stage.error_message)
        .bind(stage.stage_results.to_string())
        .bind(stage.sequence as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_stage", e))?;
        Ok(())
    }
}
