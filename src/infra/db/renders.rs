use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    ClaimRenderParams, RenderClaim, RenderQueryFilter, RendersRepo, RepoError,
    UpdateRenderStateParams,
};
use crate::domain::renders::{RenderRecord, SourceRef};
use crate::domain::types::{RenderState, SourceType};

use super::{PostgresRepositories, map_sqlx_error};

const RENDER_COLUMNS: &str =
    "id, source_type, source_id, created_at, task_id, state, logs";

#[derive(FromRow)]
struct RenderRow {
    id: Uuid,
    source_type: SourceType,
    source_id: String,
    created_at: OffsetDateTime,
    task_id: Option<String>,
    state: RenderState,
    logs: Option<String>,
}

impl From<RenderRow> for RenderRecord {
    fn from(row: RenderRow) -> Self {
        Self {
            id: row.id,
            source_type: row.source_type,
            source_id: row.source_id,
            created_at: row.created_at,
            task_id: row.task_id,
            state: row.state,
            logs: row.logs,
        }
    }
}

fn claim_lock_key(source: &SourceRef) -> String {
    format!("render:{}:{}", source.source_type.as_str(), source.source_id)
}

#[async_trait]
impl RendersRepo for PostgresRepositories {
    async fn claim_render(&self, params: ClaimRenderParams) -> Result<RenderClaim, RepoError> {
        let ClaimRenderParams {
            source,
            stale_after,
        } = params;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // Serialises claims per document until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(claim_lock_key(&source))
            .execute(tx.as_mut())
            .await
            .map_err(map_sqlx_error)?;

        let latest = sqlx::query_as::<_, RenderRow>(&format!(
            "SELECT {RENDER_COLUMNS} FROM renders \
             WHERE source_type = $1 AND source_id = $2 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(source.source_type)
        .bind(&source.source_id)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

        let claim = match latest {
            None => {
                let record = RenderRecord::new(source);
                let row = sqlx::query_as::<_, RenderRow>(&format!(
                    "INSERT INTO renders (id, source_type, source_id, created_at, claimed_at, state) \
                     VALUES ($1, $2, $3, $4, now(), $5) \
                     RETURNING {RENDER_COLUMNS}"
                ))
                .bind(record.id)
                .bind(record.source_type)
                .bind(&record.source_id)
                .bind(record.created_at)
                .bind(record.state)
                .fetch_one(tx.as_mut())
                .await
                .map_err(map_sqlx_error)?;
                RenderClaim::Created(row.into())
            }
            Some(row) if row.task_id.is_none() => {
                let reclaimed = sqlx::query_as::<_, RenderRow>(&format!(
                    "UPDATE renders SET claimed_at = now() \
                     WHERE id = $1 AND task_id IS NULL \
                       AND claimed_at < now() - make_interval(secs => $2) \
                     RETURNING {RENDER_COLUMNS}"
                ))
                .bind(row.id)
                .bind(stale_after.as_secs_f64())
                .fetch_optional(tx.as_mut())
                .await
                .map_err(map_sqlx_error)?;

                match reclaimed {
                    Some(row) => RenderClaim::Reclaimed(row.into()),
                    None => RenderClaim::Existing(row.into()),
                }
            }
            Some(row) => RenderClaim::Existing(row.into()),
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(claim)
    }

    async fn find_render(&self, id: Uuid) -> Result<Option<RenderRecord>, RepoError> {
        let row = sqlx::query_as::<_, RenderRow>(&format!(
            "SELECT {RENDER_COLUMNS} FROM renders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn find_latest_render(
        &self,
        source: &SourceRef,
    ) -> Result<Option<RenderRecord>, RepoError> {
        let row = sqlx::query_as::<_, RenderRow>(&format!(
            "SELECT {RENDER_COLUMNS} FROM renders \
             WHERE source_type = $1 AND source_id = $2 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(source.source_type)
        .bind(&source.source_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn assign_task_id(&self, id: Uuid, task_id: &str) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE renders SET task_id = $2 WHERE id = $1 AND task_id IS NULL",
        )
        .bind(id)
        .bind(task_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_render_state(&self, params: UpdateRenderStateParams) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE renders SET state = $2, logs = $3 WHERE id = $1")
            .bind(params.id)
            .bind(params.state)
            .bind(params.logs)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn list_renders(
        &self,
        filter: &RenderQueryFilter,
        limit: u32,
    ) -> Result<Vec<RenderRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {RENDER_COLUMNS} FROM renders WHERE 1=1"));

        if let Some(state) = filter.state {
            qb.push(" AND state = ");
            qb.push_bind(state);
        }
        if let Some(source_type) = filter.source_type {
            qb.push(" AND source_type = ");
            qb.push_bind(source_type);
        }

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<RenderRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
