//! Postgres-backed principal store.
//!
//! Every query is keyed by `project_id`, so records of one tenant are never
//! visible to another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use authgate_auth::{LocalPrincipal, Role};
use authgate_core::{LocalPrincipalId, ProjectId, ProviderUid};

use super::{PrincipalStore, StoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS local_principals (
    id           UUID PRIMARY KEY,
    project_id   TEXT NOT NULL,
    provider_uid TEXT NOT NULL,
    name         TEXT,
    email        TEXT,
    role         TEXT NOT NULL,
    social_login BOOLEAN NOT NULL DEFAULT TRUE,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (project_id, provider_uid)
)
"#;

const SELECT_BY_UID: &str = r#"
SELECT id, project_id, provider_uid, name, email, role, social_login, created_at
FROM local_principals
WHERE project_id = $1 AND provider_uid = $2
"#;

pub struct PostgresPrincipalStore {
    pool: PgPool,
}

impl PostgresPrincipalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(unavailable)?;
        Ok(Self::new(pool))
    }

    /// Create the `local_principals` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    tracing::error!(error = %err, "principal store query failed");
    StoreError::Unavailable(err.to_string())
}

fn corrupt(err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn from_row(row: &PgRow) -> Result<LocalPrincipal, StoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(corrupt)?;
    let project_id: String = row.try_get("project_id").map_err(corrupt)?;
    let provider_uid: String = row.try_get("provider_uid").map_err(corrupt)?;
    let role: String = row.try_get("role").map_err(corrupt)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(corrupt)?;

    Ok(LocalPrincipal {
        id: LocalPrincipalId::from_uuid(id),
        project_id: project_id.parse::<ProjectId>().map_err(corrupt)?,
        provider_uid: provider_uid.parse::<ProviderUid>().map_err(corrupt)?,
        name: row.try_get("name").map_err(corrupt)?,
        email: row.try_get("email").map_err(corrupt)?,
        role: Role::new(role),
        social_login: row.try_get("social_login").map_err(corrupt)?,
        created_at,
    })
}

#[async_trait]
impl PrincipalStore for PostgresPrincipalStore {
    async fn find_by_provider_uid(
        &self,
        project_id: &ProjectId,
        provider_uid: &ProviderUid,
    ) -> Result<Option<LocalPrincipal>, StoreError> {
        let row = sqlx::query(SELECT_BY_UID)
            .bind(project_id.as_str())
            .bind(provider_uid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(from_row).transpose()
    }

    async fn upsert_social(&self, candidate: LocalPrincipal) -> Result<LocalPrincipal, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO local_principals (
                id, project_id, provider_uid, name, email, role, social_login, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (project_id, provider_uid) DO NOTHING
            "#,
        )
        .bind(*candidate.id.as_uuid())
        .bind(candidate.project_id.as_str())
        .bind(candidate.provider_uid.as_str())
        .bind(candidate.name.as_deref())
        .bind(candidate.email.as_deref())
        .bind(candidate.role.as_str())
        .bind(candidate.social_login)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        self.find_by_provider_uid(&candidate.project_id, &candidate.provider_uid)
            .await?
            .ok_or_else(|| StoreError::Unavailable("principal vanished after upsert".into()))
    }
}
