//! `PostgreSQL` implementation of [`ApplicationStatusStore`].
//!
//! Queries are built at runtime with [`QueryBuilder`], binding every filter
//! value. The enriched select joins `profiles` and shapes the provider with
//! `json_build_object`, so the column carries the same untyped join the
//! application layer validates.

use gigmarket_core::application::{
    ApplicationId, ApplicationRow, ApplicationStatus, EventId, NewApplication, UserId,
};
use gigmarket_core::event::{Event, EventStatus, ServiceRequest};
use gigmarket_core::store::{
    ApplicationFilter, ApplicationStatusStore, INSUFFICIENT_PRIVILEGE, Select, StatusPatch, StoreError, StoreFuture,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

const APPLICATION_COLUMNS: &str = "a.id, a.event_id, a.provider_id, a.service_category, a.message, a.status, a.created_at";

const PROVIDER_JOIN: &str = "CASE WHEN p.id IS NULL THEN NULL ELSE json_build_object(\
     'id', p.id, 'first_name', p.first_name, 'last_name', p.last_name, 'avatar_url', p.avatar_url) END";

/// Application store backed by a `PostgreSQL` pool.
///
/// Authorization is the database's job (row-level security or grants); a
/// refusal surfaces as [`StoreError::PermissionDenied`].
#[derive(Clone, Debug)]
pub struct PostgresApplicationStore {
    pool: PgPool,
}

impl PostgresApplicationStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select(&self, filter: ApplicationFilter, select: Select) -> Result<Vec<ApplicationRow>, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query.push(APPLICATION_COLUMNS);
        match select {
            Select::Columns => {
                query.push(", NULL::json AS provider FROM event_applications a");
            },
            Select::WithProvider => {
                query.push(", ");
                query.push(PROVIDER_JOIN);
                query.push(" AS provider FROM event_applications a LEFT JOIN profiles p ON p.id = a.provider_id");
            },
        }
        push_filter(&mut query, &filter);
        query.push(" ORDER BY a.created_at, a.id");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(application_row).collect()
    }

    async fn patch(&self, filter: ApplicationFilter, patch: StatusPatch) -> Result<u64, StoreError> {
        if filter.is_empty() {
            return Err(StoreError::query("refusing update without a filter"));
        }

        let mut query = QueryBuilder::<Postgres>::new("UPDATE event_applications a SET status = ");
        query.push_bind(patch.status.as_str());
        push_filter(&mut query, &filter);

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        tracing::debug!(rows = result.rows_affected(), status = %patch.status, "Applications updated");
        Ok(result.rows_affected())
    }

    async fn create(&self, application: NewApplication) -> Result<ApplicationRow, StoreError> {
        let row = sqlx::query(
            "INSERT INTO event_applications AS a (event_id, provider_id, service_category, message, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING a.id, a.event_id, a.provider_id, a.service_category, a.message, a.status, a.created_at, \
             NULL::json AS provider",
        )
        .bind(application.event_id.as_str())
        .bind(application.provider_id.as_str())
        .bind(&application.service_category)
        .bind(&application.message)
        .bind(application.status().as_str())
        .bind(application.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        application_row(&row)
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let Some(row) = sqlx::query("SELECT id, contractor_id, status FROM events WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
        else {
            return Ok(None);
        };

        let requests = sqlx::query(
            "SELECT category, required_count, filled_count FROM event_service_requests \
             WHERE event_id = $1 ORDER BY category",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let status: String = row.try_get("status").map_err(map_sqlx_error)?;
        Ok(Some(Event {
            id: EventId::new(row.try_get::<String, _>("id").map_err(map_sqlx_error)?),
            contractor_id: UserId::new(row.try_get::<String, _>("contractor_id").map_err(map_sqlx_error)?),
            status: status.parse::<EventStatus>().map_err(StoreError::query)?,
            service_requests: requests
                .iter()
                .map(service_request)
                .collect::<Result<_, _>>()?,
        }))
    }
}

impl ApplicationStatusStore for PostgresApplicationStore {
    fn fetch(&self, filter: ApplicationFilter, select: Select) -> StoreFuture<'_, Vec<ApplicationRow>> {
        Box::pin(self.select(filter, select))
    }

    fn update(&self, filter: ApplicationFilter, patch: StatusPatch) -> StoreFuture<'_, u64> {
        Box::pin(self.patch(filter, patch))
    }

    fn insert(&self, application: NewApplication) -> StoreFuture<'_, ApplicationRow> {
        Box::pin(self.create(application))
    }

    fn fetch_event(&self, id: &EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(self.event(id.clone()))
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &ApplicationFilter) {
    let mut clauses: Vec<(&str, String)> = Vec::new();
    if let Some(id) = &filter.id {
        clauses.push(("a.id", id.as_str().to_string()));
    }
    if let Some(event_id) = &filter.event_id {
        clauses.push(("a.event_id", event_id.as_str().to_string()));
    }
    if let Some(provider_id) = &filter.provider_id {
        clauses.push(("a.provider_id", provider_id.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        clauses.push(("a.status", status.as_str().to_string()));
    }

    for (index, (column, value)) in clauses.into_iter().enumerate() {
        query.push(if index == 0 { " WHERE " } else { " AND " });
        query.push(column);
        query.push(" = ");
        query.push_bind(value);
    }
}

fn application_row(row: &PgRow) -> Result<ApplicationRow, StoreError> {
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    Ok(ApplicationRow {
        id: ApplicationId::new(row.try_get::<String, _>("id").map_err(map_sqlx_error)?),
        event_id: EventId::new(row.try_get::<String, _>("event_id").map_err(map_sqlx_error)?),
        provider_id: UserId::new(row.try_get::<String, _>("provider_id").map_err(map_sqlx_error)?),
        service_category: row.try_get("service_category").map_err(map_sqlx_error)?,
        message: row.try_get("message").map_err(map_sqlx_error)?,
        status: status.parse::<ApplicationStatus>().map_err(StoreError::query)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        provider: row.try_get("provider").map_err(map_sqlx_error)?,
    })
}

fn service_request(row: &PgRow) -> Result<ServiceRequest, StoreError> {
    let count = |column: &str| -> Result<u32, StoreError> {
        let value: i32 = row.try_get(column).map_err(map_sqlx_error)?;
        u32::try_from(value).map_err(|e| StoreError::query(format!("{column}: {e}")))
    };

    Ok(ServiceRequest {
        category: row.try_get("category").map_err(map_sqlx_error)?,
        required_count: count("required_count")?,
        filled_count: count("filled_count")?,
    })
}

/// Translate a driver error into the store taxonomy.
///
/// SQLSTATE `42501` becomes [`StoreError::PermissionDenied`]; pool and I/O
/// failures become [`StoreError::Connection`].
#[must_use]
pub fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::RowNotFound => StoreError::NoRows,
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.to_string());
            if code.as_deref() == Some(INSUFFICIENT_PRIVILEGE) {
                StoreError::PermissionDenied(db.message().to_string())
            } else {
                StoreError::Query {
                    code,
                    message: db.message().to_string(),
                }
            }
        },
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Connection(error.to_string())
        },
        other => StoreError::query(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(filter: &ApplicationFilter) -> String {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM event_applications a");
        push_filter(&mut query, filter);
        query.sql().to_string()
    }

    #[test]
    fn filter_binds_every_populated_column() {
        let filter = ApplicationFilter::by_id(&ApplicationId::new("a"))
            .provider(&UserId::new("p1"))
            .status(ApplicationStatus::Pending);

        assert_eq!(
            sql(&filter),
            "SELECT 1 FROM event_applications a WHERE a.id = $1 AND a.provider_id = $2 AND a.status = $3"
        );
    }

    #[test]
    fn empty_filter_adds_no_clause() {
        assert_eq!(sql(&ApplicationFilter::default()), "SELECT 1 FROM event_applications a");
    }

    #[test]
    fn driver_errors_map_to_store_errors() {
        assert_eq!(map_sqlx_error(sqlx::Error::RowNotFound), StoreError::NoRows);
        assert!(matches!(map_sqlx_error(sqlx::Error::PoolTimedOut), StoreError::Connection(_)));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::ColumnNotFound("status".to_string())),
            StoreError::Query { code: None, .. }
        ));
    }

    #[test]
    fn privilege_code_is_shared_with_the_error_taxonomy() {
        let refused = StoreError::Query {
            code: Some(INSUFFICIENT_PRIVILEGE.to_string()),
            message: "new row violates policy".to_string(),
        };
        assert!(refused.is_permission_denied());
        assert_eq!(INSUFFICIENT_PRIVILEGE, "42501");
    }
}
