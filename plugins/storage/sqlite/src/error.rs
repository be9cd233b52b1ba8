use service_api::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("field '{field}': expected {expected}")]
    Encode { field: &'static str, expected: &'static str },

    #[error("decode row: {0}")]
    Decode(serde_json::Error),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("blocking task: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("migration {version}: {source}")]
    Migration { version: i32, source: rusqlite::Error },
}

impl SqliteStoreError {
    fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            SqliteStoreError::Sql(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<SqliteStoreError> for ServiceError {
    fn from(e: SqliteStoreError) -> Self {
        if let SqliteStoreError::NotFound { entity, id } = e {
            return ServiceError::record_not_found(entity, id);
        }
        if matches!(e, SqliteStoreError::Encode { .. }) || e.is_constraint_violation() {
            return ServiceError::validation(e.to_string());
        }
        ServiceError::internal(e.to_string())
    }
}
