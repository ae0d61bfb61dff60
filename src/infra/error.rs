use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("database error: {message}")]
    Database { message: String },
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl InfraError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

impl From<sqlx::Error> for InfraError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::migrate::MigrateError;

    use super::*;

    #[test]
    fn migration_failures_keep_their_kind() {
        let err = InfraError::from(MigrateError::VersionMissing(1));
        assert!(matches!(err, InfraError::Migration(_)));
        assert!(err.to_string().starts_with("migration failed:"));
    }

    #[test]
    fn driver_errors_become_database_errors() {
        let err = InfraError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, InfraError::Database { .. }));
    }
}
