use sqlx::error::ErrorKind;

use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => {
                RepoError::duplicate(db.constraint().unwrap_or("unknown"))
            }
            ErrorKind::ForeignKeyViolation | ErrorKind::NotNullViolation => {
                RepoError::Integrity {
                    message: db.message().to_string(),
                }
            }
            ErrorKind::CheckViolation => RepoError::invalid_input(db.message()),
            _ if db.message().contains("invalid input syntax") => {
                RepoError::invalid_input(db.message())
            }
            _ if db
                .message()
                .contains("canceling statement due to statement timeout") =>
            {
                RepoError::Timeout
            }
            _ => RepoError::from_persistence(db.message()),
        },
        other => RepoError::from_persistence(other),
    }
}
