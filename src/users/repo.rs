use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Transaction};

use crate::error::StorageError;
use crate::users::repo_types::{FindAllParams, NewUser, User};

/// Read side of user persistence plus the entry point for writes.
///
/// Soft-deleted rows are invisible to every method.
#[async_trait]
pub trait UserStorage: Send + Sync {
    async fn find_all(&self, params: &FindAllParams) -> Result<Vec<User>, StorageError>;
    async fn find_by_id(&self, id: i64) -> Result<User, StorageError>;
    async fn find_by_token(&self, token: &str) -> Result<User, StorageError>;

    /// Opens a unit of work. Nothing it writes is visible until `commit`;
    /// dropping it rolls back.
    async fn begin(&self) -> Result<Box<dyn UserTx>, StorageError>;
}

#[async_trait]
pub trait UserTx: Send {
    async fn find_by_id(&mut self, id: i64) -> Result<User, StorageError>;
    async fn find_by_email(&mut self, email: &str) -> Result<User, StorageError>;
    async fn find_by_token(&mut self, token: &str) -> Result<User, StorageError>;
    async fn insert(&mut self, user: NewUser) -> Result<User, StorageError>;
    async fn update(&mut self, user: &User) -> Result<User, StorageError>;
    /// Soft delete.
    async fn delete(&mut self, id: i64, at: i64) -> Result<(), StorageError>;
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

const COLUMNS: &str =
    "id, name, email, password, token, token_expired_at, created_at, updated_at, deleted_at";

#[derive(Clone)]
pub struct PgUserStorage {
    pool: PgPool,
}

impl PgUserStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStorage for PgUserStorage {
    async fn find_all(&self, params: &FindAllParams) -> Result<Vec<User>, StorageError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM users WHERE deleted_at IS NULL"
        ));
        if let Some(email) = &params.email {
            qb.push(" AND email = ").push_bind(email.clone());
        }
        if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(search));
            qb.push(" AND (name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR email ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(" ORDER BY id ASC");
        if params.limit > 0 {
            qb.push(" LIMIT ")
                .push_bind(i64::from(params.limit))
                .push(" OFFSET ")
                .push_bind(params.offset());
        }
        let rows = qb.build_query_as::<User>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StorageError> {
        let mut conn = self.pool.acquire().await?;
        select_by_id(&mut conn, id).await
    }

    async fn find_by_token(&self, token: &str) -> Result<User, StorageError> {
        let mut conn = self.pool.acquire().await?;
        select_by_token(&mut conn, token).await
    }

    async fn begin(&self) -> Result<Box<dyn UserTx>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUserTx { tx }))
    }
}

pub struct PgUserTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UserTx for PgUserTx {
    async fn find_by_id(&mut self, id: i64) -> Result<User, StorageError> {
        select_by_id(&mut self.tx, id).await
    }

    async fn find_by_email(&mut self, email: &str) -> Result<User, StorageError> {
        select_by_email(&mut self.tx, email).await
    }

    async fn find_by_token(&mut self, token: &str) -> Result<User, StorageError> {
        select_by_token(&mut self.tx, token).await
    }

    async fn insert(&mut self, user: NewUser) -> Result<User, StorageError> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user.name)
        .bind(user.email)
        .bind(user.password)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(row)
    }

    async fn update(&mut self, user: &User) -> Result<User, StorageError> {
        if user.deleted_at.is_some() {
            return Err(StorageError::NotFound);
        }
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = $2, email = $3, password = $4, token = $5,
                   token_expired_at = $6, updated_at = $7
             WHERE id = $1 AND deleted_at IS NULL
            RETURNING {COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.token)
        .bind(user.token_expired_at)
        .bind(user.updated_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        row.ok_or(StorageError::NotFound)
    }

    async fn delete(&mut self, id: i64, at: i64) -> Result<(), StorageError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET deleted_at = $2, token = NULL, token_expired_at = NULL
             WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ---- Queries ----

async fn select_by_id(conn: &mut PgConnection, id: i64) -> Result<User, StorageError> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(StorageError::NotFound)
}

async fn select_by_email(conn: &mut PgConnection, email: &str) -> Result<User, StorageError> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL ORDER BY id LIMIT 1"
    ))
    .bind(email)
    .fetch_optional(conn)
    .await?
    .ok_or(StorageError::NotFound)
}

async fn select_by_token(conn: &mut PgConnection, token: &str) -> Result<User, StorageError> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users WHERE token = $1 AND deleted_at IS NULL"
    ))
    .bind(token)
    .fetch_optional(conn)
    .await?
    .ok_or(StorageError::NotFound)
}

fn map_write_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
        _ => StorageError::Database(e),
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
