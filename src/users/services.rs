use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::auth::jwt::JwtKeys;
use crate::auth::password::PasswordHasher;
use crate::cache::{self, count_key, fingerprint, Cache};
use crate::config::{CacheConfig, CacheTtl};
use crate::error::{AppError, ErrorKind, ResultExt, StorageError};
use crate::users::dto::{
    ChangePasswordRequest, CreateUserRequest, LoginRequest, LoginResponse, UpdateUserRequest,
};
use crate::users::repo::{UserStorage, UserTx};
use crate::users::repo_types::{FindAllParams, NewUser, PublicUser, User};
use crate::validation::Validate;

const LIST_USERS_KEY: &str = "ListUsers-";

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
    pub token: String,
}

/// Account operations. Every write runs in a single storage transaction;
/// reads of the user list go through the cache first.
pub struct UserService {
    storage: Arc<dyn UserStorage>,
    cache: Arc<dyn Cache>,
    hasher: PasswordHasher,
    keys: JwtKeys,
    ttl: CacheTtl,
    invalidate_on_write: bool,
}

impl UserService {
    pub fn new(
        storage: Arc<dyn UserStorage>,
        cache: Arc<dyn Cache>,
        hasher: PasswordHasher,
        keys: JwtKeys,
        cache_cfg: &CacheConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            hasher,
            keys,
            ttl: cache_cfg.ttl(),
            invalidate_on_write: cache_cfg.invalidate_on_write,
        }
    }

    /// Returns the matching users and their count. Served from the cache when
    /// both halves of the entry are there, otherwise from storage, after which
    /// the cache is refilled with the short TTL. The cache is not invalidated
    /// on writes unless configured to, so results may lag by one TTL.
    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        params: &FindAllParams,
    ) -> Result<(Vec<PublicUser>, usize), AppError> {
        let key = match fingerprint(params) {
            Ok(fp) => Some(format!("{LIST_USERS_KEY}{fp}")),
            Err(e) => {
                warn!(error = %e, "could not fingerprint list params");
                None
            }
        };

        if let Some(key) = &key {
            match cache::get_list::<PublicUser>(self.cache.as_ref(), key).await {
                Ok(Some((users, count))) => {
                    debug!(count, "users served from cache");
                    return Ok((users, count));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "user list cache read failed"),
            }
        }

        let rows = self
            .storage
            .find_all(params)
            .await
            .at("UserService::list_users")?;
        let users: Vec<PublicUser> = rows.iter().map(User::to_public).collect();
        let count = users.len();
        debug!(count, "users fetched from storage");

        if let Some(key) = &key {
            if let Err(e) =
                cache::set_list(self.cache.as_ref(), key, &users, count, self.ttl.short).await
            {
                warn!(error = %e, "failed to set user list cache");
            }
        }

        Ok((users, count))
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> Result<User, AppError> {
        self.storage.find_by_id(id).await.at("UserService::get_user")
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<User, AppError> {
        const FRAME: &str = "UserService::create_user";
        req.validate().at(FRAME)?;

        let mut tx = self.storage.begin().await.at(FRAME)?;
        ensure_email_free(tx.as_mut(), &req.email, None).await.at(FRAME)?;

        let hash = self.hasher.hash_async(req.password).await.at(FRAME)?;
        let now = unix_now();
        let user = tx
            .insert(NewUser {
                name: req.name,
                email: req.email,
                password: hash,
                created_at: now,
                updated_at: Some(now),
            })
            .await
            .at(FRAME)?;
        tx.commit().await.at(FRAME)?;

        self.after_write().await;
        info!(user_id = user.id, "user created");
        Ok(user)
    }

    /// Overwrites name and email. Password and session are left alone.
    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn update_user(&self, id: i64, req: UpdateUserRequest) -> Result<User, AppError> {
        const FRAME: &str = "UserService::update_user";
        req.validate().at(FRAME)?;

        let mut tx = self.storage.begin().await.at(FRAME)?;
        let mut user = tx.find_by_id(id).await.at(FRAME)?;
        ensure_email_free(tx.as_mut(), &req.email, Some(id)).await.at(FRAME)?;

        user.name = req.name;
        user.email = req.email;
        user.updated_at = Some(unix_now());
        let user = tx.update(&user).await.at(FRAME)?;
        tx.commit().await.at(FRAME)?;

        self.after_write().await;
        info!(user_id = user.id, "user updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: i64) -> Result<(), AppError> {
        const FRAME: &str = "UserService::delete_user";
        let mut tx = self.storage.begin().await.at(FRAME)?;
        tx.delete(id, unix_now()).await.at(FRAME)?;
        tx.commit().await.at(FRAME)?;

        self.after_write().await;
        info!(user_id = id, "user deleted");
        Ok(())
    }

    /// Existing sessions stay valid after a password change.
    #[instrument(skip(self, req))]
    pub async fn change_password(
        &self,
        id: i64,
        req: ChangePasswordRequest,
    ) -> Result<(), AppError> {
        const FRAME: &str = "UserService::change_password";
        req.validate().at(FRAME)?;

        let mut tx = self.storage.begin().await.at(FRAME)?;
        let mut user = tx.find_by_id(id).await.at(FRAME)?;
        self.hasher
            .verify_async(user.password.clone(), req.old_password)
            .await
            .at(FRAME)?;

        user.password = self.hasher.hash_async(req.new_password).await.at(FRAME)?;
        user.updated_at = Some(unix_now());
        tx.update(&user).await.at(FRAME)?;
        tx.commit().await.at(FRAME)?;

        info!(user_id = id, "password changed");
        Ok(())
    }

    /// Unknown email fails with `WrongEmail`, a bad password with
    /// `WrongPassword`; callers facing the outside world should not tell
    /// the two apart.
    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AppError> {
        const FRAME: &str = "UserService::login";
        req.validate().at(FRAME)?;

        let mut tx = self.storage.begin().await.at(FRAME)?;
        let mut user = match tx.find_by_email(&req.email).await {
            Ok(u) => u,
            Err(StorageError::NotFound) => {
                warn!("login unknown email");
                return Err(AppError::new(ErrorKind::WrongEmail, "wrong email").at(FRAME));
            }
            Err(e) => return Err(AppError::from(e).at(FRAME)),
        };

        if let Err(e) = self
            .hasher
            .verify_async(user.password.clone(), req.password)
            .await
        {
            if e.kind() == ErrorKind::WrongPassword {
                warn!(user_id = user.id, "login invalid password");
            }
            return Err(e.at(FRAME));
        }

        let issued = self.keys.issue(user.id).at(FRAME)?;
        user.token = Some(issued.token.clone());
        user.token_expired_at = Some(issued.expires_at);
        user.updated_at = Some(unix_now());
        let user = tx.update(&user).await.at(FRAME)?;
        tx.commit().await.at(FRAME)?;

        info!(user_id = user.id, "user logged in");
        Ok(LoginResponse {
            session_id: issued.token,
            user: user.to_public(),
        })
    }

    /// Clears the session held by `token`. A second call for the same token
    /// fails with `NotFound`.
    #[instrument(skip_all)]
    pub async fn logout(&self, token: &str) -> Result<(), AppError> {
        const FRAME: &str = "UserService::logout";
        let mut tx = self.storage.begin().await.at(FRAME)?;
        let mut user = tx.find_by_token(token).await.at(FRAME)?;
        user.token = None;
        user.token_expired_at = None;
        tx.update(&user).await.at(FRAME)?;
        tx.commit().await.at(FRAME)?;

        info!(user_id = user.id, "user logged out");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn get_by_token(&self, token: &str) -> Result<User, AppError> {
        self.storage
            .find_by_token(token)
            .await
            .at("UserService::get_by_token")
    }

    /// Accepts a bearer token only if its signature checks out, it is the
    /// token stored on the user row, and the stored expiry has not passed.
    /// Logging out clears the row, so a still-signed token stops working.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, token: &str) -> Result<Session, AppError> {
        const FRAME: &str = "UserService::authenticate";
        let unauthenticated = || AppError::new(ErrorKind::Unauthenticated, "unauthorized").at(FRAME);

        let claims = self.keys.verify(token).at(FRAME)?;
        let user = match self.get_by_token(token).await {
            Ok(u) => u,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(unauthenticated()),
            Err(e) => return Err(e.at(FRAME)),
        };
        if user.id != claims.sub || !user.has_live_session(unix_now()) {
            debug!(user_id = user.id, "stored session is gone or expired");
            return Err(unauthenticated());
        }
        Ok(Session {
            user_id: user.id,
            token: token.to_string(),
        })
    }

    async fn after_write(&self) {
        if !self.invalidate_on_write {
            return;
        }
        for prefix in [LIST_USERS_KEY.to_string(), count_key(LIST_USERS_KEY)] {
            if let Err(e) = self.cache.delete_prefix(&prefix).await {
                warn!(error = %e, prefix, "failed to invalidate user list cache");
            }
        }
    }
}

// Advisory only: the partial unique index in storage is what actually holds.
async fn ensure_email_free(
    tx: &mut dyn UserTx,
    email: &str,
    owner: Option<i64>,
) -> Result<(), AppError> {
    match tx.find_by_email(email).await {
        Ok(u) if Some(u.id) == owner => Ok(()),
        Ok(_) => Err(AppError::new(ErrorKind::AlreadyExists, "email already exists")),
        Err(StorageError::NotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
