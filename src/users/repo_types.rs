use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record in the database. Timestamps are unix seconds.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password: String, // argon2 PHC string
    pub token: Option<String>,
    pub token_expired_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl User {
    /// A session is live when a token is set and its persisted expiry is
    /// still ahead of `now`.
    pub fn has_live_session(&self, now: i64) -> bool {
        self.token.is_some() && self.token_expired_at.is_some_and(|exp| exp > now)
    }

    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

/// Row to insert; the id is assigned by storage.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Public part of the user returned to the client and kept in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

/// Filter for listing users. `limit == 0` means no pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindAllParams {
    pub email: Option<String>,
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl FindAllParams {
    /// Rows to skip; pages are 1-based and page 0 is treated as page 1.
    /// Saturates at `i64::MAX`, the largest OFFSET Postgres accepts.
    pub fn offset(&self) -> i64 {
        if self.limit == 0 {
            return 0;
        }
        let rows = u64::from(self.page.max(1) - 1) * u64::from(self.limit);
        i64::try_from(rows).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password: "$argon2id$hash".into(),
            token: Some("t".into()),
            token_expired_at: Some(100),
            created_at: 10,
            updated_at: Some(20),
            deleted_at: None,
        }
    }

    #[test]
    fn public_view_hides_secrets() {
        let json = serde_json::to_string(&user().to_public()).unwrap();
        assert!(json.contains("ann@x.com"));
        assert!(json.contains("createdAt"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("token"));
        assert!(!json.contains("updatedAt"));
    }

    #[test]
    fn live_session_needs_token_and_future_expiry() {
        let mut u = user();
        assert!(u.has_live_session(99));
        assert!(!u.has_live_session(100));
        u.token_expired_at = None;
        assert!(!u.has_live_session(0));
        u.token_expired_at = Some(100);
        u.token = None;
        assert!(!u.has_live_session(0));
    }

    #[test]
    fn offset_from_page_and_limit() {
        let mut p = FindAllParams { page: 3, limit: 10, ..Default::default() };
        assert_eq!(p.offset(), 20);
        p.page = 0;
        assert_eq!(p.offset(), 0);
        p.limit = 0;
        p.page = 5;
        assert_eq!(p.offset(), 0);

        p.page = u32::MAX;
        p.limit = u32::MAX;
        assert_eq!(p.offset(), i64::MAX);
    }
}
