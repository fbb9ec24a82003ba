//! In-process user storage backing the test suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::users::repo::{UserStorage, UserTx};
use crate::users::repo_types::{FindAllParams, NewUser, User};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i64, User>,
    next_id: i64,
}

impl Table {
    fn live(&self) -> impl Iterator<Item = &User> {
        self.rows.values().filter(|u| u.deleted_at.is_none())
    }

    fn by_id(&self, id: i64) -> Result<User, StorageError> {
        self.live().find(|u| u.id == id).cloned().ok_or(StorageError::NotFound)
    }

    fn by_email(&self, email: &str) -> Result<User, StorageError> {
        self.live().find(|u| u.email == email).cloned().ok_or(StorageError::NotFound)
    }

    fn by_token(&self, token: &str) -> Result<User, StorageError> {
        self.live()
            .find(|u| u.token.as_deref() == Some(token))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    // mirrors the partial unique index on live emails
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.live().any(|u| u.email == email && Some(u.id) != except)
    }
}

/// Counts calls so tests can tell whether a read reached storage.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub find_all: AtomicUsize,
    pub inserts: AtomicUsize,
    pub updates: AtomicUsize,
    pub commits: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryUserStorage {
    table: Arc<Mutex<Table>>,
    calls: Arc<CallCounts>,
}

impl MemoryUserStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn find_all_calls(&self) -> usize {
        self.calls.find_all.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStorage for MemoryUserStorage {
    async fn find_all(&self, params: &FindAllParams) -> Result<Vec<User>, StorageError> {
        self.calls.find_all.fetch_add(1, Ordering::SeqCst);
        let table = self.table.lock().await;
        let search = params
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let rows = table
            .live()
            .filter(|u| params.email.as_deref().map_or(true, |e| u.email == e))
            .filter(|u| {
                search.as_deref().map_or(true, |s| {
                    u.name.to_lowercase().contains(s) || u.email.to_lowercase().contains(s)
                })
            })
            .skip(usize::try_from(params.offset()).unwrap_or(usize::MAX))
            .take(if params.limit == 0 { usize::MAX } else { params.limit as usize })
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StorageError> {
        self.table.lock().await.by_id(id)
    }

    async fn find_by_token(&self, token: &str) -> Result<User, StorageError> {
        self.table.lock().await.by_token(token)
    }

    async fn begin(&self) -> Result<Box<dyn UserTx>, StorageError> {
        let working = self.table.lock().await.clone();
        Ok(Box::new(MemoryUserTx {
            shared: self.table.clone(),
            calls: self.calls.clone(),
            working,
        }))
    }
}

/// Works on a private copy of the table and swaps it in on commit.
/// Last commit wins; there is no conflict detection between transactions.
pub struct MemoryUserTx {
    shared: Arc<Mutex<Table>>,
    calls: Arc<CallCounts>,
    working: Table,
}

#[async_trait]
impl UserTx for MemoryUserTx {
    async fn find_by_id(&mut self, id: i64) -> Result<User, StorageError> {
        self.working.by_id(id)
    }

    async fn find_by_email(&mut self, email: &str) -> Result<User, StorageError> {
        self.working.by_email(email)
    }

    async fn find_by_token(&mut self, token: &str) -> Result<User, StorageError> {
        self.working.by_token(token)
    }

    async fn insert(&mut self, user: NewUser) -> Result<User, StorageError> {
        self.calls.inserts.fetch_add(1, Ordering::SeqCst);
        if self.working.email_taken(&user.email, None) {
            return Err(StorageError::Conflict);
        }
        self.working.next_id += 1;
        let row = User {
            id: self.working.next_id,
            name: user.name,
            email: user.email,
            password: user.password,
            token: None,
            token_expired_at: None,
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: None,
        };
        self.working.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&mut self, user: &User) -> Result<User, StorageError> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        if user.deleted_at.is_some() {
            return Err(StorageError::NotFound);
        }
        let current = self.working.by_id(user.id)?;
        if self.working.email_taken(&user.email, Some(user.id)) {
            return Err(StorageError::Conflict);
        }
        let row = User {
            created_at: current.created_at,
            deleted_at: current.deleted_at,
            ..user.clone()
        };
        self.working.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete(&mut self, id: i64, at: i64) -> Result<(), StorageError> {
        let mut row = self.working.by_id(id)?;
        row.deleted_at = Some(at);
        row.token = None;
        row.token_expired_at = None;
        self.working.rows.insert(id, row);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryUserTx { shared, calls, working } = *self;
        calls.commits.fetch_add(1, Ordering::SeqCst);
        *shared.lock().await = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ann".into(),
            email: email.into(),
            password: "hash".into(),
            created_at: 1,
            updated_at: Some(1),
        }
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = MemoryUserStorage::new();
        let mut tx = store.begin().await.unwrap();
        let u = tx.insert(new_user("ann@x.com")).await.unwrap();
        assert_eq!(u.id, 1);
        assert!(matches!(store.find_by_id(1).await, Err(StorageError::NotFound)));
        tx.commit().await.unwrap();
        assert_eq!(store.find_by_id(1).await.unwrap().email, "ann@x.com");
    }

    #[tokio::test]
    async fn dropped_tx_rolls_back() {
        let store = MemoryUserStorage::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(new_user("ann@x.com")).await.unwrap();
        }
        assert!(store.find_all(&FindAllParams::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_email_is_unique() {
        let store = MemoryUserStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(new_user("ann@x.com")).await.unwrap();
        let err = tx.insert(new_user("ann@x.com")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        // case is significant
        tx.insert(new_user("Ann@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn soft_deleted_rows_disappear_and_free_the_email() {
        let store = MemoryUserStorage::new();
        let mut tx = store.begin().await.unwrap();
        let u = tx.insert(new_user("ann@x.com")).await.unwrap();
        tx.delete(u.id, 5).await.unwrap();
        assert!(matches!(tx.delete(u.id, 6).await, Err(StorageError::NotFound)));
        tx.insert(new_user("ann@x.com")).await.unwrap();
        tx.commit().await.unwrap();
        let all = store.find_all(&FindAllParams::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 2);
    }

    #[tokio::test]
    async fn soft_deleted_row_cannot_be_written_back() {
        let store = MemoryUserStorage::new();
        let mut tx = store.begin().await.unwrap();
        let mut u = tx.insert(new_user("ann@x.com")).await.unwrap();
        u.deleted_at = Some(9);
        assert!(matches!(tx.update(&u).await, Err(StorageError::NotFound)));
        assert!(tx.find_by_id(u.id).await.is_ok());
    }

    #[tokio::test]
    async fn find_all_filters_and_paginates() {
        let store = MemoryUserStorage::new();
        let mut tx = store.begin().await.unwrap();
        for i in 0..5 {
            tx.insert(new_user(&format!("user{i}@x.com"))).await.unwrap();
        }
        tx.insert(NewUser { name: "Zed".into(), ..new_user("zed@y.org") }).await.unwrap();
        tx.commit().await.unwrap();

        let page = FindAllParams { page: 2, limit: 2, ..Default::default() };
        let ids: Vec<_> = store.find_all(&page).await.unwrap().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![3, 4]);

        let search = FindAllParams { search: Some("ZE".into()), ..Default::default() };
        assert_eq!(store.find_all(&search).await.unwrap().len(), 1);

        let by_email = FindAllParams {
            email: Some("user3@x.com".into()),
            ..Default::default()
        };
        assert_eq!(store.find_all(&by_email).await.unwrap()[0].id, 4);

        assert_eq!(store.find_all_calls(), 3);
    }
}
