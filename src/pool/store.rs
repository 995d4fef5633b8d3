//! User store and form authentication
//!
//! The serving core only ever sees [`AuthHook::verify`]; everything behind
//! it (which database, how passwords are kept) is the store's business.
//! [`AuthService`] drives a [`Pool`] of store connections through the
//! login/register flow. The operations are parameterized (no query
//! strings cross this boundary).

use super::Pool;
use tracing::{info, warn};

/// One connection to wherever the `user(username, password)` table lives.
pub trait UserStore: Send {
    /// The stored password for `username`, or `None` when the row is
    /// absent.
    fn select_password(&mut self, username: &str) -> Option<String>;

    /// Insert a new row. Returns false when the store rejected it.
    fn insert_user(&mut self, username: &str, password: &str) -> bool;
}

/// The hook the connection layer calls for `POST /login.html` and
/// `POST /register.html`.
pub trait AuthHook: Send + Sync {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool;
}

/// Login/register flow over a pool of store connections.
pub struct AuthService<S: UserStore> {
    pool: Pool<S>,
}

impl<S: UserStore> AuthService<S> {
    pub fn new(pool: Pool<S>) -> Self {
        AuthService { pool }
    }
}

impl<S: UserStore> AuthHook for AuthService<S> {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        // an exhausted pool counts as a failed verification, not an error
        let Some(mut conn) = self.pool.try_acquire() else {
            warn!("user store pool exhausted");
            return false;
        };
        if is_login {
            match conn.select_password(username) {
                Some(stored) => stored == password,
                None => false,
            }
        } else {
            if conn.select_password(username).is_some() {
                info!(username, "register rejected: username taken");
                return false;
            }
            conn.insert_user(username, password)
        }
    }
}

/// In-memory store, used by the tests and as the reference
/// [`UserStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: std::collections::HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_users<I, K, V>(users: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        MemoryStore {
            users: users
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl UserStore for MemoryStore {
    fn select_password(&mut self, username: &str) -> Option<String> {
        self.users.get(username).cloned()
    }

    fn insert_user(&mut self, username: &str, password: &str) -> bool {
        self.users
            .insert(username.to_string(), password.to_string())
            .is_none()
    }
}
