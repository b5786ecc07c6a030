//! Admin credential lifecycle: bootstrap the single admin password on first
//! boot, verify login, and rotate the password.

use crate::error::{AppError, AppResult};
use crate::persistence::Store;
use bcrypt::{hash, verify, DEFAULT_COST};
use std::sync::Arc;
use tracing::{info, warn};

const ADMIN_PASSWORD_HASH_KEY: &str = "admin_password_hash";

pub struct AuthService {
    store: Arc<Store>,
}

impl AuthService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// If no admin password hash exists yet, seed one from `initial_password`.
    /// The initial credential is an operator-supplied secret, not part of the
    /// recognized configuration option table.
    pub fn bootstrap(&self, initial_password: Option<&str>) -> AppResult<()> {
        if self.store.get_auth_config(ADMIN_PASSWORD_HASH_KEY)?.is_some() {
            return Ok(());
        }
        let Some(password) = initial_password else {
            warn!("no admin password configured and none stored; login will fail until one is set");
            return Ok(());
        };
        let hashed = hash(password, DEFAULT_COST).map_err(|e| AppError::Config(e.to_string()))?;
        self.store.set_auth_config(ADMIN_PASSWORD_HASH_KEY, &hashed)?;
        info!("bootstrapped admin password from configuration");
        Ok(())
    }

    pub fn verify_login(&self, username: &str, password: &str) -> AppResult<bool> {
        if username != "admin" {
            return Ok(false);
        }
        let Some(hashed) = self.store.get_auth_config(ADMIN_PASSWORD_HASH_KEY)? else {
            return Ok(false);
        };
        Ok(verify(password, &hashed).unwrap_or(false))
    }

    pub fn change_password(&self, current_password: &str, new_password: &str) -> AppResult<()> {
        if !self.verify_login("admin", current_password)? {
            return Err(AppError::Unauthorized);
        }
        let hashed = hash(new_password, DEFAULT_COST).map_err(|e| AppError::Config(e.to_string()))?;
        self.store.set_auth_config(ADMIN_PASSWORD_HASH_KEY, &hashed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_idempotent() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        let auth = AuthService::new(store.clone());
        auth.bootstrap(Some("first")).unwrap();
        auth.bootstrap(Some("second")).unwrap();
        assert!(auth.verify_login("admin", "first").unwrap());
        assert!(!auth.verify_login("admin", "second").unwrap());
    }

    #[test]
    fn wrong_username_never_matches() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        let auth = AuthService::new(store);
        auth.bootstrap(Some("pw")).unwrap();
        assert!(!auth.verify_login("root", "pw").unwrap());
    }

    #[test]
    fn change_password_requires_current_password() {
        let store = Arc::new(Store::open(":memory:").unwrap());
        let auth = AuthService::new(store);
        auth.bootstrap(Some("old")).unwrap();
        assert!(auth.change_password("wrong", "new").is_err());
        auth.change_password("old", "new").unwrap();
        assert!(auth.verify_login("admin", "new").unwrap());
    }
}
