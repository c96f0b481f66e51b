use std::sync::{Mutex, MutexGuard};

/// The host's view of who is signed in.
pub trait SessionProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Bearer token attached to backend requests, if any.
    fn access_token(&self) -> Option<String>;
}

/// A session whose token is set by the host on login and cleared on logout.
#[derive(Debug, Default)]
pub struct StaticSession {
    token: Mutex<Option<String>>,
}

impl StaticSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        *self.lock_token() = Some(token.into());
    }

    pub fn sign_out(&self) {
        *self.lock_token() = None;
    }

    fn lock_token(&self) -> MutexGuard<'_, Option<String>> {
        match self.token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionProvider for StaticSession {
    fn is_authenticated(&self) -> bool {
        self.lock_token().is_some()
    }

    fn access_token(&self) -> Option<String> {
        self.lock_token().clone()
    }
}
