//! Scriptable authenticator double for handler tests.

use std::collections::HashMap;
use std::sync::Mutex;

use earl_auth::{Authenticator, StoreError, User};
use earl_core::{AuthDecision, Target};

#[derive(Default)]
pub(crate) struct MockAuthenticator {
    allow: Mutex<HashMap<(String, String), AuthDecision>>,
    users: Mutex<HashMap<String, User>>,
    /// Every successful `add_new_user` call: (auth code, added user).
    pub added: Mutex<Vec<(String, User)>>,
    /// Error to fail the next `add_new_user` with.
    pub next_add_error: Mutex<Option<StoreError>>,
}

impl MockAuthenticator {
    /// Make `code` resolve to `user` and answer `decision` at `target`.
    pub fn seed(&self, code: &str, target: &str, user: User, decision: AuthDecision) {
        self.users.lock().unwrap().insert(code.to_string(), user);
        self.allow
            .lock()
            .unwrap()
            .insert((code.to_string(), target.to_string()), decision);
    }

    /// Make `code` resolve to `user` without any access decision.
    pub fn seed_user(&self, code: &str, user: User) {
        self.users.lock().unwrap().insert(code.to_string(), user);
    }
}

impl Authenticator for MockAuthenticator {
    fn find_user(&self, plain_code: &str) -> Option<User> {
        self.users.lock().unwrap().get(plain_code).cloned()
    }

    fn auth_user(&self, plain_code: &str, target: &Target) -> (AuthDecision, String) {
        let key = (plain_code.to_string(), target.as_str().to_string());
        match self.allow.lock().unwrap().get(&key) {
            Some(AuthDecision::Ok) => (AuthDecision::Ok, String::new()),
            Some(decision) => (*decision, "mock: some failure occurred".to_string()),
            None => (AuthDecision::Fail, "User does not exist".to_string()),
        }
    }

    async fn add_new_user(&self, auth_code: &str, user: User) -> Result<(), StoreError> {
        if let Some(err) = self.next_add_error.lock().unwrap().take() {
            return Err(err);
        }
        self.added
            .lock()
            .unwrap()
            .push((auth_code.to_string(), user));
        Ok(())
    }

    async fn update_user<F>(
        &self,
        _auth_code: &str,
        user_code: &str,
        mutate: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut User) -> bool + Send,
    {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(user_code) else {
            return Err(StoreError::UnknownUser);
        };
        let mut copy = user.clone();
        if mutate(&mut copy) {
            *user = copy;
            Ok(())
        } else {
            Err(StoreError::UpdateAborted)
        }
    }

    async fn delete_user(&self, _auth_code: &str, user_code: &str) -> Result<(), StoreError> {
        self.users
            .lock()
            .unwrap()
            .remove(user_code)
            .map(|_| ())
            .ok_or(StoreError::UnknownUser)
    }
}
