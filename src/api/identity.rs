use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{bail, Result};

use super::{models::ResponseStatus, Authenticator, LoginPayload, User};

/// Holds the signed-in operator. Starting a capture session requires one.
#[derive(Clone, Default)]
pub struct IdentityStore {
    current: Arc<RwLock<Option<User>>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<User> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set(&self, user: User) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) -> Option<User> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Verifies credentials with the authenticator and keeps the identity on
    /// success. A rejected login leaves any previous identity untouched.
    pub async fn sign_in(&self, auth: &dyn Authenticator, payload: LoginPayload) -> Result<User> {
        let email = payload.email.clone();
        let response = auth.login(payload).await?;
        match (response.status, response.user) {
            (ResponseStatus::Success, Some(user)) => {
                log::info!("signed in as {} ({})", user.email, user.role.as_str());
                self.set(user.clone());
                Ok(user)
            }
            (ResponseStatus::Success, None) => bail!("login for {email} succeeded without a user"),
            (ResponseStatus::Error, _) => bail!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "invalid credentials".to_string())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{fake::FakeBackend, Role};

    fn payload(password: &str) -> LoginPayload {
        LoginPayload {
            email: "admin@college.edu".into(),
            password: password.into(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn successful_login_is_remembered() {
        let backend = FakeBackend::new();
        let identity = IdentityStore::new();
        assert!(!identity.is_authenticated());

        let user = identity.sign_in(&backend, payload("secret")).await.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(identity.current(), Some(user));

        identity.sign_out();
        assert!(!identity.is_authenticated());
    }

    #[tokio::test]
    async fn rejected_login_reports_the_server_message() {
        let backend = FakeBackend::new();
        let identity = IdentityStore::new();

        let err = identity.sign_in(&backend, payload("wrong")).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid admin credentials");
        assert!(!identity.is_authenticated());
    }
}
