use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use ureq::{Agent, AgentBuilder};

use super::{
    models::{AttendanceEnvelope, FacultyEnvelope, StudentsEnvelope},
    AttendanceLog, AttendanceRecord, Authenticator, Directory, Faculty, LoginPayload,
    LoginResponse, Student,
};

/// REST client for the attendance backend. `ureq` is blocking, so every call
/// runs on the blocking pool.
#[derive(Clone)]
pub struct HttpApi {
    agent: Agent,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json<T>(&self, path: &str, query: Vec<(&'static str, String)>) -> BoxFuture<'static, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let url = self.url(path);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut request = agent.get(&url);
                for (key, value) in &query {
                    request = request.query(key, value);
                }
                let response = request
                    .call()
                    .with_context(|| format!("GET {url} failed"))?;
                response
                    .into_json::<T>()
                    .with_context(|| format!("GET {url} returned an unexpected body"))
            })
            .await
            .map_err(|err| anyhow!("http worker failed: {err}"))?
        })
    }

    /// `GET /`; succeeds when the backend answers at all.
    pub async fn health(&self) -> Result<()> {
        let _: serde_json::Value = self.get_json("/", Vec::new()).await?;
        Ok(())
    }
}

impl Authenticator for HttpApi {
    fn login(&self, payload: LoginPayload) -> BoxFuture<'static, Result<LoginResponse>> {
        let agent = self.agent.clone();
        let url = self.url("/login");
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let response = agent
                    .post(&url)
                    .send_form(&[
                        ("email", payload.email.as_str()),
                        ("password", payload.password.as_str()),
                        ("role", payload.role.as_str()),
                    ])
                    .with_context(|| format!("POST {url} failed"))?;
                response
                    .into_json::<LoginResponse>()
                    .context("login returned an unexpected body")
            })
            .await
            .map_err(|err| anyhow!("http worker failed: {err}"))?
        })
    }
}

impl Directory for HttpApi {
    fn list_students(&self) -> BoxFuture<'static, Result<Vec<Student>>> {
        let request = self.get_json::<StudentsEnvelope>("/students", Vec::new());
        Box::pin(async move { Ok(request.await?.students) })
    }

    fn list_faculty(&self) -> BoxFuture<'static, Result<Vec<Faculty>>> {
        let request = self.get_json::<FacultyEnvelope>("/faculty", Vec::new());
        Box::pin(async move { Ok(request.await?.faculty) })
    }
}

impl AttendanceLog for HttpApi {
    fn list(&self, limit: usize) -> BoxFuture<'static, Result<Vec<AttendanceRecord>>> {
        let request =
            self.get_json::<AttendanceEnvelope>("/attendance", vec![("limit", limit.to_string())]);
        Box::pin(async move { Ok(request.await?.attendance) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = HttpApi::new("http://localhost:8000/", Duration::from_secs(1));
        assert_eq!(api.base_url(), "http://localhost:8000");
        assert_eq!(api.url("/students"), "http://localhost:8000/students");
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error_not_a_panic() {
        let api = HttpApi::new("http://127.0.0.1:9", Duration::from_millis(200));
        assert!(api.list_students().await.is_err());
        assert!(api.health().await.is_err());
    }
}
