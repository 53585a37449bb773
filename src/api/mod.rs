//! Collaborators the console talks to but does not own: credential checks,
//! the student/faculty directory and the server's attendance log.

pub mod http;
pub mod identity;
pub mod models;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpApi;
pub use identity::IdentityStore;
pub use models::{AttendanceRecord, Faculty, LoginPayload, LoginResponse, Role, Student, User};

use anyhow::Result;
use futures::future::BoxFuture;

pub trait Authenticator: Send + Sync + 'static {
    fn login(&self, payload: LoginPayload) -> BoxFuture<'static, Result<LoginResponse>>;
}

pub trait Directory: Send + Sync + 'static {
    fn list_students(&self) -> BoxFuture<'static, Result<Vec<Student>>>;
    fn list_faculty(&self) -> BoxFuture<'static, Result<Vec<Faculty>>>;
}

pub trait AttendanceLog: Send + Sync + 'static {
    fn list(&self, limit: usize) -> BoxFuture<'static, Result<Vec<AttendanceRecord>>>;
}
