use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Faculty,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Faculty => "faculty",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// The signed-in operator. Opaque to the capture pipeline apart from `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(default)]
    pub id: Option<i64>,
    pub roll_no: String,
    pub name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Faculty {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub join_date: Option<String>,
}

/// A server-side attendance mark. `timestamp` is the server's local time
/// and carries no zone, so it stays a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_name: String,
    pub roll_number: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StudentsEnvelope {
    #[serde(default)]
    pub students: Vec<Student>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FacultyEnvelope {
    #[serde(default)]
    pub faculty: Vec<Faculty>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttendanceEnvelope {
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,
}
