//! In-memory backend for tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::Result;
use futures::future::BoxFuture;

use super::{
    models::ResponseStatus, AttendanceLog, AttendanceRecord, Authenticator, Directory, Faculty,
    LoginPayload, LoginResponse, Role, Student, User,
};

pub(crate) const GOOD_PASSWORD: &str = "secret";

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    students: Arc<Mutex<Vec<Student>>>,
    attendance: Arc<Mutex<Vec<AttendanceRecord>>>,
    student_calls: Arc<AtomicUsize>,
    attendance_calls: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_student(&self, roll_no: &str, name: &str) {
        let mut students = self.students.lock().unwrap();
        let id = students.len() as i64 + 1;
        students.push(Student {
            id: Some(id),
            roll_no: roll_no.into(),
            name: name.into(),
            department: "CS".into(),
            year: None,
            phone: None,
            status: Some("Active".into()),
        });
    }

    pub(crate) fn mark(&self, roll_number: &str, name: &str) {
        let mut attendance = self.attendance.lock().unwrap();
        let id = attendance.len() as i64 + 1;
        attendance.insert(
            0,
            AttendanceRecord {
                id,
                student_name: name.into(),
                roll_number: roll_number.into(),
                timestamp: None,
            },
        );
    }

    pub(crate) fn student_calls(&self) -> usize {
        self.student_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn attendance_calls(&self) -> usize {
        self.attendance_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn admin() -> User {
        User {
            id: 1,
            name: "Admin".into(),
            email: "admin@college.edu".into(),
            department: "Administration".into(),
            role: Role::Admin,
        }
    }
}

impl Authenticator for FakeBackend {
    fn login(&self, payload: LoginPayload) -> BoxFuture<'static, Result<LoginResponse>> {
        Box::pin(async move {
            if payload.password == GOOD_PASSWORD {
                Ok(LoginResponse {
                    status: ResponseStatus::Success,
                    message: None,
                    user: Some(FakeBackend::admin()),
                })
            } else {
                Ok(LoginResponse {
                    status: ResponseStatus::Error,
                    message: Some("Invalid admin credentials".into()),
                    user: None,
                })
            }
        })
    }
}

impl Directory for FakeBackend {
    fn list_students(&self) -> BoxFuture<'static, Result<Vec<Student>>> {
        self.student_calls.fetch_add(1, Ordering::SeqCst);
        let students = self.students.lock().unwrap().clone();
        Box::pin(async move { Ok(students) })
    }

    fn list_faculty(&self) -> BoxFuture<'static, Result<Vec<Faculty>>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

impl AttendanceLog for FakeBackend {
    fn list(&self, limit: usize) -> BoxFuture<'static, Result<Vec<AttendanceRecord>>> {
        self.attendance_calls.fetch_add(1, Ordering::SeqCst);
        let records: Vec<_> = self
            .attendance
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect();
        Box::pin(async move { Ok(records) })
    }
}
