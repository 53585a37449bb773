use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::{
    api::{Directory, Faculty, Student},
    fanout::{Topic, UpdateBus},
    session::DetectionSession,
};

use super::RefetchView;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub students: Vec<Student>,
    pub faculty: Vec<Faculty>,
}

/// Registered students and faculty. Each refresh also updates the session's
/// expected head count, which is the number of registered students.
pub struct DirectoryView {
    view: RefetchView<DirectoryListing>,
}

impl DirectoryView {
    pub fn mount(
        bus: &UpdateBus,
        directory: Arc<dyn Directory>,
        session: Option<DetectionSession>,
    ) -> Self {
        let fetch = move || -> BoxFuture<'static, Result<DirectoryListing>> {
            let students = directory.list_students();
            let faculty = directory.list_faculty();
            let session = session.clone();
            Box::pin(async move {
                let listing = DirectoryListing {
                    students: students.await?,
                    faculty: faculty.await?,
                };
                if let Some(session) = session {
                    session.set_expected_count(listing.students.len());
                }
                Ok::<_, anyhow::Error>(listing)
            })
        };
        let view = RefetchView::mount(bus, &[Topic::DirectoryChanged], fetch);
        Self { view }
    }

    pub fn listing(&self) -> DirectoryListing {
        self.view.current().unwrap_or_default()
    }

    pub fn view(&self) -> &RefetchView<DirectoryListing> {
        &self.view
    }
}
