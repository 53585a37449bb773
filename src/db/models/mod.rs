pub mod capture;

pub use capture::{CaptureRecord, CaptureRecordStatus, RosterRecord};
