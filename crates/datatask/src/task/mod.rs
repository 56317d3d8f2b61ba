//! Task model shared by the submitting side and the workers.

pub mod error;
pub mod message;
pub mod outcome;
pub mod types;

pub use error::TaskError;
pub use message::{
    MessageError, ReportPayload, TablePayload, TaskMessage, TaskPayload, UploadPayload,
    MAX_UPLOAD_ROWS,
};
pub use outcome::TaskOutcome;
pub use types::{ParseError, ReportType, Table, TaskStatus, TaskType};
