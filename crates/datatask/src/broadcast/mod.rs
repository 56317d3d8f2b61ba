//! In-process event streaming for task status changes.

pub mod task_events;

pub use task_events::{TaskEvent, TaskEventBroadcaster};
