use serde::{Deserialize, Serialize};

use crate::SubjectAttributes;

/// Record of a subject being assigned a variation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    pub experiment: String,
    pub variation: String,
    pub subject: String,
    pub subject_attributes: SubjectAttributes,
    /// ISO-8601 timestamp of the assignment.
    pub timestamp: String,
}

/// Error returned by an [`AssignmentLogger`].
pub type AssignmentLoggerError = Box<dyn std::error::Error + Send + Sync>;

/// A trait for logging assignment events to your storage system.
pub trait AssignmentLogger {
    /// Logs the assignment event to the storage system.
    ///
    /// This method is called before returning assignment to the caller, so it should not block.
    /// Returned errors (and panics) are reported through the `log` crate and never affect the
    /// assignment.
    ///
    /// ```no_run
    /// # use eppo_rac::{AssignmentLogger, AssignmentLoggerError, AssignmentEvent};
    /// struct MyAssignmentLogger;
    ///
    /// impl AssignmentLogger for MyAssignmentLogger {
    ///     fn log_assignment(&self, event: AssignmentEvent) -> Result<(), AssignmentLoggerError> {
    ///         println!("{}", serde_json::to_string(&event)?);
    ///         Ok(())
    ///     }
    /// }
    /// ```
    fn log_assignment(&self, event: AssignmentEvent) -> Result<(), AssignmentLoggerError>;
}

pub(crate) struct NoopAssignmentLogger;
impl AssignmentLogger for NoopAssignmentLogger {
    fn log_assignment(&self, _event: AssignmentEvent) -> Result<(), AssignmentLoggerError> {
        Ok(())
    }
}

impl<T: Fn(AssignmentEvent)> AssignmentLogger for T {
    fn log_assignment(&self, event: AssignmentEvent) -> Result<(), AssignmentLoggerError> {
        self(event);
        Ok(())
    }
}
