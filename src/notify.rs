//! Fire-and-forget notifications to applicants
use crate::error::Result;
use crate::status::Role;
use crate::submission::Submission;

pub trait Notifier: Send + Sync {
    /// The submission was sent back to its applicant by `by`.
    fn needs_more_info(&self, submission: &Submission, by: Role, comment: &str) -> Result<()>;
}

/// Default sink that only writes the notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn needs_more_info(&self, submission: &Submission, by: Role, comment: &str) -> Result<()> {
        tracing::info!(
            submission_id = %submission.id,
            applicant = %submission.applicant_id,
            reviewer = %by,
            comment,
            "revision requested"
        );
        Ok(())
    }
}
