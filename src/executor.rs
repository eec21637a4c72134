use crate::error::{ApiError, ExecutionError};
use crate::job::ApiJob;
use crate::signals::JobOutcome;
use crate::ApiCall;

/// How a job that stayed within its own boundary ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// The success signal fired.
    Succeeded,
    /// The failure signal fired; the queue moves on.
    Failed,
}

/// Run a job's action with the retry and error-classification policy.
///
/// Each attempt first decrements the job's remaining attempts. Then:
///
/// - success emits the success signal and returns [`JobDisposition::Succeeded`];
/// - an authentication error stops at once with
///   [`ExecutionError::ApiInaccessible`], no signal is emitted;
/// - a timeout is retried while attempts remain, and the last one returns
///   [`ExecutionError::TimedOut`];
/// - any other error emits the failure signal and returns
///   [`JobDisposition::Failed`].
///
/// With no client the action is never called and no attempt is spent.
pub async fn execute<C, S, J>(
    job: &mut ApiJob<C, S, J>,
    client: Option<&C>,
    session: &mut S,
) -> Result<JobDisposition, ExecutionError>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
    J: ApiCall<C, S>,
{
    let Some(client) = client else {
        tracing::error!(job_id = %job.id(), "Client is not authenticated");
        return Err(ExecutionError::ApiInaccessible);
    };

    let budget = job.remaining_attempts;
    while job.remaining_attempts >= 1 {
        job.remaining_attempts -= 1;

        match job.call.call_api(client, session).await {
            Ok(value) => {
                job.emit(JobOutcome::Succeeded(value));
                return Ok(JobDisposition::Succeeded);
            }
            Err(err) if err.is_auth() => {
                tracing::error!(job_id = %job.id(), "Client is not authenticated: {}", err);
                return Err(ExecutionError::ApiInaccessible);
            }
            Err(ApiError::Timeout) => {
                tracing::debug!(
                    job_id = %job.id(),
                    job_type = job.call.job_type(),
                    remaining = job.remaining_attempts,
                    "Job timed out"
                );
                if job.remaining_attempts == 0 {
                    return Err(ExecutionError::TimedOut { attempts: budget });
                }
            }
            Err(err) => {
                tracing::error!(
                    job_id = %job.id(),
                    job_type = job.call.job_type(),
                    "Job raised an error, skipping job: {}",
                    err
                );
                job.emit(JobOutcome::Failed(err));
                return Ok(JobDisposition::Failed);
            }
        }
    }

    // Only reached when the job had no attempts to begin with
    Err(ExecutionError::TimedOut { attempts: budget })
}
