use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by a model run.
///
/// Everything here is fatal and aborts the run. The one failure that is
/// deliberately *not* represented is a transient status-query hiccup: the
/// poller absorbs those and keeps waiting (see
/// [`Client::with_max_status_failures`](crate::Client::with_max_status_failures)
/// for the opt-in bound).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The host OS/architecture has no published InMAP binary.
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Fetching the InMAP executable failed.
    #[error("failed to download executable from {url}")]
    Download {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The requested SR matrix is not in the catalog.
    #[error("model must be one of {{{allowed}}}, but is `{given}`")]
    InvalidModel { given: String, allowed: String },

    /// `cloud start` could not be issued, or exited non-zero.
    #[error("failed to start job {job}")]
    Submission {
        job: String,
        #[source]
        source: BoxError,
    },

    /// The remote job reached a terminal state other than `Complete`.
    #[error("job {job} failed with status `{status}`")]
    JobFailed { job: String, status: String },

    /// `cloud output` failed or the output shapefile could not be parsed.
    #[error("failed to retrieve output of job {job}")]
    Retrieval {
        job: String,
        #[source]
        source: BoxError,
    },

    /// Too many status checks failed in a row (only with an explicit bound).
    #[error("{failures} consecutive status checks for job {job} failed, giving up")]
    StatusCheckExhausted { job: String, failures: u32 },

    /// The run's cancel token was triggered while the job was in flight.
    #[error("job {job} was cancelled")]
    Cancelled { job: String },

    /// The job outlived the configured maximum wait.
    #[error("job {job} still running after {limit_secs}s")]
    Timeout { job: String, limit_secs: u64 },
}
