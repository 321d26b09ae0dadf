//! Crate-wide error type
//!
//! Every fallible operation in this crate returns [`Result`]. The reconciler's
//! error-recording wrapper (see `controller::reconciler`) inspects
//! [`Error::is_retriable`] and the "update in progress" idempotency marker to
//! decide whether a failure is user-visible.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Substring AWS EKS uses across `InvalidRequestException`/`ResourceInUseException`
/// messages when a mutating call races an update already in flight upstream.
/// Errors containing this text are retryable and must never clobber
/// `status.failureMessage`.
pub const UPDATE_IN_PROGRESS_MARKER: &str = "has update in progress";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("credential secret error: {0}")]
    CredentialError(String),

    #[error("EKS API error: {0}")]
    EksError(String),

    #[error("EC2 API error: {0}")]
    Ec2Error(String),

    #[error("IAM API error: {0}")]
    IamError(String),

    #[error("CloudFormation stack error: {0}")]
    StackError(String),

    #[error("OIDC provider error: {0}")]
    OidcError(String),

    #[error("upstream projection error: {0}")]
    ProjectionError(String),

    #[error("cluster creation failed upstream: {0}")]
    ClusterFailed(String),
}

impl Error {
    /// Classifies whether a worker should retry quickly (throttling, eventual
    /// consistency) versus slowly (a real, user-actionable failure). Matches
    /// the split the §7 error design document draws between transient cloud
    /// errors and fatal/validation errors.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) => true,
            Error::EksError(msg)
            | Error::Ec2Error(msg)
            | Error::IamError(msg)
            | Error::StackError(msg)
            | Error::OidcError(msg) => {
                msg.contains(UPDATE_IN_PROGRESS_MARKER)
                    || msg.contains("Throttling")
                    || msg.contains("does not exist")
            }
            Error::ValidationError(_) | Error::ClusterFailed(_) => false,
            Error::ConfigError(_) | Error::CredentialError(_) | Error::ProjectionError(_) => false,
            Error::FinalizerError(_) => true,
        }
    }

    /// True when the error text is the "update in progress" idempotency
    /// marker: the error-recording wrapper swallows these instead of writing
    /// `status.failureMessage` (§4.8, §7).
    pub fn is_update_in_progress(&self) -> bool {
        self.to_string().contains(UPDATE_IN_PROGRESS_MARKER)
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}
