use crate::store::Step;

/// Errors surfaced at the step-orchestrator boundary. Provider plumbing uses
/// `anyhow` internally; by the time an error reaches the wizard it has been
/// mapped to one of these.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WizardError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Provider(String),

    #[error("Video generation timed out. The provider may be busy; please try again.")]
    Timeout,

    #[error("No {0} API credential configured. Run `relive set-credential {0} <key>` first.")]
    MissingCredential(&'static str),
}

impl WizardError {
    pub fn retryable(&self) -> bool {
        !matches!(self, WizardError::Validation(_) | WizardError::MissingCredential(_))
    }
}

/// Step-scoped error recorded in the workflow store and shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingError {
    pub step: Step,
    pub message: String,
    pub retryable: bool,
}

impl ProcessingError {
    pub fn new(step: Step, err: &WizardError) -> Self {
        ProcessingError {
            step,
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}
