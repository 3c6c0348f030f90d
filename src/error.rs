//! Typed per-frame failures.
//!
//! Stages return `anyhow::Result`. Failures the orchestrator has to classify
//! (drop the frame vs. abort startup) are raised as a `PipelineError` inside
//! the `anyhow::Error` and recovered with `downcast_ref`.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineErrorKind {
    /// Missing or short image planes, zero dimensions, unsupported rotation.
    MalformedFrame,
    /// Inference output does not hold exactly 3·H·W values.
    ShapeMismatch,
    /// The backend returned an error.
    InferenceFailure,
    /// The backend did not answer within the configured timeout.
    InferenceTimeout,
    /// A previous timed-out call is still occupying the backend.
    InferenceBusy,
    /// Missing, empty or corrupt model at startup.
    ModelLoad,
}

impl PipelineErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineErrorKind::MalformedFrame => "malformed_frame",
            PipelineErrorKind::ShapeMismatch => "shape_mismatch",
            PipelineErrorKind::InferenceFailure => "inference_failure",
            PipelineErrorKind::InferenceTimeout => "inference_timeout",
            PipelineErrorKind::InferenceBusy => "inference_busy",
            PipelineErrorKind::ModelLoad => "model_load",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Kind of the `PipelineError` carried by `err`, if any.
    pub fn kind_of(err: &anyhow::Error) -> Option<PipelineErrorKind> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<PipelineError>())
            .map(|e| e.kind)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for PipelineError {}

pub(crate) fn malformed(message: impl Into<String>) -> anyhow::Error {
    PipelineError::new(PipelineErrorKind::MalformedFrame, message).into()
}

pub(crate) fn shape_mismatch(message: impl Into<String>) -> anyhow::Error {
    PipelineError::new(PipelineErrorKind::ShapeMismatch, message).into()
}

pub(crate) fn model_load(message: impl Into<String>) -> anyhow::Error {
    PipelineError::new(PipelineErrorKind::ModelLoad, message).into()
}
