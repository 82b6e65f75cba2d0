use std::path::PathBuf;

use crate::archive::CandidateId;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid config value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Errors reading or writing the archive. Always fatal for the run: the loop
/// cannot continue with an inconsistent statistics state.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot at {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Unknown candidate {0}")]
    UnknownCandidate(CandidateId),

    #[error("Illegal status transition for candidate {id}: {from} -> {to}")]
    IllegalTransition {
        id: CandidateId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Candidate {0} is not active and cannot receive observations")]
    NotActive(CandidateId),

    #[error("Observation score {score} for candidate {id} is outside [0, 1]")]
    ScoreOutOfRange { id: CandidateId, score: f64 },
}

/// Malformed or unsafe output from the sub-agent generator. Growth for the
/// iteration is skipped.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generator returned malformed output: {0}")]
    Malformed(String),

    #[error("Generator output rejected as unsafe: {0}")]
    Unsafe(String),

    #[error("Generator transport failure: {0}")]
    Transport(String),

    #[error("Generator model unavailable: {0}")]
    ModelUnavailable(String),
}

/// A candidate config failed refinement or validation during warmup. Counts
/// against the candidate's retry budget.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid tool name `{0}`")]
    InvalidName(String),

    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("Duplicate argument `{0}`")]
    DuplicateArgument(String),

    #[error("Invalid argument name `{0}`")]
    InvalidArgumentName(String),

    #[error("Signature `{signature}` does not start with tool name `{name}`")]
    SignatureName { signature: String, name: String },

    #[error("Signature does not mention required argument `{0}`")]
    SignatureMissingArgument(String),

    #[error("Instance template references unknown placeholder `{0}`")]
    UnknownPlaceholder(String),

    #[error("Refiner rejected the candidate: {0}")]
    Refiner(String),

    #[error("Refiner model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Warmup cancelled")]
    Cancelled,
}

/// A single instance failed to execute. Isolated to that instance.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Instance timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Instance execution crashed: {0}")]
    Crash(String),

    #[error("Instance cost {cost:.4} exceeded limit {limit:.4}")]
    CostExceeded { cost: f64, limit: f64 },

    #[error("Harness failure: {0}")]
    Harness(String),

    #[error("Instance cancelled")]
    Cancelled,
}

/// The judge failed to score a pair. Yields a missing observation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JudgeError {
    #[error("Judge returned malformed output: {0}")]
    Malformed(String),

    #[error("Judge score {0} is outside [0, 1]")]
    OutOfRange(f64),

    #[error("Judge transport failure: {0}")]
    Transport(String),

    #[error("Judge model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Errors from the LLM backend shared by the generator, refiner and judge.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Ollama not reachable at {url}: {message}")]
    OllamaUnavailable { url: String, message: String },

    #[error("Model '{model}' not available in Ollama: {message}")]
    ModelNotAvailable { model: String, message: String },

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM response contained no text")]
    EmptyResponse,

    #[error("Could not extract JSON from response: {0}")]
    NoJson(String),
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::EmptyResponse | LlmError::NoJson(_) => Self::Malformed(e.to_string()),
            LlmError::ModelNotAvailable { .. } => Self::ModelUnavailable(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<LlmError> for JudgeError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::EmptyResponse | LlmError::NoJson(_) => Self::Malformed(e.to_string()),
            LlmError::ModelNotAvailable { .. } => Self::ModelUnavailable(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<LlmError> for ValidationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::ModelNotAvailable { .. } => Self::ModelUnavailable(e.to_string()),
            other => Self::Refiner(other.to_string()),
        }
    }
}
