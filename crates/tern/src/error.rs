//
// error.rs
//
// Error taxonomy of the project service
//

use thiserror::Error;

use crate::path::NormalizedPath;
use crate::project::ProjectId;

/// Errors surfaced to callers of the project service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectServiceError {
    /// No project contains the file, or it has no default project.
    #[error("no project contains {0}")]
    NoProject(NormalizedPath),

    /// The project was downgraded to syntax-only mode.
    #[error("language service is disabled for project {0}")]
    LanguageServiceDisabled(String),

    #[error("project {project} does not contain {file}")]
    ProjectDoesNotContainDocument {
        project: String,
        file: NormalizedPath,
    },

    #[error("project {0:?} not found")]
    ProjectNotFound(ProjectId),

    #[error("no script info for {0}")]
    ScriptInfoNotFound(NormalizedPath),

    #[error("{0} is not open")]
    FileNotOpen(NormalizedPath),

    /// An invariant was violated while updating a project.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors reported by a [`ServerHost`](crate::host::ServerHost).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}

impl HostError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return HostError::NotFound(path.into());
        }
        HostError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Raised when an in-flight operation observes its cancellation token.
///
/// Distinct from [`ProjectServiceError`]: a cancelled pass discards its
/// partial results instead of reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("operation canceled")]
pub struct OperationCanceled;

pub type Result<T> = std::result::Result<T, ProjectServiceError>;
