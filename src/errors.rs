//! Typed error hierarchy for the pipeline orchestrator.
//!
//! Three enums cover the failure kinds callers branch on:
//! - `SchedulerError`: dependency-graph failures
//! - `AgentError`: agent subprocess and prompt-template failures
//! - `ImportError`: OpenSpec change import failures
//!
//! Store I/O and external-CLI plumbing use `anyhow` with context instead;
//! external-tool absence is a degradation path, never an error.

use thiserror::Error;

/// Errors from dependency resolution and action selection.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Circular dependency: {id}")]
    CircularDependency { id: String },
}

/// Errors from the agent runner.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Prompt template not found at {path}")]
    PromptTemplateMissing { path: std::path::PathBuf },

    #[error("Failed to read prompt template at {path}: {source}")]
    PromptReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn agent process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from OpenSpec change import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Change '{name}' not found under {searched}")]
    ChangeNotFound { name: String, searched: String },

    #[error("Change '{name}' has no readable artifacts")]
    NoArtifacts { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_dependency_names_the_offending_id() {
        let err = SchedulerError::CircularDependency {
            id: "FEAT-003".into(),
        };
        assert_eq!(err.to_string(), "Circular dependency: FEAT-003");
    }

    #[test]
    fn agent_error_template_missing_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/proj/.framework/prompts/dev.md");
        let err = AgentError::PromptTemplateMissing { path: path.clone() };
        match &err {
            AgentError::PromptTemplateMissing { path: p } => assert_eq!(p, &path),
            _ => panic!("Expected PromptTemplateMissing"),
        }
        assert!(err.to_string().contains("dev.md"));
    }

    #[test]
    fn agent_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "claude not found");
        let err = AgentError::SpawnFailed {
            command: "claude".into(),
            source: io_err,
        };
        match &err {
            AgentError::SpawnFailed { command, source } => {
                assert_eq!(command, "claude");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed"),
        }
    }

    #[test]
    fn import_error_change_not_found_names_the_change() {
        let err = ImportError::ChangeNotFound {
            name: "add-auth".into(),
            searched: "/proj/openspec/changes".into(),
        };
        assert!(err.to_string().contains("add-auth"));
        assert!(err.to_string().contains("/proj/openspec/changes"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SchedulerError::CircularDependency { id: "x".into() });
        assert_std_error(&ImportError::NoArtifacts { name: "x".into() });
    }
}
