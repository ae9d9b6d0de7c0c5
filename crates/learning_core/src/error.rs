use std::fmt;

use shared::domain::CourseId;
use thiserror::Error;

use crate::phase::Phase;

/// Collaborator call that failed on a blocking path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStep {
    Curriculum,
    ModuleContent,
    Refinement,
    Adjustment,
    Article,
    Presentation,
    Narration,
}

impl fmt::Display for GenerationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GenerationStep::Curriculum => "curriculum",
            GenerationStep::ModuleContent => "module content",
            GenerationStep::Refinement => "curriculum refinement",
            GenerationStep::Adjustment => "curriculum adjustment",
            GenerationStep::Article => "article",
            GenerationStep::Presentation => "presentation",
            GenerationStep::Narration => "narration",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("no curriculum available")]
    MissingCurriculum,
    #[error("no active course")]
    NoActiveCourse,
    #[error("course {0} not found in history")]
    UnknownCourse(CourseId),
    #[error("operation not allowed in phase {phase:?}")]
    InvalidPhase { phase: Phase },
    #[error("module index {index} out of range (course has {count} modules)")]
    ModuleOutOfRange { index: usize, count: usize },
    #[error("slide index {index} out of range for module {module_index} ({count} slides)")]
    SlideOutOfRange {
        module_index: usize,
        index: usize,
        count: usize,
    },
    #[error("{step} generation failed: {cause}")]
    Generation {
        step: GenerationStep,
        cause: anyhow::Error,
    },
    #[error("persistence failed: {cause}")]
    Persistence { cause: anyhow::Error },
}

impl EngineError {
    pub(crate) fn generation(step: GenerationStep, cause: anyhow::Error) -> Self {
        Self::Generation { step, cause }
    }

    /// Short text suitable for a user-facing notice.
    pub fn notice(&self) -> String {
        match self {
            EngineError::Generation { step, .. } => {
                format!("Failed to generate {step}. Please try again.")
            }
            other => other.to_string(),
        }
    }
}
