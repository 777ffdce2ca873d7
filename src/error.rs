use std::time::Duration;

use thiserror::Error;

/// Failure of a single generation-service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("service call timed out after {0:?}")]
    Timeout(Duration),
    #[error("service returned empty output")]
    Empty,
    #[error("malformed service response: {0}")]
    Malformed(String),
}

impl ServiceError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Fatal outcome of a generation run. Media failures never appear here; they
/// are logged and the run completes with empty media.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no source materials uploaded")]
    NoSources,
    #[error("course not found: {0}")]
    CourseNotFound(String),
    #[error("a generation run is already active for course {0}")]
    RunActive(String),
    #[error("config extraction failed: {0}")]
    Extraction(ServiceError),
    #[error("outline generation failed: {0}")]
    Outline(ServiceError),
    #[error("stage {stage_id} generation failed after {attempts} attempts: {last_error}")]
    Stage {
        stage_id: u32,
        attempts: u32,
        last_error: ServiceError,
    },
    #[error("generation cancelled")]
    Cancelled,
    #[error("course store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl GenerateError {
    /// Message shown to the user and appended to the conversation on failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoSources => {
                "Please upload source materials before generating a course.".to_owned()
            }
            Self::CourseNotFound(id) => {
                format!("Course {id} was not found. Create it before generating.")
            }
            Self::RunActive(_) => {
                "A generation run is already in progress for this course. Wait for it to finish."
                    .to_owned()
            }
            Self::Extraction(_) => {
                "Failed to extract a course configuration from the conversation. Describe the \
                 course you want in more detail and try again."
                    .to_owned()
            }
            Self::Outline(err) => service_user_message(
                err,
                "Failed to generate the course outline. This can happen when the source material \
                 is too thin or the requirements are unclear.",
            ),
            Self::Stage { last_error, .. } => service_user_message(
                last_error,
                "Failed to generate course content. The AI service may be temporarily unavailable.",
            ),
            Self::Cancelled => {
                "Generation was cancelled. Existing course data was left untouched.".to_owned()
            }
            Self::Store(_) => {
                "Failed to save course progress. Check the data directory and try again.".to_owned()
            }
        }
    }

    /// Whether the failure is written into the conversational history.
    /// Cancellation is a user choice, and the other two have no record this
    /// run owns.
    pub(crate) fn appends_explanation(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::RunActive(_) | Self::CourseNotFound(_)
        )
    }
}

fn service_user_message(err: &ServiceError, fallback: &str) -> String {
    if err.is_rate_limited() {
        "The AI service is rate limiting requests. Wait a moment and generate again.".to_owned()
    } else if err.is_timeout() {
        "The generation took too long and timed out. Generate again; completed stages are saved."
            .to_owned()
    } else {
        format!("{fallback} Generate again to resume from the last saved step.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_stage_failure_gets_rate_limit_message() {
        let err = GenerateError::Stage {
            stage_id: 2,
            attempts: 3,
            last_error: ServiceError::Api {
                status: 429,
                message: "slow down".to_owned(),
            },
        };
        assert!(err.user_message().contains("rate limiting"));
    }

    #[test]
    fn timed_out_stage_failure_gets_timeout_message() {
        let err = GenerateError::Stage {
            stage_id: 1,
            attempts: 3,
            last_error: ServiceError::Timeout(Duration::from_secs(120)),
        };
        assert!(err.user_message().contains("timed out"));
    }

    #[test]
    fn cancellation_never_writes_into_the_conversation() {
        assert!(!GenerateError::Cancelled.appends_explanation());
        assert!(!GenerateError::RunActive("c1".to_owned()).appends_explanation());
        assert!(!GenerateError::CourseNotFound("c1".to_owned()).appends_explanation());
        assert!(GenerateError::NoSources.appends_explanation());
        assert!(
            GenerateError::Outline(ServiceError::Empty).appends_explanation(),
            "fatal service errors leave a durable explanation"
        );
    }

    #[test]
    fn stage_error_display_names_stage_and_attempts() {
        let err = GenerateError::Stage {
            stage_id: 3,
            attempts: 3,
            last_error: ServiceError::Empty,
        };
        let text = err.to_string();
        assert!(text.contains("stage 3"));
        assert!(text.contains("3 attempts"));
    }
}
