//! Config resolution: decide what course to build before building it.

use crate::course::{ChatMessage, CourseConfig, SourceFile};
use crate::error::{GenerateError, ServiceError};
use crate::service::{ExtractedConfig, GenerationService};

/// Outcome of config resolution. A machine-extracted candidate is never
/// accepted silently; it is handed back for explicit approval.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// An already-approved config was found and passes through unchanged.
    Ready(CourseConfig),
    /// A fresh candidate that must be approved (or edited) before use.
    NeedsApproval(ExtractedConfig),
}

pub struct ConfigResolver<'a> {
    service: &'a dyn GenerationService,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(service: &'a dyn GenerationService) -> Self {
        Self { service }
    }

    /// Resolve the config for a run. An existing usable config short-circuits
    /// without any service call; otherwise the conversation is mined for a
    /// candidate. Candidates without a discernible title or topic are
    /// rejected here rather than padded with invented identity fields.
    pub async fn resolve(
        &self,
        transcript: &[ChatMessage],
        sources: &[SourceFile],
        existing: Option<&CourseConfig>,
    ) -> Result<Resolution, GenerateError> {
        if let Some(config) = existing {
            if config_is_usable(config) {
                return Ok(Resolution::Ready(config.clone()));
            }
        }

        let extracted = self
            .service
            .extract_config(transcript, sources)
            .await
            .map_err(GenerateError::Extraction)?;

        if extracted.config.title.trim().is_empty() || extracted.config.topic.trim().is_empty() {
            return Err(GenerateError::Extraction(ServiceError::malformed(
                "no course title or topic could be determined from the conversation",
            )));
        }
        Ok(Resolution::NeedsApproval(extracted))
    }
}

fn config_is_usable(config: &CourseConfig) -> bool {
    !config.topic.trim().is_empty() && config.stage_count >= 1
}
