//! Outline generation and skeleton reconciliation.

use crate::course::{ChatMessage, CourseConfig, CourseOutline};
use crate::error::{GenerateError, ServiceError};
use crate::service::GenerationService;

/// Largest stage shortfall the reconciler will cover by padding. Anything
/// worse means the service ignored the request and the outline is rejected.
const MAX_PADDED_STAGES: usize = 2;

pub struct OutlineGenerator<'a> {
    service: &'a dyn GenerationService,
}

impl<'a> OutlineGenerator<'a> {
    pub fn new(service: &'a dyn GenerationService) -> Self {
        Self { service }
    }

    /// Ask the service for stage skeletons and reconcile them against the
    /// approved config. Every call hits the service; reuse of an existing
    /// outline is decided by the controller, never here.
    pub async fn generate(
        &self,
        config: &CourseConfig,
        transcript: &[ChatMessage],
    ) -> Result<CourseOutline, GenerateError> {
        let outline = self
            .service
            .generate_outline(config, transcript)
            .await
            .map_err(GenerateError::Outline)?;
        sanitize_outline(outline, config).map_err(GenerateError::Outline)
    }
}

/// Force an outline into the shape the config asked for. Applied to every
/// outline that enters the pipeline, whether the service produced it or a
/// reviewer edited it at the approval gate:
///
/// - the config title overrides the outline title unless it is the
///   placeholder sentinel;
/// - excess stages are dropped, a shortfall of up to [`MAX_PADDED_STAGES`]
///   is covered by duplicating the last skeleton;
/// - stage ids are renumbered densely from 1 regardless of what came in.
pub fn sanitize_outline(
    mut outline: CourseOutline,
    config: &CourseConfig,
) -> Result<CourseOutline, ServiceError> {
    if let Some(title) = config.title_override() {
        outline.title = title.to_string();
    }
    if outline.description.trim().is_empty() {
        outline.description = config.description.clone();
    }
    if outline.duration.trim().is_empty() {
        outline.duration = config.estimated_duration.clone();
    }

    if outline.stages.is_empty() {
        return Err(ServiceError::malformed("outline contains no stages"));
    }
    for stage in &outline.stages {
        if stage.title.trim().is_empty() {
            return Err(ServiceError::malformed(format!(
                "outline stage {} has a blank title",
                stage.id
            )));
        }
    }

    let requested = config.stage_count;
    let produced = outline.stages.len();
    if produced > requested {
        tracing::info!(produced, requested, "truncating excess outline stages");
        outline.stages.truncate(requested);
    } else if produced < requested {
        let missing = requested - produced;
        if missing > MAX_PADDED_STAGES {
            return Err(ServiceError::malformed(format!(
                "outline has {produced} stages but {requested} were requested"
            )));
        }
        tracing::info!(produced, requested, "padding outline shortfall");
        let template = outline.stages[produced - 1].clone();
        for _ in 0..missing {
            let mut stage = template.clone();
            stage.title = format!("{} (Continued)", template.title);
            stage.content = None;
            outline.stages.push(stage);
        }
    }

    for (index, stage) in outline.stages.iter_mut().enumerate() {
        stage.id = index as u32 + 1;
        if stage.objective.trim().is_empty() {
            stage.objective = format!("Understand {}", stage.title);
        }
    }
    Ok(outline)
}
