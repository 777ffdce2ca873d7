use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app::course_store::{CourseStore, LocalFsCourseStore};
use crate::app::gate::AutoGate;
use crate::app::model::{CourseRecord, PipelineOptions};
use crate::app::progress::LogProgress;
use crate::app::runner::{self, PipelineController, RunOutcome};
use crate::cli::{GenerateArgs, NewArgs, ShowArgs};
use crate::course::{ChatMessage, ChatRole, SourceFile, UNTITLED_TITLE};
use crate::error::GenerateError;
use crate::service::{ChatGenerationService, ChatServiceConfig};

/// Create a course record and print its id on stdout.
pub async fn create(args: NewArgs) -> anyhow::Result<()> {
    let mut record = CourseRecord::new(
        Uuid::new_v4().to_string(),
        args.title.as_deref().unwrap_or(UNTITLED_TITLE),
    );
    record.sources = args.sources.into_iter().map(SourceFile::named).collect();
    if let Some(path) = args.transcript.as_deref() {
        record.transcript = load_transcript(path).await?;
    }

    let store = LocalFsCourseStore::new(&args.data_dir);
    store.create(&record).await.context("create course record")?;
    tracing::info!(
        course_id = %record.course_id,
        sources = record.sources.len(),
        messages = record.transcript.len(),
        "created course record"
    );
    println!("{}", record.course_id);
    Ok(())
}

/// Run the full pipeline for one course against a chat-completions endpoint.
pub async fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;

    let mut service_config = ChatServiceConfig::new(api_key);
    service_config.base_url = args.api_base_url;
    service_config.model = args.model;
    service_config.temperature = args.temperature;
    service_config.request_timeout = Duration::from_secs(args.request_timeout_secs);
    let service =
        ChatGenerationService::new(service_config).context("build generation service")?;

    let controller = PipelineController::new(
        Arc::new(LocalFsCourseStore::new(&args.data_dir)),
        Arc::new(service),
        Arc::new(AutoGate {
            approve: args.yes,
            allow_regenerate: args.regenerate,
            include_video: args.video,
            include_podcast: args.podcast,
        }),
        Arc::new(LogProgress),
    );

    let cancel = CancellationToken::new();
    let outcome = match controller.generate(&args.course, &cancel).await {
        Err(GenerateError::Cancelled) if !args.yes => anyhow::bail!(
            "the run stopped at a review gate; pass --yes to approve the extracted \
             config and outline"
        ),
        other => other?,
    };
    match outcome {
        RunOutcome::Completed { course, media } => {
            println!(
                "generated \"{}\": {} stages, {} video scenes, {} podcast segments",
                course.title,
                course.stages.len(),
                media.video_scenes.len(),
                media.podcast_dialogue.len()
            );
        }
        RunOutcome::AlreadyComplete(course) => {
            println!(
                "\"{}\" was generated moments ago; returning it unchanged",
                course.title
            );
        }
        RunOutcome::Declined => {
            println!("existing course kept; pass --regenerate to replace it");
        }
    }
    Ok(())
}

/// Print a course record the way a viewer would load it, which clears stale
/// generated content as a side effect.
pub async fn show(args: ShowArgs) -> anyhow::Result<()> {
    let store = LocalFsCourseStore::new(&args.data_dir);
    let record = runner::load_for_display(&store, &PipelineOptions::default(), &args.course)
        .await?
        .with_context(|| format!("course not found: {}", args.course))?;

    println!("course: {} ({})", record.title, record.course_id);
    println!("sources: {}", record.sources.len());
    println!("messages: {}", record.transcript.len());
    match record.course.as_ref() {
        Some(course) => {
            println!(
                "stages: {} of {} filled",
                course.completed_stage_count(),
                course.stages.len()
            );
            for stage in &course.stages {
                let state = if stage.is_complete() {
                    "filled"
                } else {
                    "outline"
                };
                println!("  {}. {} [{state}]", stage.id, stage.title);
            }
            if let Some(at) = course.generated_at {
                println!("generated at: {at}");
            }
        }
        None => println!("stages: none generated"),
    }
    if !record.media.is_empty() {
        println!(
            "media: {} video scenes, {} podcast segments",
            record.media.video_scenes.len(),
            record.media.podcast_dialogue.len()
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    role: ChatRole,
    content: String,
}

async fn load_transcript(path: &str) -> anyhow::Result<Vec<ChatMessage>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read transcript file {path}"))?;
    let entries: Vec<TranscriptEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parse transcript file {path}"))?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry.role {
            ChatRole::User => ChatMessage::user(entry.content),
            ChatRole::Assistant => ChatMessage::assistant(entry.content),
        })
        .collect())
}
