use clap::{Args, Parser, Subcommand};

use crate::service::{DEFAULT_BASE_URL, DEFAULT_MODEL};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a course record from sources and a planning conversation.
    New(NewArgs),
    /// Run the generation pipeline for a course.
    Generate(GenerateArgs),
    /// Print a course record, clearing stale content the way a viewer would.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Data directory holding course records.
    #[arg(long)]
    pub data_dir: String,

    /// Working title (default: a placeholder until generation names it).
    #[arg(long)]
    pub title: Option<String>,

    /// Source material to register, repeatable.
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Planning conversation: a JSON file holding an array of
    /// {"role": "user"|"assistant", "content": "..."} objects.
    #[arg(long)]
    pub transcript: Option<String>,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Data directory holding course records.
    #[arg(long)]
    pub data_dir: String,

    /// Course id (printed by `new`).
    #[arg(long)]
    pub course: String,

    /// Approve the extracted config and the generated outline without review.
    #[arg(long)]
    pub yes: bool,

    /// Replace existing complete content instead of keeping it.
    #[arg(long)]
    pub regenerate: bool,

    /// Also script a narrated video overview of the course.
    #[arg(long)]
    pub video: bool,

    /// Also script a host/expert podcast conversation about the course.
    #[arg(long)]
    pub podcast: bool,

    /// OpenAI-compatible API base URL.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub api_base_url: String,

    /// Model used for every generation call.
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Sampling temperature.
    #[arg(long, default_value_t = 0.3)]
    pub temperature: f32,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 300)]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Data directory holding course records.
    #[arg(long)]
    pub data_dir: String,

    /// Course id (printed by `new`).
    #[arg(long)]
    pub course: String,
}
