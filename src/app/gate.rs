use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::course::{CourseConfig, CourseOutline};
use crate::service::ExtractedConfig;

/// Reviewer's verdict on an extracted config candidate.
#[derive(Debug, Clone)]
pub enum ConfigDecision {
    /// Proceed with this config, possibly edited by the reviewer.
    Approve(CourseConfig),
    Cancel,
}

/// Reviewer's verdict on a generated outline.
#[derive(Debug, Clone)]
pub enum OutlineDecision {
    /// Proceed with this outline, possibly edited by the reviewer.
    Approve(CourseOutline),
    /// Discard and ask the service for a fresh outline.
    Regenerate,
    Cancel,
}

/// The reviewer on the other side of the pipeline's suspension points. Calls
/// may take arbitrarily long; the pipeline simply awaits them. There is no
/// error channel: implementations map transport failures to `Cancel` (or
/// `false` for the confirmation) so a vanished reviewer reads as a refusal.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review_config(&self, candidate: &ExtractedConfig) -> ConfigDecision;
    async fn review_outline(&self, outline: &CourseOutline) -> OutlineDecision;
    /// Asked before discarding existing complete content. `true` proceeds
    /// with regeneration, `false` leaves the course untouched.
    async fn confirm_regenerate(&self, existing: &CourseOutline) -> bool;
}

/// Fixed-policy gate for unattended runs: approve everything, or cancel at
/// the first gate. Media opt-ins chosen up front are applied to the config
/// at approval, the same point an interactive reviewer would toggle them.
#[derive(Debug, Clone, Copy)]
pub struct AutoGate {
    pub approve: bool,
    pub allow_regenerate: bool,
    pub include_video: bool,
    pub include_podcast: bool,
}

#[async_trait]
impl ApprovalGate for AutoGate {
    async fn review_config(&self, candidate: &ExtractedConfig) -> ConfigDecision {
        if !self.approve {
            return ConfigDecision::Cancel;
        }
        let mut config = candidate.config.clone();
        config.include_video = config.include_video || self.include_video;
        config.include_podcast = config.include_podcast || self.include_podcast;
        ConfigDecision::Approve(config)
    }

    async fn review_outline(&self, outline: &CourseOutline) -> OutlineDecision {
        if self.approve {
            OutlineDecision::Approve(outline.clone())
        } else {
            OutlineDecision::Cancel
        }
    }

    async fn confirm_regenerate(&self, _existing: &CourseOutline) -> bool {
        self.allow_regenerate
    }
}

/// One review, delivered to whoever holds the receiving end. Dropping the
/// reply sender without answering counts as a refusal.
#[derive(Debug)]
pub enum ApprovalRequest {
    Config {
        candidate: ExtractedConfig,
        reply: oneshot::Sender<ConfigDecision>,
    },
    Outline {
        outline: CourseOutline,
        reply: oneshot::Sender<OutlineDecision>,
    },
    Regenerate {
        existing: CourseOutline,
        reply: oneshot::Sender<bool>,
    },
}

/// Gate that forwards each review over a channel, so a UI task (or a test)
/// can play reviewer while the pipeline stays suspended on the reply.
#[derive(Debug, Clone)]
pub struct ChannelGate {
    requests: mpsc::Sender<ApprovalRequest>,
}

impl ChannelGate {
    pub fn new(requests: mpsc::Sender<ApprovalRequest>) -> Self {
        Self { requests }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ApprovalGate for ChannelGate {
    async fn review_config(&self, candidate: &ExtractedConfig) -> ConfigDecision {
        let (reply, response) = oneshot::channel();
        let request = ApprovalRequest::Config {
            candidate: candidate.clone(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            return ConfigDecision::Cancel;
        }
        response.await.unwrap_or(ConfigDecision::Cancel)
    }

    async fn review_outline(&self, outline: &CourseOutline) -> OutlineDecision {
        let (reply, response) = oneshot::channel();
        let request = ApprovalRequest::Outline {
            outline: outline.clone(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            return OutlineDecision::Cancel;
        }
        response.await.unwrap_or(OutlineDecision::Cancel)
    }

    async fn confirm_regenerate(&self, existing: &CourseOutline) -> bool {
        let (reply, response) = oneshot::channel();
        let request = ApprovalRequest::Regenerate {
            existing: existing.clone(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }
}
