use resolver::ResolutionMode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Work items produced by the ingestion pipeline and consumed by
/// [`crate::worker::Worker`], one stage per step of the document pipeline:
/// extract entities from a freshly-ingested document, fold them into the
/// knowledge graph, run AI synthesis over the result, or refresh the full
/// text index once chunk volume has drifted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    ExtractEntities {
        document_id: Uuid,
        model_ref: Option<String>,
    },
    ResolveDocument {
        document_id: Uuid,
        mode: ResolutionMode,
    },
    SynthesizeDocument {
        document_id: Uuid,
    },
    RebuildFts,
}

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()>;
}

/// Simple in-memory queue using Tokio channels
pub struct ChannelJobQueue {
    sender: mpsc::Sender<Job>,
}

impl ChannelJobQueue {
    pub fn new(sender: mpsc::Sender<Job>) -> Self {
        Self { sender }
    }
}

#[async_trait::async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()> {
        self.sender.send(job).await.map_err(|e| anyhow::anyhow!("Queue send error: {}", e))
    }
}
