//! Hand-off of new and changed documents to the scoring stage
//!
//! The crawler never waits on scoring. Every created or updated document is
//! announced to a [`ScoringSink`]; the `needs_scoring` column in the catalog
//! stays set until a score for the current fingerprint is written back with
//! [`CatalogStore::record_score`](crate::storage::CatalogStore::record_score),
//! so notifications lost on shutdown are recovered from
//! [`pending_scoring`](crate::storage::CatalogStore::pending_scoring).

use crate::storage::DocumentRecord;
use tokio::sync::mpsc;

/// A document awaiting a score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringRequest {
    pub document_id: i64,
    pub repository_id: i64,
    pub file_path: String,
    /// Fingerprint of `content`; a score is only accepted for this value
    pub fingerprint: String,
    pub content: String,
}

impl ScoringRequest {
    pub fn from_document(document: &DocumentRecord) -> Self {
        Self {
            document_id: document.id,
            repository_id: document.repository_id,
            file_path: document.file_path.clone(),
            fingerprint: document.fingerprint.clone(),
            content: document.content.clone(),
        }
    }
}

/// Receives scoring requests from the crawler
///
/// Implementations must return promptly.
pub trait ScoringSink: Send + Sync {
    fn document_changed(&self, request: ScoringRequest);
}

/// Sink that only logs; scoring picks documents up from the catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScoring;

impl ScoringSink for LogScoring {
    fn document_changed(&self, request: ScoringRequest) {
        tracing::debug!(
            "Document {} ({}) queued for scoring",
            request.document_id,
            request.file_path
        );
    }
}

/// Sink that forwards requests over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelScoring {
    sender: mpsc::UnboundedSender<ScoringRequest>,
}

impl ChannelScoring {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScoringRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ScoringSink for ChannelScoring {
    fn document_changed(&self, request: ScoringRequest) {
        let document_id = request.document_id;
        if self.sender.send(request).is_err() {
            tracing::warn!(
                "Scoring receiver is gone, document {} left for the pending queue",
                document_id
            );
        }
    }
}
