//! Document sinks feeding the downstream processing collaborator

use crate::state::DocumentRef;
use crate::storage::traits::DocumentSink;
use tokio::sync::mpsc;

/// Sink forwarding references into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelDocumentSink {
    sender: mpsc::UnboundedSender<DocumentRef>,
}

impl ChannelDocumentSink {
    /// Creates a sink and the receiver its references arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DocumentRef>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DocumentSink for ChannelDocumentSink {
    fn submit(&self, document: DocumentRef) {
        if let Err(e) = self.sender.send(document) {
            tracing::debug!("Document consumer gone, dropping {}", e.0.storage_key);
        }
    }
}

/// Sink that discards every reference
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDocumentSink;

impl DocumentSink for NullDocumentSink {
    fn submit(&self, document: DocumentRef) {
        tracing::trace!("Discarding document reference {}", document.storage_key);
    }
}
