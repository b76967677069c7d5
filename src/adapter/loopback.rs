use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::GortError;
use crate::util::BoxFuture;

use super::{Adapter, AdapterEvent, RenderedMessage};

/// An in-process adapter for tests and the CLI's interactive demo
/// mode. `Listen`-side events are fed in via `push_event`; sent
/// replies are captured in `sent` for assertions rather than delivered
/// anywhere real.
pub struct LoopbackAdapter {
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<AdapterEvent>>>,
    sent: Mutex<Vec<(String, RenderedMessage)>>,
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push_event(&self, event: AdapterEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Takes ownership of the event receiver; call once at startup.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<AdapterEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub fn sent_messages(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().unwrap().clone()
    }

    /// Drains and returns every message sent since the last call.
    pub fn take_sent(&self) -> Vec<(String, RenderedMessage)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for LoopbackAdapter {
    fn name(&self) -> &str {
        "loopback"
    }

    fn send(&self, channel: &str, message: RenderedMessage) -> BoxFuture<'_, Result<(), GortError>> {
        let channel = channel.to_string();
        Box::pin(async move {
            self.sent.lock().unwrap().push((channel, message));
            Ok(())
        })
    }

    fn resolve_user(&self, provider_id: &str) -> BoxFuture<'_, Result<Option<String>, GortError>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move { Ok(Some(provider_id)) })
    }

    fn resolve_channel(&self, id: &str) -> BoxFuture<'_, Result<Option<String>, GortError>> {
        let id = id.to_string();
        Box::pin(async move { Ok(Some(id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_message() {
        let adapter = LoopbackAdapter::new();
        adapter
            .send("C1", RenderedMessage::Text("hello".to_string()))
            .await
            .unwrap();
        let sent = adapter.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "C1");
    }
}
