//! Sequences chat turns: one outstanding upstream call per conversation, the
//! finished envelope rendered for display, then handed to history storage in
//! the background.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ChatResponse, QueryRequest};
use crate::core::gateway::UpstreamGateway;
use crate::core::persistence::{TurnRecord, TurnStore};
use crate::render::RenderedTurn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// A turn for this conversation has not finished yet.
    InFlight { conversation: String },
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::InFlight { conversation } => write!(
                f,
                "A request for '{conversation}' is still in progress; wait for it to finish"
            ),
        }
    }
}

impl StdError for TurnError {}

pub struct CompletedTurn {
    pub response: ChatResponse,
    pub view: RenderedTurn,
    /// The background history write, if a store is attached. Awaiting it is
    /// optional; it never reports failure.
    pub persistence: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    gateway: UpstreamGateway,
    store: Option<Arc<dyn TurnStore>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ChatOrchestrator {
    pub fn new(gateway: UpstreamGateway) -> Self {
        Self {
            gateway,
            store: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TurnStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gateway(&self) -> &UpstreamGateway {
        &self.gateway
    }

    pub fn is_in_flight(&self, conversation: &str) -> bool {
        lock_ignoring_poison(&self.in_flight).contains(conversation)
    }

    pub async fn submit(&self, request: QueryRequest) -> Result<CompletedTurn, TurnError> {
        self.submit_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Runs one turn. The only error is a concurrent turn for the same
    /// `user_id`; upstream failures come back inside the envelope.
    pub async fn submit_with_cancel(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletedTurn, TurnError> {
        let _guard = TurnGuard::acquire(&self.in_flight, &request.user_id)?;

        let envelope = self.gateway.send_with_cancel(&request, cancel).await;
        info!(
            user_id = %request.user_id,
            status = %envelope.status,
            images = envelope.images().len(),
            proof = envelope.proof.len(),
            "Turn completed"
        );

        let view = RenderedTurn::from_envelope(&envelope);
        let persistence = self.store.as_ref().map(|store| {
            let record = TurnRecord::from_turn(&request.message, &envelope);
            spawn_persist(Arc::clone(store), record)
        });

        Ok(CompletedTurn {
            response: ChatResponse {
                justifyai_response: envelope,
            },
            view,
            persistence,
        })
    }
}

fn spawn_persist(store: Arc<dyn TurnStore>, record: TurnRecord) -> JoinHandle<()> {
    tokio::spawn(async move {
        let session_id = record.session_id.clone();
        match store.save(record).await {
            Ok(()) => debug!(%session_id, "Turn record saved"),
            Err(err) => warn!(%session_id, error = %err, "Failed to save turn record"),
        }
    })
}

/// Marks a conversation busy until dropped.
struct TurnGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    conversation: String,
}

impl TurnGuard {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        conversation: &str,
    ) -> Result<Self, TurnError> {
        if !lock_ignoring_poison(in_flight).insert(conversation.to_string()) {
            return Err(TurnError::InFlight {
                conversation: conversation.to_string(),
            });
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            conversation: conversation.to_string(),
        })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        lock_ignoring_poison(&self.in_flight).remove(&self.conversation);
    }
}

fn lock_ignoring_poison(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::EnvelopeStatus;
    use crate::core::persistence::{MemoryTurnStore, PersistenceError};
    use crate::utils::test_utils::{test_client, MockReply, MockUpstream};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl TurnStore for FailingStore {
        async fn save(&self, _record: TurnRecord) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io {
                path: "unwritable.jsonl".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    fn orchestrator(url: &str) -> ChatOrchestrator {
        ChatOrchestrator::new(UpstreamGateway::new(test_client(), url))
    }

    #[tokio::test]
    async fn completed_turn_is_rendered_and_persisted() {
        let upstream = MockUpstream::start(vec![MockReply::json(json!({
            "response": "**Mars** is further from the Sun.",
            "session_id": "s-5",
            "sources": ["https://nasa.gov/mars"]
        }))])
        .await;
        let store = Arc::new(MemoryTurnStore::new());

        let turn = orchestrator(&upstream.url)
            .with_store(store.clone())
            .submit(QueryRequest::new("Is Mars further?", "alice"))
            .await
            .unwrap();

        assert_eq!(turn.response.justifyai_response.status, EnvelopeStatus::Success);
        assert_eq!(
            turn.view.concise_html,
            "<p><strong>Mars</strong> is further from the Sun.</p>"
        );

        turn.persistence.expect("store attached").await.unwrap();
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Is Mars further?");
        assert_eq!(records[0].session_id, "s-5");
        assert_eq!(records[0].proof_sources, vec!["https://nasa.gov/mars"]);
    }

    #[tokio::test]
    async fn persistence_failure_does_not_affect_the_turn() {
        let upstream = MockUpstream::start(vec![MockReply::text("fine")]).await;

        let turn = orchestrator(&upstream.url)
            .with_store(Arc::new(FailingStore))
            .submit(QueryRequest::new("q", "bob"))
            .await
            .unwrap();

        assert_eq!(turn.response.justifyai_response.formatted_content.concise, "fine");
        turn.persistence
            .expect("store attached")
            .await
            .expect("persistence task must not panic");
    }

    #[tokio::test]
    async fn second_send_for_same_conversation_is_rejected_while_in_flight() {
        let upstream = MockUpstream::start(vec![MockReply::Hang]).await;
        let orchestrator = orchestrator(&upstream.url);
        let cancel = CancellationToken::new();

        let first = {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                orchestrator
                    .submit_with_cancel(QueryRequest::new("first", "carol"), &cancel)
                    .await
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while !orchestrator.is_in_flight("carol") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first turn should start");

        let second = orchestrator
            .submit(QueryRequest::new("second", "carol"))
            .await;
        assert_eq!(
            second.err(),
            Some(TurnError::InFlight {
                conversation: "carol".into()
            })
        );
        assert!(!orchestrator.is_in_flight("dave"));

        cancel.cancel();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.response.justifyai_response.status, EnvelopeStatus::Error);
        assert!(!orchestrator.is_in_flight("carol"));
    }
}
