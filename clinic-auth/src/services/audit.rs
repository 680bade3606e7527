//! Audit ledger: append-only, hash-chained record of security decisions.
//!
//! All appends go through a single sequencer task that owns the chain tail,
//! so "read last hash, compute, write" never interleaves between callers in
//! this process. Writers in other processes are caught by the store's unique
//! sequence constraint; the sequencer then reloads the tail and retries.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::ServiceError;
use super::metrics;
use crate::models::{AuditEvent, AuditEventType, AuditOutcome, ClientContext, NewAuditEvent};
use crate::store::{AuditQuery, AuditStore, StoreError};
use crate::utils::Clock;

const SEQUENCER_QUEUE_DEPTH: usize = 1024;
const MAX_APPEND_ATTEMPTS: usize = 5;
pub const DEFAULT_VERIFY_BATCH_SIZE: i64 = 500;

struct AppendRequest {
    draft: NewAuditEvent,
    reply: oneshot::Sender<Result<AuditEvent, ServiceError>>,
}

/// Handle to the ledger. Cheap to clone; all clones share one sequencer.
#[derive(Clone)]
pub struct AuditLedger {
    store: Arc<dyn AuditStore>,
    sender: mpsc::Sender<AppendRequest>,
    verify_batch_size: i64,
}

/// Why a ledger position failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored hash differs from the hash recomputed from the stored fields.
    ContentMismatch,
    /// `previous_hash` does not match the stored hash of the preceding row.
    LinkMismatch,
    /// Sequence numbers are not contiguous.
    SequenceGap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BrokenLink {
    pub sequence: i64,
    pub expected_hash: String,
    pub actual_hash: String,
    pub kind: BreakKind,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub total_entries: u64,
    pub broken_links: Vec<BrokenLink>,
}

impl AuditLedger {
    /// Start the sequencer. Must be called inside a Tokio runtime.
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        let (sender, receiver) = mpsc::channel(SEQUENCER_QUEUE_DEPTH);
        tokio::spawn(run_sequencer(store.clone(), clock, receiver));

        Self {
            store,
            sender,
            verify_batch_size: DEFAULT_VERIFY_BATCH_SIZE,
        }
    }

    pub fn with_verify_batch_size(mut self, batch_size: i64) -> Self {
        self.verify_batch_size = batch_size.max(1);
        self
    }

    /// Append one event to the chain.
    ///
    /// The write is owned by the sequencer: if the caller is dropped while
    /// waiting, the event is still persisted.
    pub async fn append(
        &self,
        account_id: Option<Uuid>,
        event_type: AuditEventType,
        client: &ClientContext,
        outcome: AuditOutcome,
        details: serde_json::Value,
    ) -> Result<AuditEvent, ServiceError> {
        self.append_event(NewAuditEvent::new(
            account_id, event_type, client, outcome, details,
        ))
        .await
    }

    pub async fn append_event(&self, draft: NewAuditEvent) -> Result<AuditEvent, ServiceError> {
        let (reply, response) = oneshot::channel();

        self.sender
            .send(AppendRequest { draft, reply })
            .await
            .map_err(|_| ServiceError::AuditWrite(anyhow::anyhow!("audit sequencer stopped")))?;

        response.await.map_err(|_| {
            ServiceError::AuditWrite(anyhow::anyhow!("audit sequencer dropped the request"))
        })?
    }

    /// Events for one account, newest first.
    pub async fn find_by_account(
        &self,
        account_id: Uuid,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        Ok(self.store.find_audit_by_account(account_id, query).await?)
    }

    /// Events of one type, newest first.
    pub async fn find_by_type(
        &self,
        event_type: AuditEventType,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        Ok(self.store.find_audit_by_type(event_type, query).await?)
    }

    /// Current chain tail.
    pub async fn latest(&self) -> Result<Option<AuditEvent>, ServiceError> {
        Ok(self.store.last_audit_event().await?)
    }

    /// Replay the whole chain in ascending order, streaming in batches.
    ///
    /// Each position is reported at most once, with the first failing check
    /// in this order: content, link, sequence. Tampering with a stored hash
    /// therefore shows up at that row (content) and at its successor (link).
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, ServiceError> {
        let mut verifier = ChainVerifier::default();
        let mut after_sequence = 0;

        loop {
            let batch = self
                .store
                .scan_audit(after_sequence, self.verify_batch_size)
                .await?;

            let Some(last) = batch.last() else {
                break;
            };
            after_sequence = last.sequence;
            let exhausted = (batch.len() as i64) < self.verify_batch_size;

            for event in &batch {
                verifier.check(event);
            }

            if exhausted {
                break;
            }
        }

        let report = verifier.finish();

        if report.is_valid {
            tracing::info!(total_entries = report.total_entries, "Audit chain verified");
        } else {
            metrics::record_integrity_failure();
            tracing::error!(
                total_entries = report.total_entries,
                broken_links = report.broken_links.len(),
                first_break = report.broken_links.first().map(|b| b.sequence),
                "Audit chain integrity violation"
            );
        }

        Ok(report)
    }

    /// Like [`verify_integrity`](Self::verify_integrity) but turns a broken
    /// chain into an error.
    pub async fn ensure_integrity(&self) -> Result<IntegrityReport, ServiceError> {
        let report = self.verify_integrity().await?;
        match report.broken_links.first() {
            None => Ok(report),
            Some(first) => Err(ServiceError::IntegrityViolation(format!(
                "{} broken link(s), first at sequence {}",
                report.broken_links.len(),
                first.sequence
            ))),
        }
    }
}

#[derive(Default)]
struct ChainVerifier {
    previous_sequence: i64,
    previous_hash: String,
    total_entries: u64,
    broken_links: Vec<BrokenLink>,
}

impl ChainVerifier {
    fn check(&mut self, event: &AuditEvent) {
        self.total_entries += 1;

        let recomputed = event.expected_hash();
        let broken = if recomputed != event.hash {
            Some(BrokenLink {
                sequence: event.sequence,
                expected_hash: recomputed,
                actual_hash: event.hash.clone(),
                kind: BreakKind::ContentMismatch,
            })
        } else if event.previous_hash != self.previous_hash {
            Some(BrokenLink {
                sequence: event.sequence,
                expected_hash: self.previous_hash.clone(),
                actual_hash: event.previous_hash.clone(),
                kind: BreakKind::LinkMismatch,
            })
        } else if event.sequence != self.previous_sequence + 1 {
            Some(BrokenLink {
                sequence: event.sequence,
                expected_hash: self.previous_hash.clone(),
                actual_hash: event.previous_hash.clone(),
                kind: BreakKind::SequenceGap,
            })
        } else {
            None
        };

        if let Some(link) = broken {
            tracing::warn!(
                sequence = link.sequence,
                kind = ?link.kind,
                "Broken audit link"
            );
            self.broken_links.push(link);
        }

        self.previous_sequence = event.sequence;
        self.previous_hash = event.hash.clone();
    }

    fn finish(self) -> IntegrityReport {
        IntegrityReport {
            is_valid: self.broken_links.is_empty(),
            total_entries: self.total_entries,
            broken_links: self.broken_links,
        }
    }
}

/// Tail of the chain as last seen by the sequencer.
struct ChainTail {
    sequence: i64,
    hash: String,
}

async fn run_sequencer(
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    mut receiver: mpsc::Receiver<AppendRequest>,
) {
    let mut tail: Option<ChainTail> = None;

    while let Some(request) = receiver.recv().await {
        let result = append_one(store.as_ref(), clock.as_ref(), &mut tail, request.draft).await;

        if let Ok(event) = &result {
            metrics::record_audit_event(event.event_type.as_str());
        }

        if request.reply.send(result).is_err() {
            tracing::debug!("Audit append completed after caller went away");
        }
    }

    tracing::debug!("Audit sequencer stopped");
}

async fn append_one(
    store: &dyn AuditStore,
    clock: &dyn Clock,
    tail: &mut Option<ChainTail>,
    draft: NewAuditEvent,
) -> Result<AuditEvent, ServiceError> {
    for attempt in 1..=MAX_APPEND_ATTEMPTS {
        let (sequence, previous_hash) = match tail {
            Some(t) => (t.sequence, t.hash.clone()),
            None => match store.last_audit_event().await {
                Ok(Some(last)) => (last.sequence, last.hash),
                Ok(None) => (0, String::new()),
                Err(e) => return Err(ServiceError::AuditWrite(anyhow::Error::new(e))),
            },
        };

        let event = AuditEvent::seal(draft.clone(), sequence + 1, previous_hash, clock.now());

        match store.insert_audit_event(&event).await {
            Ok(()) => {
                tracing::info!(
                    sequence = event.sequence,
                    event_type = %event.event_type,
                    outcome = event.outcome.as_str(),
                    account_id = ?event.account_id,
                    "Audit event recorded"
                );
                *tail = Some(ChainTail {
                    sequence: event.sequence,
                    hash: event.hash.clone(),
                });
                return Ok(event);
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(
                    attempt,
                    sequence = event.sequence,
                    reason = %reason,
                    "Audit sequence taken by another writer, reloading tail"
                );
                *tail = None;
            }
            Err(e) => {
                *tail = None;
                return Err(ServiceError::AuditWrite(anyhow::Error::new(e)));
            }
        }
    }

    Err(ServiceError::AuditWrite(anyhow::anyhow!(
        "audit append lost {} sequence races in a row",
        MAX_APPEND_ATTEMPTS
    )))
}
