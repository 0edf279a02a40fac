//! Testing utilities for the Dossier workspace
//!
//! Shared fixtures, a scripted enrichment transport and a scripted model.

#![allow(missing_docs)]

use async_trait::async_trait;
use dashmap::DashMap;
use dossier_bridge::{
    BridgeConfig, EnrichmentItem, EnrichmentRequest, EnrichmentResponse, EnrichmentTransport,
    RetryPolicy, SourceConfig, SourceError,
};
use dossier_core::{LanguageModel, ModelError, ModelRequest, ModelResponse, ModelTask};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Passes validation with a score of 100
pub const COMPLIANT_DOC: &str = "\
#+TITLE: Billing Portal
* Overview
** Purpose
Let customers pay invoices online.
** Scope
Invoices and refunds.
* Goals
Cut support calls in half.
* Requirements
** Functional Requirements
*** Create invoice :must:
:PROPERTIES:
:ID: BILL-1
:END:
Staff create invoices from orders.
*** Refund payment :should:
:PROPERTIES:
:ID: BILL-2
:DEPENDS_ON: BILL-1
:END:
Staff refund a captured payment.
** Non-Functional Requirements
*** Page loads under 200ms :could:
:PROPERTIES:
:ID: BILL-3
:END:
* User Stories
** Pay an invoice
As a customer I pay an invoice by card.
- card accepted
- receipt emailed
* Ideas
** Dark mode
* Q&A
** Who owns billing?
Finance.
** Which currencies at launch?
* Changelog :changelog:
- v1 (2024-01-01): first draft
";

/// Requirements without any priority tag or property
pub const UNTAGGED_DOC: &str = "\
#+TITLE: Notes
* Overview
** Purpose
Internal tooling.
** Scope
Ops only.
* Requirements
** Functional Requirements
*** Export report
*** Import users
** Non-Functional Requirements
*** Audit trail :must:
* User Stories
** Run an export
";

/// Missing required sections
pub const INCOMPLETE_DOC: &str = "\
* Requirements
** Functional Requirements
*** Sign in :must:
";

/// Item list for scripted replies
pub fn items(titles: &[&str]) -> Vec<EnrichmentItem> {
    titles.iter().map(|t| EnrichmentItem::titled(*t)).collect()
}

/// Bridge config over the given source names with fast retries and no
/// batch delay
pub fn test_bridge_config(sources: &[&str]) -> BridgeConfig {
    BridgeConfig::default()
        .with_sources(
            sources
                .iter()
                .map(|s| SourceConfig::new(*s, format!("/research/{s}")))
                .collect(),
        )
        .with_batching(3, Duration::ZERO)
        .with_retry(
            RetryPolicy::default()
                .with_delays(Duration::from_millis(10), Duration::from_millis(40)),
        )
}

/// One scripted answer from a source
#[derive(Debug, Clone)]
pub enum Reply {
    Items(Vec<EnrichmentItem>),
    Fail(SourceError),
    Response(EnrichmentResponse),
}

impl Reply {
    pub fn items(titles: &[&str]) -> Self {
        Self::Items(items(titles))
    }

    pub fn server_error() -> Self {
        Self::Fail(SourceError::Server {
            status: 503,
            message: "unavailable".to_string(),
        })
    }

    fn resolve(self) -> Result<EnrichmentResponse, SourceError> {
        match self {
            Self::Items(items) => Ok(EnrichmentResponse::success(items)),
            Self::Fail(e) => Err(e),
            Self::Response(r) => Ok(r),
        }
    }
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<Reply>,
    // Replayed once the queue is drained
    fallback: Reply,
}

struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport answering from per-source scripts
///
/// Unknown sources answer `404`.
#[derive(Debug, Default)]
pub struct FakeTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: DashMap<String, usize>,
    queries: Mutex<Vec<String>>,
    sessions: Mutex<Vec<String>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `source` gets `reply`
    #[must_use]
    pub fn always(self, source: &str, reply: Reply) -> Self {
        self.sequence(source, Vec::new(), reply)
    }

    /// Calls to `source` get `replies` in order, then `then` forever
    #[must_use]
    pub fn sequence(self, source: &str, replies: Vec<Reply>, then: Reply) -> Self {
        self.scripts.lock().insert(
            source.to_string(),
            Script {
                queue: replies.into(),
                fallback: then,
            },
        );
        self
    }

    /// Each call sleeps this long before answering
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self, source: &str) -> usize {
        self.calls.get(source).map_or(0, |c| *c)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    /// Queries in the order calls started
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// Session ids carried by requests, in call order
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, source: &str) -> Reply {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(source) {
            Some(script) => script
                .queue
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone()),
            None => Reply::Fail(SourceError::Client {
                status: 404,
                message: format!("unknown source {source}"),
            }),
        }
    }
}

#[async_trait]
impl EnrichmentTransport for FakeTransport {
    async fn send(
        &self,
        source: &SourceConfig,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, SourceError> {
        *self.calls.entry(source.name.clone()).or_insert(0) += 1;
        self.queries.lock().push(request.query.clone());
        self.sessions.lock().push(request.session_id.clone());
        let _guard = InFlight::enter(&self.in_flight, &self.peak);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next_reply(&source.name).resolve()
    }
}

/// Model answering from fixed per-task text
#[derive(Debug, Default)]
pub struct ScriptedModel {
    answers: HashMap<ModelTask, String>,
    failing: Option<ModelError>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `error`
    pub fn failing(error: ModelError) -> Self {
        Self {
            failing: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn answer(mut self, task: ModelTask, text: &str) -> Self {
        self.answers.insert(task, text.to_string());
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn calls_for(&self, task: ModelTask) -> usize {
        self.requests.lock().iter().filter(|r| r.task == task).count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let task = request.task;
        self.requests.lock().push(request);
        if let Some(error) = &self.failing {
            return Err(error.clone());
        }
        // Blank answers send stages to their heuristics
        Ok(ModelResponse::new(
            self.answers.get(&task).cloned().unwrap_or_default(),
        ))
    }
}
