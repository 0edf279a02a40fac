use dossier_bridge::{
    BreakerConfig, BreakerState, CallOutcome, EnrichmentResponse, EnrichmentTransport,
    ResilienceBridge, ResponseMetadata, ResponseStatus, RetryPolicy, SourceError,
};
use dossier_test_utils::{test_bridge_config, FakeTransport, Reply};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const SESSION: &str = "test-session";

fn bridge(config: dossier_bridge::BridgeConfig, transport: &Arc<FakeTransport>) -> ResilienceBridge {
    let transport: Arc<dyn EnrichmentTransport> = transport.clone();
    ResilienceBridge::new(config, transport).expect("bridge")
}

fn topics(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn failing_source_does_not_hide_others() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["rust async", "tokio guide"]))
            .always("academic", Reply::server_error()),
    );
    let bridge = bridge(test_bridge_config(&["web", "academic"]), &transport);

    let research = bridge.research_topic(SESSION, "async runtimes").await;

    assert!(!research.fallback);
    assert!(research.note.is_none());
    let titles: Vec<_> = research.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["rust async", "tokio guide"]);
    assert!(research
        .items
        .iter()
        .all(|i| i.source.as_deref() == Some("web")));

    let failed: Vec<_> = research.failed_sources().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, "academic");
    assert_eq!(failed[0].outcome, CallOutcome::ExhaustedRetries);
    // one attempt plus two retries
    assert_eq!(failed[0].attempts, 3);
    assert_eq!(transport.calls("academic"), 3);
    assert_eq!(transport.calls("web"), 1);

    let metrics = bridge.metrics(SESSION).expect("metrics");
    assert_eq!(metrics.session_id, "test-session");
    assert_eq!(metrics.request_count, 2);
    assert_eq!(metrics.outcomes.success, 1);
    assert_eq!(metrics.outcomes.exhausted_retries, 1);
    assert_eq!(metrics.error_log.len(), 1);
    assert_eq!(metrics.error_log[0].source, "academic");
    assert_eq!(
        metrics.per_topic_latencies.get("async runtimes").map(Vec::len),
        Some(2)
    );
}

#[tokio::test(start_paused = true)]
async fn all_sources_failing_yields_fallback() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::server_error())
            .always(
                "academic",
                Reply::Fail(SourceError::Client {
                    status: 400,
                    message: "bad query".into(),
                }),
            ),
    );
    let bridge = bridge(test_bridge_config(&["web", "academic"]), &transport);

    let research = bridge.research_topic(SESSION, "quantum billing").await;

    assert!(research.fallback);
    assert!(research.items.is_empty());
    let note = research.note.clone().expect("note");
    assert!(note.contains("all enrichment sources failed"), "{note}");
    assert!(note.contains("web"));
    assert!(note.contains("academic"));
    // permanent failures are not retried
    assert_eq!(transport.calls("academic"), 1);

    // fallbacks are not cached
    let again = bridge.research_topic(SESSION, "quantum billing").await;
    assert!(!again.cached);
    assert_eq!(transport.calls("academic"), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_then_success_is_retried_success() {
    let transport = Arc::new(FakeTransport::new().sequence(
        "web",
        vec![Reply::server_error()],
        Reply::items(&["found"]),
    ));
    let bridge = bridge(test_bridge_config(&["web"]), &transport);
    let source = bridge.config().sources[0].clone();

    let fetch = bridge.fetch(SESSION, &source, "flaky").await;

    assert_eq!(fetch.report.outcome, CallOutcome::RetriedSuccess);
    assert_eq!(fetch.report.attempts, 2);
    assert_eq!(fetch.report.item_count, 1);
    assert!(fetch.result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_is_honoured() {
    let transport = Arc::new(FakeTransport::new().sequence(
        "web",
        vec![Reply::Fail(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        })],
        Reply::items(&["late"]),
    ));
    let config = test_bridge_config(&["web"]).with_retry(
        RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_secs(10)),
    );
    let bridge = bridge(config, &transport);
    let source = bridge.config().sources[0].clone();

    let started = Instant::now();
    let fetch = bridge.fetch(SESSION, &source, "limited").await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(fetch.report.outcome, CallOutcome::RetriedSuccess);
}

#[tokio::test(start_paused = true)]
async fn huge_retry_after_is_capped() {
    let transport = Arc::new(FakeTransport::new().sequence(
        "web",
        vec![Reply::Fail(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(86_400)),
        })],
        Reply::items(&["soon"]),
    ));
    let config = test_bridge_config(&["web"]).with_retry(
        RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_secs(2)),
    );
    let bridge = bridge(config, &transport);
    let source = bridge.config().sources[0].clone();

    let started = Instant::now();
    let fetch = bridge.fetch(SESSION, &source, "throttled").await;

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2), "{waited:?}");
    assert!(waited < Duration::from_secs(3), "{waited:?}");
    assert_eq!(fetch.report.outcome, CallOutcome::RetriedSuccess);
    assert_eq!(transport.calls("web"), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_body_is_transient() {
    let limited = EnrichmentResponse {
        status: ResponseStatus::RateLimited,
        data: None,
        metadata: ResponseMetadata {
            retry_after_ms: Some(250),
            ..ResponseMetadata::default()
        },
    };
    let transport = Arc::new(FakeTransport::new().sequence(
        "web",
        vec![Reply::Response(limited)],
        Reply::items(&["ok"]),
    ));
    let bridge = bridge(test_bridge_config(&["web"]), &transport);
    let source = bridge.config().sources[0].clone();

    let fetch = bridge.fetch(SESSION, &source, "body limited").await;
    assert_eq!(fetch.report.outcome, CallOutcome::RetriedSuccess);
    assert_eq!(transport.calls("web"), 2);
}

#[tokio::test(start_paused = true)]
async fn error_status_is_permanent() {
    let failed = EnrichmentResponse {
        status: ResponseStatus::Error,
        data: None,
        metadata: ResponseMetadata {
            message: Some("index offline".into()),
            ..ResponseMetadata::default()
        },
    };
    let transport = Arc::new(FakeTransport::new().always("web", Reply::Response(failed)));
    let bridge = bridge(test_bridge_config(&["web"]), &transport);
    let source = bridge.config().sources[0].clone();

    let fetch = bridge.fetch(SESSION, &source, "offline").await;
    assert_eq!(fetch.report.outcome, CallOutcome::Permanent);
    assert_eq!(
        fetch.result,
        Err(SourceError::Remote("index offline".into()))
    );
    assert_eq!(transport.calls("web"), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_source_times_out() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["too late"]))
            .with_latency(Duration::from_secs(5)),
    );
    let config = test_bridge_config(&["web"])
        .with_request_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy::none());
    let bridge = bridge(config, &transport);
    let source = bridge.config().sources[0].clone();

    let fetch = bridge.fetch(SESSION, &source, "slow").await;
    assert_eq!(
        fetch.result,
        Err(SourceError::Timeout(Duration::from_secs(1)))
    );
    assert_eq!(fetch.report.outcome, CallOutcome::ExhaustedRetries);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_short_circuits_calls() {
    let transport = Arc::new(FakeTransport::new().always("web", Reply::server_error()));
    let config = test_bridge_config(&["web"])
        .with_retry(RetryPolicy::none())
        .with_breaker(
            BreakerConfig::default()
                .with_failure_threshold(2)
                .with_cooldown(Duration::from_secs(30)),
        );
    let bridge = bridge(config, &transport);

    bridge.research_topic(SESSION, "a").await;
    bridge.research_topic(SESSION, "b").await;
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::Open)]
    );

    let blocked = bridge.research_topic(SESSION, "c").await;
    assert!(blocked.fallback);
    assert_eq!(blocked.sources[0].outcome, CallOutcome::CircuitOpen);
    assert_eq!(transport.calls("web"), 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::HalfOpen)]
    );
    bridge.research_topic(SESSION, "d").await;
    assert_eq!(transport.calls("web"), 3);
    // a failed trial call reopens the circuit
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::Open)]
    );
}

/// Opens after two failures; half-open after one second
fn tripping_bridge(transport: &Arc<FakeTransport>) -> ResilienceBridge {
    let config = test_bridge_config(&["web"])
        .with_retry(RetryPolicy::none())
        .with_breaker(
            BreakerConfig::default()
                .with_failure_threshold(2)
                .with_cooldown(Duration::from_secs(1))
                .with_success_threshold(1),
        );
    bridge(config, transport)
}

#[tokio::test(start_paused = true)]
async fn half_open_client_error_reopens_breaker() {
    let bad_request = Reply::Fail(SourceError::Client {
        status: 400,
        message: "bad query".into(),
    });
    let transport = Arc::new(FakeTransport::new().sequence(
        "web",
        vec![Reply::server_error(), Reply::server_error()],
        bad_request,
    ));
    let bridge = tripping_bridge(&transport);
    let source = bridge.config().sources[0].clone();

    bridge.fetch(SESSION, &source, "a").await;
    bridge.fetch(SESSION, &source, "b").await;
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::Open)]
    );

    tokio::time::advance(Duration::from_secs(2)).await;
    let trial = bridge.fetch(SESSION, &source, "c").await;
    assert_eq!(trial.report.outcome, CallOutcome::Permanent);
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::Open)]
    );

    let blocked = bridge.fetch(SESSION, &source, "d").await;
    assert_eq!(blocked.report.outcome, CallOutcome::CircuitOpen);
    assert_eq!(transport.calls("web"), 3);
}

#[tokio::test(start_paused = true)]
async fn error_status_counts_toward_opening() {
    let failed = EnrichmentResponse {
        status: ResponseStatus::Error,
        data: None,
        metadata: ResponseMetadata {
            message: Some("index offline".into()),
            ..ResponseMetadata::default()
        },
    };
    let transport = Arc::new(FakeTransport::new().always("web", Reply::Response(failed)));
    let bridge = tripping_bridge(&transport);

    bridge.research_topic(SESSION, "a").await;
    bridge.research_topic(SESSION, "b").await;
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::Open)]
    );
    let blocked = bridge.research_topic(SESSION, "c").await;
    assert_eq!(blocked.sources[0].outcome, CallOutcome::CircuitOpen);
    assert_eq!(transport.calls("web"), 2);
}

#[tokio::test(start_paused = true)]
async fn client_errors_leave_closed_breaker_closed() {
    let transport = Arc::new(FakeTransport::new().always(
        "web",
        Reply::Fail(SourceError::Client {
            status: 404,
            message: "no such topic".into(),
        }),
    ));
    let bridge = tripping_bridge(&transport);

    for topic in ["a", "b", "c"] {
        bridge.research_topic(SESSION, topic).await;
    }
    assert_eq!(
        bridge.breaker_states(),
        vec![("web".to_string(), BreakerState::Closed)]
    );
    assert_eq!(transport.calls("web"), 3);
}

#[tokio::test(start_paused = true)]
async fn sessions_are_sent_and_tracked_separately() {
    let transport = Arc::new(FakeTransport::new().always("web", Reply::items(&["hit"])));
    let bridge = bridge(test_bridge_config(&["web"]), &transport);

    bridge.research_topics("alpha", &topics(&["x", "y"])).await;
    bridge.research_topics("beta", &topics(&["z"])).await;

    assert_eq!(transport.sessions(), vec!["alpha", "alpha", "beta"]);
    let alpha = bridge.metrics("alpha").expect("alpha metrics");
    let beta = bridge.metrics("beta").expect("beta metrics");
    assert_eq!(alpha.request_count, 2);
    assert_eq!(beta.request_count, 1);
    assert!(beta.per_topic_latencies.contains_key("z"));
    assert!(!beta.per_topic_latencies.contains_key("x"));
    assert!(bridge.metrics(SESSION).is_none());
}

#[tokio::test(start_paused = true)]
async fn batches_keep_topic_order_and_wait_between() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["hit"]))
            .with_latency(Duration::from_millis(100)),
    );
    let config = test_bridge_config(&["web"]).with_batching(2, Duration::from_secs(1));
    let bridge = bridge(config, &transport);
    let names = topics(&["t1", "t2", "t3", "t4", "t5"]);

    let started = Instant::now();
    let results = bridge.research_topics(SESSION, &names).await;

    let order: Vec<_> = results.iter().map(|r| r.topic.as_str()).collect();
    assert_eq!(order, vec!["t1", "t2", "t3", "t4", "t5"]);
    assert!(results.iter().all(|r| !r.fallback));
    // three batches, two delays between them
    assert!(started.elapsed() >= Duration::from_secs(2));

    let queries = transport.queries();
    let mut first_batch = queries[..2].to_vec();
    first_batch.sort();
    assert_eq!(first_batch, vec!["t1", "t2"]);
    assert_eq!(queries[4], "t5");
}

#[tokio::test(start_paused = true)]
async fn in_flight_calls_are_bounded() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["w"]))
            .always("academic", Reply::items(&["a"]))
            .always("discussions", Reply::items(&["d"]))
            .with_latency(Duration::from_millis(200)),
    );
    let config = test_bridge_config(&["web", "academic", "discussions"])
        .with_batching(3, Duration::ZERO)
        .with_max_in_flight(2);
    let bridge = bridge(config, &transport);

    let results = bridge.research_topics(SESSION, &topics(&["x", "y", "z"])).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.items.len() == 3));
    assert_eq!(transport.total_calls(), 9);
    assert_eq!(transport.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_work() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["never"]))
            .with_latency(Duration::from_secs(10)),
    );
    let config = test_bridge_config(&["web"]).with_batching(2, Duration::ZERO);
    let bridge = bridge(config, &transport);
    let names = topics(&["a", "b", "c", "d"]);

    let (results, ()) = tokio::join!(bridge.research_topics(SESSION, &names), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        bridge.shutdown();
    });

    assert!(bridge.is_shut_down());
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.fallback));
    assert_eq!(results[0].sources[0].outcome, CallOutcome::Cancelled);
    // the second batch never started
    assert!(results[2].sources.is_empty());
    assert_eq!(transport.total_calls(), 2);

    let metrics = bridge.metrics(SESSION).expect("metrics");
    assert_eq!(metrics.outcomes.cancelled, 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_topic_is_served_from_cache() {
    let transport = Arc::new(FakeTransport::new().always("web", Reply::items(&["cached item"])));
    let bridge = bridge(test_bridge_config(&["web"]), &transport);

    let first = bridge.research_topic(SESSION, "caching").await;
    let second = bridge.research_topic(SESSION, "caching").await;

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.items, first.items);
    assert_eq!(transport.calls("web"), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_sources_are_skipped() {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["w"]))
            .always("academic", Reply::items(&["a"])),
    );
    let mut config = test_bridge_config(&["web", "academic"]);
    config.sources[1].enabled = false;
    let bridge = bridge(config, &transport);

    let research = bridge.research_topic(SESSION, "skip").await;
    assert_eq!(research.items.len(), 1);
    assert_eq!(transport.calls("academic"), 0);

    let mut none = test_bridge_config(&["web"]);
    none.sources[0].enabled = false;
    let empty = ResilienceBridge::new(none, transport.clone() as Arc<dyn EnrichmentTransport>)
        .expect("bridge");
    let fallback = empty.research_topic(SESSION, "nothing").await;
    assert!(fallback.fallback);
    assert_eq!(
        fallback.note.as_deref(),
        Some("no enrichment sources are enabled")
    );
}
