use dossier_bridge::{EnrichmentTransport, ResilienceBridge, RetryPolicy};
use dossier_core::stages::{CATEGORIZE, DEPENDENCIES, PRIORITIZE, RESEARCH, REVIEW, TOPICS};
use dossier_core::{
    Dependency, DossierConfig, FeedbackKind, ModelError, ModelTask, Pipeline, RunSettings,
    SessionOptions, Verdict,
};
use dossier_graph::RunStatus;
use dossier_test_utils::{
    test_bridge_config, FakeTransport, Reply, ScriptedModel, COMPLIANT_DOC, INCOMPLETE_DOC,
    UNTAGGED_DOC,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ONE_PASS: [&str; 6] = [CATEGORIZE, PRIORITIZE, DEPENDENCIES, TOPICS, RESEARCH, REVIEW];

fn offline() -> DossierConfig {
    DossierConfig::default().with_research(false)
}

fn bridge_over(transport: &Arc<FakeTransport>, sources: &[&str]) -> Arc<ResilienceBridge> {
    let transport: Arc<dyn EnrichmentTransport> = transport.clone();
    let config = test_bridge_config(sources).with_retry(RetryPolicy::none());
    Arc::new(ResilienceBridge::new(config, transport).expect("bridge"))
}

#[tokio::test]
async fn heuristic_run_uses_tags_and_properties() -> anyhow::Result<()> {
    let report = Pipeline::new(offline())
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(!report.resumed);
    assert_eq!(report.visited, ONE_PASS);

    let state = &report.state;
    assert_eq!(state.title.as_deref(), Some("Billing Portal"));
    assert_eq!(state.moscow.must, vec!["BILL-1"]);
    assert_eq!(state.moscow.should, vec!["BILL-2"]);
    assert_eq!(state.moscow.could, vec!["BILL-3"]);
    assert_eq!(state.horizons.now, vec!["BILL-1"]);
    assert_eq!(state.horizons.next, vec!["BILL-2"]);
    assert_eq!(state.horizons.later, vec!["BILL-3"]);
    assert!(state
        .dependencies
        .contains(&Dependency::new("BILL-2", "BILL-1")));

    let topics: Vec<_> = state.topics.iter().map(String::as_str).collect();
    assert_eq!(
        topics,
        vec![
            "Create invoice",
            "Refund payment",
            "Page loads under 200ms",
            "Dark mode"
        ]
    );
    assert!(state.enrichment.is_empty());

    assert_eq!(*state.verdict.get(), Some(Verdict::Approve));
    assert_eq!(*state.refinement_passes.get(), 1);
    assert!(state
        .feedback
        .iter()
        .any(|f| f.kind == FeedbackKind::Note && f.message == "1 open questions"));
    assert!(state.errors.is_empty(), "{:?}", state.errors.items());

    let validation = report.validation.as_ref().expect("validation");
    assert!(validation.is_valid);
    assert!(report.parse_issues.is_empty());
    Ok(())
}

#[tokio::test]
async fn uncategorized_requirements_trigger_bounded_refinement() -> anyhow::Result<()> {
    let report = Pipeline::new(offline())
        .analyze("docs/notes.org", UNTAGGED_DOC, SessionOptions::default())
        .await?;

    assert_eq!(report.status, RunStatus::Completed);
    // one refinement pass with the default limit
    assert_eq!(report.visited.len(), 2 * ONE_PASS.len());
    assert_eq!(report.visited[6], CATEGORIZE);

    let state = &report.state;
    assert_eq!(*state.refinement_passes.get(), 2);
    assert_eq!(*state.verdict.get(), Some(Verdict::Refine));
    assert!(state.feedback.iter().any(|f| f.kind == FeedbackKind::Gap
        && f.message.contains("REQ-1")
        && f.message.contains("REQ-2")));
    assert!(state
        .feedback
        .iter()
        .any(|f| f.message.contains("refinement limit")));
    // topics are not repeated on the second pass
    let topics: Vec<_> = state.topics.iter().map(String::as_str).collect();
    assert_eq!(topics, vec!["Audit trail", "Export report", "Import users"]);
    Ok(())
}

#[tokio::test]
async fn model_answers_override_heuristics() -> anyhow::Result<()> {
    let model = ScriptedModel::new()
        .answer(
            ModelTask::Categorize,
            "BILL-1: must\nBILL-2: must\nBILL-3: wont\nBILL-99: must",
        )
        .answer(ModelTask::Prioritize, "BILL-3: next")
        .answer(ModelTask::Dependencies, "BILL-1 -> BILL-3\nBILL-2 -> BILL-2")
        .answer(ModelTask::Topics, "invoice numbering\n- payment refunds\nInvoice Numbering")
        .answer(ModelTask::Review, "APPROVE\n- coverage looks complete")
        .shared();

    let report = Pipeline::new(offline())
        .with_model(model.clone())
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;

    let state = &report.state;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(state.moscow.must, vec!["BILL-1", "BILL-2"]);
    assert_eq!(state.moscow.wont, vec!["BILL-3"]);
    assert_eq!(state.horizons.next, vec!["BILL-3"]);

    let deps: Vec<_> = state.dependencies.iter().cloned().collect();
    assert_eq!(
        deps,
        vec![
            Dependency::new("BILL-2", "BILL-1"),
            Dependency::new("BILL-1", "BILL-3")
        ]
    );

    let topics: Vec<_> = state.topics.iter().map(String::as_str).collect();
    assert_eq!(topics, vec!["invoice numbering", "payment refunds"]);

    assert_eq!(*state.verdict.get(), Some(Verdict::Approve));
    assert!(state.feedback.iter().any(|f| f.kind == FeedbackKind::Risk
        && f.message == "must-have BILL-1 depends on lower-priority BILL-3"));
    assert!(state
        .feedback
        .iter()
        .any(|f| f.message == "coverage looks complete"));

    assert_eq!(model.calls_for(ModelTask::Categorize), 1);
    assert_eq!(model.calls_for(ModelTask::Review), 1);
    Ok(())
}

#[tokio::test]
async fn failing_model_falls_back_with_recoverable_errors() -> anyhow::Result<()> {
    let model = ScriptedModel::failing(ModelError::Unavailable("offline".into())).shared();
    let report = Pipeline::new(offline())
        .with_model(model)
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.state.moscow.must, vec!["BILL-1"]);
    assert_eq!(*report.state.verdict.get(), Some(Verdict::Approve));

    let stages: Vec<_> = report
        .state
        .errors
        .iter()
        .map(|e| e.stage.as_str())
        .collect();
    assert_eq!(
        stages,
        vec![CATEGORIZE, PRIORITIZE, DEPENDENCIES, TOPICS, REVIEW]
    );
    assert!(report.state.errors.iter().all(|e| !e.fatal));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn research_results_and_fallbacks_reach_review() -> anyhow::Result<()> {
    let transport = Arc::new(
        FakeTransport::new()
            .always("web", Reply::items(&["invoice numbering schemes"]))
            .always("academic", Reply::server_error()),
    );
    let model = ScriptedModel::new()
        .answer(ModelTask::Topics, "invoice numbering")
        .shared();
    let report = Pipeline::new(DossierConfig::default())
        .with_model(model)
        .with_bridge(bridge_over(&transport, &["web", "academic"]))
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;

    let enrichment = &report.state.enrichment;
    assert_eq!(enrichment.len(), 1);
    assert!(!enrichment[0].fallback);
    assert_eq!(enrichment[0].items.len(), 1);
    assert_eq!(enrichment[0].failed_sources().count(), 1);

    let metrics = report.metrics.expect("metrics");
    assert_eq!(metrics.request_count, 2);
    assert_eq!(metrics.outcomes.success, 1);

    let failing = Arc::new(FakeTransport::new().always("web", Reply::server_error()));
    let model = ScriptedModel::new()
        .answer(ModelTask::Topics, "invoice numbering")
        .shared();
    let degraded = Pipeline::new(DossierConfig::default())
        .with_model(model)
        .with_bridge(bridge_over(&failing, &["web"]))
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;

    assert_eq!(degraded.status, RunStatus::Completed);
    assert!(degraded.state.enrichment[0].fallback);
    assert!(degraded.state.feedback.iter().any(|f| f.kind == FeedbackKind::Risk
        && f.message == "no enrichment for topic 'invoice numbering'"));
    Ok(())
}

#[tokio::test]
async fn research_runs_under_each_analysis_session() -> anyhow::Result<()> {
    let transport = Arc::new(FakeTransport::new().always("web", Reply::items(&["hit"])));
    let pipeline =
        Pipeline::new(DossierConfig::default()).with_bridge(bridge_over(&transport, &["web"]));

    let billing = pipeline
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    let billing_calls = transport.total_calls();
    let notes = pipeline
        .analyze("docs/notes.org", UNTAGGED_DOC, SessionOptions::default())
        .await?;
    let notes_calls = transport.total_calls() - billing_calls;

    assert_ne!(billing.session_id, notes.session_id);
    assert!(billing_calls > 0);
    assert!(notes_calls > 0);

    let sent = transport.sessions();
    let (first, second) = sent.split_at(billing_calls);
    assert!(first.iter().all(|s| s == billing.session_id.as_str()));
    assert!(second.iter().all(|s| s == notes.session_id.as_str()));

    let billing_metrics = billing.metrics.expect("billing metrics");
    let notes_metrics = notes.metrics.expect("notes metrics");
    assert_eq!(billing_metrics.session_id, billing.session_id.as_str());
    assert_eq!(notes_metrics.session_id, notes.session_id.as_str());
    assert_eq!(billing_metrics.request_count, billing_calls as u64);
    assert_eq!(notes_metrics.request_count, notes_calls as u64);
    Ok(())
}

#[tokio::test]
async fn invalid_document_is_flagged_by_review() -> anyhow::Result<()> {
    let report = Pipeline::new(offline())
        .analyze("docs/partial.org", INCOMPLETE_DOC, SessionOptions::default())
        .await?;

    let validation = report.validation.as_ref().expect("validation");
    assert!(!validation.is_valid);
    assert!(report.state.feedback.iter().any(|f| f.kind == FeedbackKind::Risk
        && f.message.starts_with("document failed validation")));
    Ok(())
}

#[tokio::test]
async fn step_limit_checkpoint_is_resumed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let limited = offline()
        .with_checkpoint_dir(dir.path())
        .with_run(RunSettings {
            max_steps: 3,
            ..RunSettings::default()
        });

    let first = Pipeline::new(limited)
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    assert_eq!(first.status, RunStatus::StepLimitReached);
    assert_eq!(first.visited, [CATEGORIZE, PRIORITIZE, DEPENDENCIES]);
    assert!(first
        .state
        .errors
        .iter()
        .any(|e| e.message.contains("step limit of 3")));

    // A fresh process over the same checkpoint directory
    let pipeline = Pipeline::new(offline().with_checkpoint_dir(dir.path()));
    let resumed = pipeline
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    assert!(resumed.resumed);
    assert_eq!(resumed.session_id, first.session_id);
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.visited, ONE_PASS);
    assert!(resumed.validation.is_none());
    assert_eq!(resumed.state.moscow.must, vec!["BILL-1"]);

    // Completed sessions start over
    let rerun = pipeline
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    assert!(!rerun.resumed);
    assert_eq!(rerun.visited, ONE_PASS);
    Ok(())
}

#[tokio::test]
async fn force_new_ignores_pending_checkpoint() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = offline().with_checkpoint_dir(dir.path()).with_run(RunSettings {
        max_steps: 2,
        ..RunSettings::default()
    });
    let pipeline = Pipeline::new(config);

    let first = pipeline
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    let fresh = pipeline
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::fresh())
        .await?;

    assert_ne!(fresh.session_id, first.session_id);
    assert!(!fresh.resumed);
    assert_eq!(fresh.visited, [CATEGORIZE, PRIORITIZE]);
    assert_eq!(pipeline.sessions().session_count(), 2);
    Ok(())
}

#[tokio::test]
async fn cancelled_pipeline_stops_before_first_stage() -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let pipeline = Pipeline::new(offline()).with_cancellation(token.clone());
    token.cancel();

    let report = pipeline
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.visited.is_empty());
    Ok(())
}

#[tokio::test]
async fn report_serializes_to_json() -> anyhow::Result<()> {
    let report = Pipeline::new(offline())
        .analyze("docs/billing.org", COMPLIANT_DOC, SessionOptions::default())
        .await?;
    let json = serde_json::to_value(&report)?;
    assert_eq!(json["status"], "Completed");
    assert_eq!(json["state"]["moscow"]["must"][0], "BILL-1");
    Ok(())
}
