use super::{consult, requirement_listing, SharedModel, REVIEW};
use crate::model::{parse_list, ModelTask};
use crate::state::{
    AnalysisState, AnalysisUpdate, ChangeNote, Feedback, FeedbackKind, Priority, Verdict,
};
use dossier_graph::{RouteLabel, Stage, StageError, StageOutput};

/// Where review sends the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewRoute {
    /// Back to categorization
    Refine,
    /// End of the run
    Finish,
}

impl RouteLabel for ReviewRoute {
    fn all() -> &'static [Self] {
        &[Self::Refine, Self::Finish]
    }
}

impl ReviewRoute {
    /// Route for the merged state, allowing at most `max_passes` refinements
    #[must_use]
    pub fn decide(state: &AnalysisState, max_passes: u32) -> Self {
        if *state.verdict.get() == Some(Verdict::Refine) && *state.refinement_passes.get() <= max_passes
        {
            Self::Refine
        } else {
            Self::Finish
        }
    }
}

/// Quality review
///
/// Heuristic findings are always produced. A model answer starting with
/// `APPROVE` or `REFINE` decides the verdict and its remaining lines become
/// feedback; otherwise any gap finding requests refinement.
pub struct ReviewStage {
    model: SharedModel,
    max_passes: u32,
}

impl ReviewStage {
    /// Stage using `model` when present
    #[must_use]
    pub fn new(model: SharedModel, max_passes: u32) -> Self {
        Self { model, max_passes }
    }
}

fn findings(state: &AnalysisState) -> Vec<(FeedbackKind, String)> {
    let mut out = Vec::new();

    let uncategorized: Vec<&str> = state
        .requirements
        .iter()
        .filter(|r| state.moscow.priority_of(&r.id).is_none())
        .map(|r| r.id.as_str())
        .collect();
    if !uncategorized.is_empty() {
        out.push((
            FeedbackKind::Gap,
            format!("requirements without a priority: {}", uncategorized.join(", ")),
        ));
    }
    if !state.requirements.is_empty() && state.moscow.must.is_empty() {
        out.push((FeedbackKind::Gap, "no must-have requirements".to_string()));
    }

    for dep in state.dependencies.iter() {
        let from = state.moscow.priority_of(&dep.from);
        let to = state.moscow.priority_of(&dep.to);
        if from == Some(Priority::Must) && matches!(to, Some(Priority::Could | Priority::Wont)) {
            out.push((
                FeedbackKind::Risk,
                format!("must-have {} depends on lower-priority {}", dep.from, dep.to),
            ));
        }
    }

    for research in state.enrichment.iter().filter(|r| r.fallback) {
        out.push((
            FeedbackKind::Risk,
            format!("no enrichment for topic '{}'", research.topic),
        ));
    }

    let open = state.questions.iter().filter(|q| q.is_open()).count();
    if open > 0 {
        out.push((FeedbackKind::Note, format!("{open} open questions")));
    }
    if let Some(validation) = state.validation.get() {
        if !validation.is_valid {
            out.push((
                FeedbackKind::Risk,
                format!(
                    "document failed validation ({} errors, score {})",
                    validation.errors, validation.score
                ),
            ));
        }
    }
    out
}

fn parse_review(answer: &str) -> Option<(Verdict, Vec<String>)> {
    let mut lines = parse_list(answer).into_iter();
    let head = lines.next()?;
    let word = head.split_whitespace().next()?.trim_end_matches([':', '.']).to_ascii_uppercase();
    let verdict = match word.as_str() {
        "APPROVE" | "APPROVED" => Verdict::Approve,
        "REFINE" => Verdict::Refine,
        _ => return None,
    };
    Some((verdict, lines.collect()))
}

#[async_trait::async_trait]
impl Stage<AnalysisState> for ReviewStage {
    async fn run(&self, state: &AnalysisState) -> Result<StageOutput<AnalysisUpdate>, StageError> {
        let pass = *state.refinement_passes.get() + 1;
        let mut found = findings(state);

        let prompt = format!(
            "Review this requirement analysis. Answer APPROVE or REFINE on the first line, \
             then one issue per line.\n\n{}\nFindings so far:\n{}",
            requirement_listing(state),
            found
                .iter()
                .map(|(_, m)| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let (model_verdict, error) = match consult(&self.model, ModelTask::Review, prompt).await {
            Ok(Some(answer)) => match parse_review(&answer) {
                Some((verdict, issues)) => {
                    let kind = match verdict {
                        Verdict::Refine => FeedbackKind::Gap,
                        Verdict::Approve => FeedbackKind::Note,
                    };
                    found.extend(issues.into_iter().map(|m| (kind, m)));
                    (Some(verdict), None)
                }
                None => (
                    None,
                    Some(StageError::recoverable(
                        "review answer lacked APPROVE/REFINE; heuristics used",
                    )),
                ),
            },
            Ok(None) => (None, None),
            Err(e) => (None, Some(e)),
        };

        let verdict = model_verdict.unwrap_or_else(|| {
            if found.iter().any(|(k, _)| *k == FeedbackKind::Gap) {
                Verdict::Refine
            } else {
                Verdict::Approve
            }
        });

        let mut feedback: Vec<Feedback> = found
            .into_iter()
            .map(|(kind, message)| Feedback { pass, kind, message })
            .collect();
        if verdict == Verdict::Refine && pass > self.max_passes {
            feedback.push(Feedback {
                pass,
                kind: FeedbackKind::Note,
                message: format!("refinement limit of {} passes reached", self.max_passes),
            });
        }

        tracing::info!(pass, verdict = ?verdict, findings = feedback.len(), "review finished");
        let summary = format!("pass {pass}: {verdict:?} with {} findings", feedback.len());
        Ok(StageOutput::new(AnalysisUpdate {
            feedback,
            refinement_passes: Some(pass),
            verdict: Some(Some(verdict)),
            change_log: vec![ChangeNote::new(REVIEW, summary)],
            ..AnalysisUpdate::default()
        })
        .with_errors(error))
    }
}
