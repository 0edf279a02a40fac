use super::{consult, requirement_listing, SharedModel, DEPENDENCIES};
use crate::model::{parse_edges, ModelTask};
use crate::state::{AnalysisState, AnalysisUpdate, ChangeNote, Dependency};
use dossier_graph::{Stage, StageError, StageOutput};

/// Requirement dependency discovery
///
/// Declared `DEPENDS_ON` ids become edges; references to unknown ids are
/// recorded as recoverable errors. Model-suggested edges are kept when both
/// ends are known requirements.
pub struct DependencyStage {
    model: SharedModel,
}

impl DependencyStage {
    /// Stage using `model` when present
    #[must_use]
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }
}

#[async_trait::async_trait]
impl Stage<AnalysisState> for DependencyStage {
    async fn run(&self, state: &AnalysisState) -> Result<StageOutput<AnalysisUpdate>, StageError> {
        let mut errors = Vec::new();
        let mut edges = Vec::new();

        for requirement in state.requirements.iter() {
            for target in &requirement.depends_on {
                if target == &requirement.id {
                    continue;
                }
                if state.requirement(target).is_some() {
                    edges.push(Dependency::new(requirement.id.as_str(), target.as_str()));
                } else {
                    errors.push(StageError::recoverable(format!(
                        "{} depends on unknown requirement {target}",
                        requirement.id
                    )));
                }
            }
        }
        let declared = edges.len();

        if state.requirements.len() > 1 {
            let prompt = format!(
                "List dependencies between these requirements, one per line as `A -> B` \
                 meaning A depends on B.\n\n{}",
                requirement_listing(state)
            );
            match consult(&self.model, ModelTask::Dependencies, prompt).await {
                Ok(Some(answer)) => edges.extend(
                    parse_edges(&answer)
                        .into_iter()
                        .filter(|(from, to)| {
                            from != to
                                && state.requirement(from).is_some()
                                && state.requirement(to).is_some()
                        })
                        .map(|(from, to)| Dependency::new(from, to)),
                ),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        let summary = format!(
            "found {} dependencies ({declared} declared, {} suggested)",
            edges.len(),
            edges.len() - declared
        );
        Ok(StageOutput::new(AnalysisUpdate {
            dependencies: edges,
            change_log: vec![ChangeNote::new(DEPENDENCIES, summary)],
            ..AnalysisUpdate::default()
        })
        .with_errors(errors))
    }
}
