//! Read-only progress view derived from research state.

use serde::{Deserialize, Serialize};

use crate::research::{ResearchMode, ResearchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressVisual {
    ProgressBar,
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: usize,
    pub total_steps: usize,
    pub label: String,
    pub visual: ProgressVisual,
    pub tasks: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Project the research state onto a progress record.
///
/// An approved multi-step plan reports its current step (or synthesis once
/// every step ran). A single-shot lookup that produced a result this turn
/// reports a one-of-one completion. Anything else has no progress.
pub fn project(state: &ResearchState) -> Option<Progress> {
    let conflicts = state
        .result
        .as_ref()
        .map(|r| r.conflicts.clone())
        .unwrap_or_default();

    match state.mode {
        ResearchMode::Multi => {
            let run = state.run.as_ref().filter(|run| run.approved && !run.tasks.is_empty())?;
            let total = run.tasks.len();
            let idx = run.current_task_index;
            let label = match run.current_task() {
                Some(task) => format!("Step {}/{}: {}", idx + 1, total, task.task),
                None => "Synthesizing results...".to_string(),
            };
            Some(Progress {
                current_step: idx + 1,
                total_steps: total,
                label,
                visual: ProgressVisual::ProgressBar,
                tasks: run.tasks.iter().map(|t| t.task.clone()).collect(),
                conflicts,
            })
        }
        ResearchMode::Single => {
            let result = state.result.as_ref()?;
            let task = if result.query.is_empty() {
                "Research Task".to_string()
            } else {
                result.query.clone()
            };
            Some(Progress {
                current_step: 1,
                total_steps: 1,
                label: "Research Complete".to_string(),
                visual: ProgressVisual::Check,
                tasks: vec![task],
                conflicts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{ResearchResult, ResearchRun, ResearchTask};

    fn approved_run(tasks: &[&str], index: usize) -> ResearchRun {
        let mut run = ResearchRun::new(tasks.iter().map(|t| ResearchTask::new(*t)).collect());
        run.approved = true;
        run.current_task_index = index;
        run
    }

    #[test]
    fn idle_state_has_no_progress() {
        assert!(project(&ResearchState::default()).is_none());
    }

    #[test]
    fn proposed_plan_has_no_progress() {
        let mut run = approved_run(&["A"], 0);
        run.approved = false;
        let state = ResearchState {
            mode: ResearchMode::Multi,
            run: Some(run),
            ..Default::default()
        };
        assert!(project(&state).is_none());
    }

    #[test]
    fn running_plan_reports_current_step() {
        let state = ResearchState {
            mode: ResearchMode::Multi,
            run: Some(approved_run(&["Revenue", "Competitors", "Risks"], 1)),
            result: Some(ResearchResult {
                conflicts: vec!["Revenue figures disagree".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let progress = project(&state).unwrap();
        assert_eq!(progress.current_step, 2);
        assert_eq!(progress.total_steps, 3);
        assert_eq!(progress.label, "Step 2/3: Competitors");
        assert_eq!(progress.visual, ProgressVisual::ProgressBar);
        assert_eq!(progress.conflicts, ["Revenue figures disagree"]);
    }

    #[test]
    fn finished_plan_reports_synthesis() {
        let state = ResearchState {
            mode: ResearchMode::Multi,
            run: Some(approved_run(&["A", "B"], 2)),
            ..Default::default()
        };
        let progress = project(&state).unwrap();
        assert_eq!(progress.label, "Synthesizing results...");
        assert_eq!(progress.current_step, 3);
    }

    #[test]
    fn single_shot_result_reports_completion() {
        let state = ResearchState {
            mode: ResearchMode::Single,
            result: Some(ResearchResult {
                query: "Nike CEO".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let progress = project(&state).unwrap();
        assert_eq!(progress.label, "Research Complete");
        assert_eq!(progress.visual, ProgressVisual::Check);
        assert_eq!(progress.tasks, ["Nike CEO"]);
    }

    #[test]
    fn projection_is_pure() {
        let state = ResearchState {
            mode: ResearchMode::Multi,
            run: Some(approved_run(&["A", "B"], 0)),
            ..Default::default()
        };
        let before = state.clone();
        assert_eq!(project(&state), project(&state));
        assert_eq!(state, before);
    }
}
