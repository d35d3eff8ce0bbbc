//! Research orchestration state machine.
//!
//! The phase of a session is never stored; it is derived from the flags
//! below on demand:
//!
//! ```text
//! Idle       no proposed or unfinished plan, nothing pending
//! Proposed   a plan exists and has not been approved
//! Running    the plan is approved and has steps left
//! Paused     a step already ran this turn; the turn must return
//! SingleShot a one-off query is waiting to run
//! ```
//!
//! Directive transitions:
//!
//! ```text
//! NONE           -> research not needed
//! PLAN_RESEARCH  -> new run (index 0, no findings, unapproved)   Proposed
//! EXECUTE_PLAN   -> approve; steps == 0: needed                  Running
//!                            steps >= 1: continue after pause    Paused
//! CALL_RESEARCH  -> store query and target, needed               SingleShot
//! ```
//!
//! At most one plan step is executed per pass through the coordinator;
//! a second `EXECUTE_PLAN` in the same turn pauses instead of looping, so
//! a caller observes progress between steps.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PendingResearch, ResearchMode, ResearchResult, ResearchTask, Source};
use crate::contract::{Action, ControlDirective};

/// Externally visible phase, derived from [`ResearchState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Idle,
    Proposed,
    Running,
    Paused,
    SingleShot,
}

/// A multi-step research plan that can be resumed across turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRun {
    pub id: Uuid,
    pub tasks: Vec<ResearchTask>,
    pub current_task_index: usize,
    pub approved: bool,
    #[serde(default)]
    pub findings: Vec<ResearchResult>,
}

impl ResearchRun {
    pub fn new(tasks: Vec<ResearchTask>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tasks,
            current_task_index: 0,
            approved: false,
            findings: Vec::new(),
        }
    }

    /// The step to execute next, or `None` once every task has a finding.
    pub fn resume(&self) -> Option<PendingResearch> {
        (self.current_task_index < self.tasks.len()).then(|| PendingResearch::Step {
            run_id: self.id,
            index: self.current_task_index,
            tasks: self.tasks.clone(),
        })
    }

    /// Store the finding for the current step and advance.
    pub fn record(&mut self, result: ResearchResult) {
        self.findings.push(result);
        self.current_task_index += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.current_task_index >= self.tasks.len()
    }

    pub fn current_task(&self) -> Option<&ResearchTask> {
        self.tasks.get(self.current_task_index)
    }
}

/// Progress summary of a research plan, as shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPlanStatus {
    pub total_tasks: usize,
    pub current_task_index: usize,
    pub completed_tasks: usize,
}

/// Per-session research flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchState {
    pub mode: ResearchMode,
    pub run: Option<ResearchRun>,
    pub query: String,
    pub target_section: Option<String>,
    /// Last completed research output. Cleared at the start of every turn.
    pub result: Option<ResearchResult>,
    pub research_needed: bool,
    pub steps_in_current_turn: u32,
    pub continue_after_pause: bool,
    pub last_action: Action,
}

impl ResearchState {
    /// Reset the per-turn counters before a new inbound message is handled.
    pub fn begin_turn(&mut self) {
        self.steps_in_current_turn = 0;
        self.continue_after_pause = false;
        self.result = None;
    }

    /// Drive the transition for a parsed directive.
    pub fn apply_directive(&mut self, control: &ControlDirective) {
        self.last_action = control.action;
        match control.action {
            Action::None => {
                self.research_needed = false;
            }
            Action::PlanResearch => {
                if !control.research_plan.is_empty() {
                    let run = ResearchRun::new(control.research_plan.clone());
                    tracing::info!(run_id = %run.id, tasks = run.tasks.len(), "research plan proposed");
                    self.run = Some(run);
                    self.mode = ResearchMode::Multi;
                }
                self.research_needed = false;
            }
            Action::ExecutePlan => {
                self.mode = ResearchMode::Multi;
                if let Some(run) = self.run.as_mut() {
                    run.approved = true;
                }
                if self.steps_in_current_turn >= 1 {
                    tracing::debug!(steps = self.steps_in_current_turn, "pausing research plan");
                    self.research_needed = false;
                    self.continue_after_pause = true;
                } else {
                    self.research_needed = true;
                    self.continue_after_pause = false;
                }
            }
            Action::CallResearch => {
                self.mode = ResearchMode::Single;
                self.query = control.research_query.clone();
                self.target_section = control.target_section.clone();
                self.research_needed = true;
            }
        }
    }

    pub fn phase(&self) -> ResearchPhase {
        if self.continue_after_pause {
            return ResearchPhase::Paused;
        }
        if self.research_needed && self.mode == ResearchMode::Single {
            return ResearchPhase::SingleShot;
        }
        match &self.run {
            Some(run) if !run.approved => ResearchPhase::Proposed,
            Some(run) if !run.is_complete() => ResearchPhase::Running,
            _ => ResearchPhase::Idle,
        }
    }

    /// The research to execute now, if any is needed.
    pub fn pending(&self) -> Option<PendingResearch> {
        if !self.research_needed {
            return None;
        }
        match self.mode {
            ResearchMode::Single => Some(PendingResearch::Query {
                query: self.query.clone(),
                target_section: self.target_section.clone(),
            }),
            ResearchMode::Multi => self
                .run
                .as_ref()
                .filter(|run| run.approved)
                .and_then(ResearchRun::resume),
        }
    }

    /// Record the outcome of an executed research step.
    ///
    /// Every execution counts toward the turn's step budget. Only a
    /// successful plan step advances the run.
    pub fn record(&mut self, pending: &PendingResearch, result: ResearchResult) {
        self.steps_in_current_turn += 1;
        self.research_needed = false;

        if let (PendingResearch::Step { run_id, .. }, Some(run)) = (pending, self.run.as_mut()) {
            if *run_id == run.id && !result.is_error() {
                let mut finding = result.clone();
                finding.sources.clear();
                run.record(finding);
            }
        }
        self.result = Some(result);
    }

    /// Remove and return the sources of the current result.
    pub fn take_sources(&mut self) -> Vec<Source> {
        self.result
            .as_mut()
            .map(|r| std::mem::take(&mut r.sources))
            .unwrap_or_default()
    }

    pub fn plan_status(&self) -> Option<ResearchPlanStatus> {
        self.run.as_ref().map(|run| ResearchPlanStatus {
            total_tasks: run.tasks.len(),
            current_task_index: run.current_task_index,
            completed_tasks: run.current_task_index,
        })
    }

    /// The plan awaiting approval, if one exists.
    pub fn proposed_plan(&self) -> Option<&[ResearchTask]> {
        self.run
            .as_ref()
            .filter(|run| !run.approved)
            .map(|run| run.tasks.as_slice())
    }

    /// Whether the caller should report research as still in flight.
    pub fn is_researching(&self) -> bool {
        self.research_needed || self.continue_after_pause
    }
}
