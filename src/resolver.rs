//! Selector resolution: logical target name to a live element handle.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::driver::{ActionDriver, ElementHandle, ElementState};
use crate::error::StepError;
use crate::locator::Locator;
use crate::model::TargetState;

pub const DEFAULT_RESOLVE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What happened when one candidate was queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    NoMatch,
    Hidden,
    Disabled,
    QueryFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub round: u32,
    pub locator: String,
    pub matched: usize,
    pub verdict: Verdict,
}

/// Every candidate query made while resolving one target, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionTrace {
    pub attempts: Vec<Attempt>,
}

impl ResolutionTrace {
    fn record(&mut self, round: u32, locator: &Locator, matched: usize, verdict: Verdict) {
        debug!(
            "resolve round {} {} -> {} match(es), {:?}",
            round, locator, matched, verdict
        );
        self.attempts.push(Attempt {
            round,
            locator: locator.to_string(),
            matched,
            verdict,
        });
    }

    pub fn rounds(&self) -> u32 {
        self.attempts.last().map_or(0, |a| a.round)
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub handle: ElementHandle,
    pub locator: Locator,
    pub trace: ResolutionTrace,
}

#[derive(Debug, Clone)]
pub struct SelectorResolver {
    window: Duration,
    poll: Duration,
}

impl Default for SelectorResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_WINDOW, DEFAULT_POLL_INTERVAL)
    }
}

impl SelectorResolver {
    pub fn new(window: Duration, poll: Duration) -> Self {
        Self { window, poll }
    }

    /// Resolve `target` to the first attached, visible, enabled element
    /// across `candidates`, tried in declaration order.
    ///
    /// Polls until the resolve window closes. If the last round only
    /// found visible-but-disabled elements, fails with
    /// `ElementNotInteractable`; otherwise with `TargetNotResolved`.
    pub async fn resolve(
        &self,
        driver: &ActionDriver,
        target: &str,
        candidates: &[Locator],
    ) -> Result<Resolution, StepError> {
        if candidates.is_empty() {
            return Err(not_resolved(target, candidates));
        }

        let started = Instant::now();
        let mut trace = ResolutionTrace::default();
        let mut round = 0u32;

        loop {
            round += 1;
            let mut disabled_seen = false;

            for locator in candidates {
                let states = match driver.query(locator).await {
                    Ok(states) => states,
                    Err(e) => {
                        trace.record(round, locator, 0, Verdict::QueryFailed(format!("{e:#}")));
                        continue;
                    }
                };

                if let Some(found) = states.iter().find(|s| s.visible && !s.disabled) {
                    trace.record(round, locator, states.len(), Verdict::Accepted);
                    let handle = ElementHandle {
                        id: found.handle.id.clone(),
                        description: format!("{target} ({locator})"),
                    };
                    return Ok(Resolution {
                        handle,
                        locator: locator.clone(),
                        trace,
                    });
                }

                let verdict = if states.is_empty() {
                    Verdict::NoMatch
                } else if states.iter().any(|s| s.visible && s.disabled) {
                    disabled_seen = true;
                    Verdict::Disabled
                } else {
                    Verdict::Hidden
                };
                trace.record(round, locator, states.len(), verdict);
            }

            if started.elapsed() + self.poll > self.window {
                if disabled_seen {
                    return Err(StepError::ElementNotInteractable {
                        target: target.to_string(),
                        reason: "disabled".to_string(),
                    });
                }
                return Err(not_resolved(target, candidates));
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Poll until `target` reaches `state`.
    ///
    /// Unbounded on its own; the runner's step deadline ends the wait.
    pub async fn wait_for(
        &self,
        driver: &ActionDriver,
        target: &str,
        candidates: &[Locator],
        state: TargetState,
    ) -> Result<(), StepError> {
        if candidates.is_empty() {
            return Err(not_resolved(target, candidates));
        }

        loop {
            let mut snapshot: Vec<ElementState> = Vec::new();
            let mut complete = true;
            for locator in candidates {
                match driver.query(locator).await {
                    Ok(states) => snapshot.extend(states),
                    Err(e) => {
                        debug!("wait_for {} query {} failed: {:#}", target, locator, e);
                        complete = false;
                    }
                }
            }

            if complete && state_holds(state, &snapshot) {
                debug!("Target {} reached state {}", target, state);
                return Ok(());
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

fn state_holds(state: TargetState, elements: &[ElementState]) -> bool {
    match state {
        TargetState::Visible => elements.iter().any(|e| e.visible),
        TargetState::Hidden => !elements.iter().any(|e| e.visible),
        TargetState::Attached => !elements.is_empty(),
        TargetState::Detached => elements.is_empty(),
        TargetState::Enabled => elements.iter().any(|e| e.visible && !e.disabled),
    }
}

fn not_resolved(target: &str, candidates: &[Locator]) -> StepError {
    StepError::TargetNotResolved {
        target: target.to_string(),
        candidates_tried: candidates.iter().map(ToString::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(visible: bool, disabled: bool) -> ElementState {
        ElementState {
            handle: ElementHandle {
                id: "1".into(),
                description: "x".into(),
            },
            visible,
            disabled,
        }
    }

    #[test]
    fn state_predicates() {
        let shown = [element(true, false)];
        let disabled = [element(true, true)];
        let hidden = [element(false, false)];

        assert!(state_holds(TargetState::Visible, &shown));
        assert!(state_holds(TargetState::Visible, &disabled));
        assert!(!state_holds(TargetState::Visible, &hidden));

        assert!(state_holds(TargetState::Hidden, &hidden));
        assert!(state_holds(TargetState::Hidden, &[]));

        assert!(state_holds(TargetState::Attached, &hidden));
        assert!(!state_holds(TargetState::Detached, &hidden));
        assert!(state_holds(TargetState::Detached, &[]));

        assert!(state_holds(TargetState::Enabled, &shown));
        assert!(!state_holds(TargetState::Enabled, &disabled));
    }

    #[test]
    fn empty_candidate_list_is_not_resolved() {
        let err = not_resolved("ghost", &[]);
        assert_eq!(
            err,
            StepError::TargetNotResolved {
                target: "ghost".into(),
                candidates_tried: vec![],
            }
        );
    }
}
