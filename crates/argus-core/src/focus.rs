use crate::protocol::{AgentInfo, AgentState, AgentType};
use crate::registry::SessionRegistry;
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_FOCUS_DELAY_MS: u64 = 1000;

pub trait WindowManager {
    fn activate(&mut self, session: &str, agent_type: &AgentType);
    fn switch_workspace(&mut self, workspace: u32);
    fn current_workspace(&self) -> Option<u32>;
}

pub trait Renderer {
    fn apply(&mut self, agents: &[AgentInfo]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonConfig {
    pub auto_focus_enabled: bool,
    pub focus_delay_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            auto_focus_enabled: false,
            focus_delay_ms: DEFAULT_FOCUS_DELAY_MS,
        }
    }
}

impl DaemonConfig {
    pub fn focus_delay(&self) -> Duration {
        Duration::from_millis(self.focus_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FocusContext {
    pub original_workspace: Option<u32>,
}

/// A delayed activation handed to the caller, which owns the timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusPlan {
    pub ticket: u64,
    pub session: String,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOrigin {
    /// An explicit `auto_focus` from a UI client.
    Command,
    /// Started by the daemon for the head of the awaiting queue.
    Awaiting,
}

/// Result of re-evaluating the automatic focus policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusStep {
    Unchanged,
    Begin(FocusPlan),
    Returned,
}

#[derive(Debug, Clone)]
struct PendingActivation {
    ticket: u64,
    session: String,
}

#[derive(Debug, Clone)]
struct ActiveFocus {
    context: FocusContext,
    origin: FocusOrigin,
    session: String,
}

#[derive(Debug)]
pub struct FocusOrchestrator {
    config: DaemonConfig,
    active: Option<ActiveFocus>,
    pending: Option<PendingActivation>,
    next_ticket: u64,
    user_idle: bool,
    awaiting: VecDeque<String>,
}

impl FocusOrchestrator {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            active: None,
            pending: None,
            next_ticket: 0,
            user_idle: false,
            awaiting: VecDeque::new(),
        }
    }

    pub fn config(&self) -> DaemonConfig {
        self.config
    }

    pub fn configure(&mut self, enabled: bool, focus_delay_ms: u64) -> DaemonConfig {
        self.config = DaemonConfig {
            auto_focus_enabled: enabled,
            focus_delay_ms,
        };
        self.config
    }

    pub fn context(&self) -> Option<FocusContext> {
        self.active.as_ref().map(|active| active.context)
    }

    pub fn origin(&self) -> Option<FocusOrigin> {
        self.active.as_ref().map(|active| active.origin)
    }

    pub fn pending_ticket(&self) -> Option<u64> {
        self.pending.as_ref().map(|pending| pending.ticket)
    }

    pub fn is_idle(&self) -> bool {
        self.user_idle
    }

    pub fn awaiting_queue(&self) -> impl Iterator<Item = &str> {
        self.awaiting.iter().map(String::as_str)
    }

    /// Opens a focus context for `session`, remembering where the user was.
    /// A newer request replaces any earlier context outright.
    pub fn begin_auto_focus(
        &mut self,
        session: &str,
        registry: &SessionRegistry,
        wm: &dyn WindowManager,
    ) -> Option<FocusPlan> {
        self.begin(session, registry, wm, FocusOrigin::Command)
    }

    fn begin(
        &mut self,
        session: &str,
        registry: &SessionRegistry,
        wm: &dyn WindowManager,
        origin: FocusOrigin,
    ) -> Option<FocusPlan> {
        if !registry.contains(session) {
            return None;
        }

        // chained daemon-initiated focus keeps the workspace the user left
        let original_workspace = match &self.active {
            Some(active)
                if origin == FocusOrigin::Awaiting && active.origin == FocusOrigin::Awaiting =>
            {
                active.context.original_workspace
            }
            _ => wm.current_workspace(),
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.active = Some(ActiveFocus {
            context: FocusContext { original_workspace },
            origin,
            session: session.to_string(),
        });
        self.pending = Some(PendingActivation {
            ticket,
            session: session.to_string(),
        });

        Some(FocusPlan {
            ticket,
            session: session.to_string(),
            delay: self.config.focus_delay(),
        })
    }

    /// Runs a scheduled activation. Stale tickets and sessions removed in
    /// the meantime do nothing.
    pub fn fire(
        &mut self,
        ticket: u64,
        registry: &SessionRegistry,
        wm: &mut dyn WindowManager,
    ) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket && self.active.is_some() => {}
            _ => return false,
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };
        let Some(agent_type) = registry.agent_type_of(&pending.session) else {
            return false;
        };
        wm.activate(&pending.session, &agent_type);
        true
    }

    pub fn return_workspace(&mut self, wm: &mut dyn WindowManager) -> bool {
        self.pending = None;
        let Some(active) = self.active.take() else {
            return false;
        };
        match active.context.original_workspace {
            Some(workspace) => {
                wm.switch_workspace(workspace);
                true
            }
            None => false,
        }
    }

    pub fn set_idle(&mut self, idle: bool) -> bool {
        let changed = self.user_idle != idle;
        self.user_idle = idle;
        changed
    }

    pub fn track_state(&mut self, session: &str, previous: Option<AgentState>, next: AgentState) {
        let was_awaiting = previous == Some(AgentState::Awaiting);
        let is_awaiting = next == AgentState::Awaiting;
        if is_awaiting && !self.awaiting.iter().any(|queued| queued == session) {
            self.awaiting.push_back(session.to_string());
        } else if was_awaiting && !is_awaiting {
            self.forget(session);
        }
    }

    pub fn forget(&mut self, session: &str) {
        self.awaiting.retain(|queued| queued != session);
    }

    pub fn clear(&mut self) {
        self.awaiting.clear();
    }

    /// Applies the automatic policy: focus the oldest awaiting session while
    /// the user is idle, and hand the workspace back once nothing awaits.
    pub fn evaluate(&mut self, registry: &SessionRegistry, wm: &mut dyn WindowManager) -> FocusStep {
        if self.awaiting.is_empty() {
            if self.origin() == Some(FocusOrigin::Awaiting) {
                self.return_workspace(wm);
                return FocusStep::Returned;
            }
            return FocusStep::Unchanged;
        }

        if !self.config.auto_focus_enabled || !self.user_idle {
            return FocusStep::Unchanged;
        }

        let Some(head) = self.awaiting.front().cloned() else {
            return FocusStep::Unchanged;
        };
        let may_take_over = match &self.active {
            None => true,
            Some(active) => active.origin == FocusOrigin::Awaiting && active.session != head,
        };
        if !may_take_over {
            return FocusStep::Unchanged;
        }

        match self.begin(&head, registry, wm, FocusOrigin::Awaiting) {
            Some(plan) => FocusStep::Begin(plan),
            None => {
                self.forget(&head);
                FocusStep::Unchanged
            }
        }
    }
}

impl Default for FocusOrchestrator {
    fn default() -> Self {
        Self::new(DaemonConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingWm {
        workspace: Option<u32>,
        activated: Vec<(String, AgentType)>,
        switched: Vec<u32>,
    }

    impl WindowManager for RecordingWm {
        fn activate(&mut self, session: &str, agent_type: &AgentType) {
            self.activated.push((session.to_string(), agent_type.clone()));
        }

        fn switch_workspace(&mut self, workspace: u32) {
            self.switched.push(workspace);
            self.workspace = Some(workspace);
        }

        fn current_workspace(&self) -> Option<u32> {
            self.workspace
        }
    }

    fn registry_with(sessions: &[(&str, AgentState)]) -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        for (session, state) in sessions {
            registry.upsert(session, *state, None, AgentType::Claude);
        }
        registry
    }

    #[test]
    fn begin_then_fire_then_return() {
        let registry = registry_with(&[("proj#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::default();
        let mut wm = RecordingWm {
            workspace: Some(2),
            ..RecordingWm::default()
        };

        let plan = orchestrator
            .begin_auto_focus("proj#1", &registry, &wm)
            .expect("plan for known session");
        assert_eq!(plan.delay, Duration::from_millis(DEFAULT_FOCUS_DELAY_MS));
        assert_eq!(
            orchestrator.context(),
            Some(FocusContext {
                original_workspace: Some(2)
            })
        );

        assert!(orchestrator.fire(plan.ticket, &registry, &mut wm));
        assert_eq!(wm.activated, vec![("proj#1".to_string(), AgentType::Claude)]);
        assert!(!orchestrator.fire(plan.ticket, &registry, &mut wm));

        assert!(orchestrator.return_workspace(&mut wm));
        assert_eq!(wm.switched, vec![2]);
        assert_eq!(orchestrator.context(), None);
        assert!(!orchestrator.return_workspace(&mut wm));
    }

    #[test]
    fn unknown_session_is_a_no_op() {
        let registry = SessionRegistry::new();
        let mut orchestrator = FocusOrchestrator::default();
        let wm = RecordingWm::default();
        assert_eq!(orchestrator.begin_auto_focus("ghost#1", &registry, &wm), None);
        assert_eq!(orchestrator.context(), None);
    }

    #[test]
    fn return_before_delay_cancels_activation() {
        let registry = registry_with(&[("proj#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::default();
        let mut wm = RecordingWm {
            workspace: Some(1),
            ..RecordingWm::default()
        };

        let plan = orchestrator
            .begin_auto_focus("proj#1", &registry, &wm)
            .expect("plan");
        assert!(orchestrator.return_workspace(&mut wm));
        assert!(!orchestrator.fire(plan.ticket, &registry, &mut wm));
        assert!(wm.activated.is_empty());
        assert_eq!(wm.switched, vec![1]);
    }

    #[test]
    fn second_begin_overwrites_context_and_ticket() {
        let registry = registry_with(&[("a#1", AgentState::Awaiting), ("b#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::default();
        let mut wm = RecordingWm {
            workspace: Some(1),
            ..RecordingWm::default()
        };

        let first = orchestrator.begin_auto_focus("a#1", &registry, &wm).expect("first");
        wm.workspace = Some(4);
        let second = orchestrator.begin_auto_focus("b#1", &registry, &wm).expect("second");

        assert!(!orchestrator.fire(first.ticket, &registry, &mut wm));
        assert!(orchestrator.fire(second.ticket, &registry, &mut wm));
        assert!(orchestrator.return_workspace(&mut wm));
        assert_eq!(wm.switched, vec![4]);
    }

    #[test]
    fn fire_skips_sessions_removed_meanwhile() {
        let mut registry = registry_with(&[("a#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::default();
        let mut wm = RecordingWm::default();
        let plan = orchestrator.begin_auto_focus("a#1", &registry, &wm).expect("plan");
        registry.remove("a#1");
        assert!(!orchestrator.fire(plan.ticket, &registry, &mut wm));
        assert!(wm.activated.is_empty());
    }

    #[test]
    fn return_without_recorded_workspace_only_clears() {
        let registry = registry_with(&[("a#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::default();
        let mut wm = RecordingWm::default();
        orchestrator.begin_auto_focus("a#1", &registry, &wm).expect("plan");
        assert!(!orchestrator.return_workspace(&mut wm));
        assert!(wm.switched.is_empty());
        assert_eq!(orchestrator.context(), None);
    }

    #[test]
    fn awaiting_queue_tracks_transitions() {
        let mut orchestrator = FocusOrchestrator::default();
        orchestrator.track_state("a#1", None, AgentState::Awaiting);
        orchestrator.track_state("b#1", Some(AgentState::Working), AgentState::Awaiting);
        orchestrator.track_state("a#1", Some(AgentState::Awaiting), AgentState::Awaiting);
        assert_eq!(orchestrator.awaiting_queue().collect::<Vec<_>>(), vec!["a#1", "b#1"]);

        orchestrator.track_state("a#1", Some(AgentState::Awaiting), AgentState::Working);
        assert_eq!(orchestrator.awaiting_queue().collect::<Vec<_>>(), vec!["b#1"]);

        orchestrator.forget("b#1");
        assert_eq!(orchestrator.awaiting_queue().count(), 0);
    }

    #[test]
    fn evaluate_waits_for_idle_and_enabled() {
        let registry = registry_with(&[("a#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::default();
        let mut wm = RecordingWm::default();
        orchestrator.track_state("a#1", None, AgentState::Awaiting);

        assert_eq!(orchestrator.evaluate(&registry, &mut wm), FocusStep::Unchanged);
        orchestrator.configure(true, 250);
        assert_eq!(orchestrator.evaluate(&registry, &mut wm), FocusStep::Unchanged);
        assert!(orchestrator.set_idle(true));
        assert!(!orchestrator.set_idle(true));

        let FocusStep::Begin(plan) = orchestrator.evaluate(&registry, &mut wm) else {
            panic!("expected automatic focus")
        };
        assert_eq!(plan.session, "a#1");
        assert_eq!(plan.delay, Duration::from_millis(250));
        assert_eq!(orchestrator.origin(), Some(FocusOrigin::Awaiting));

        // same head again: nothing new to do
        assert_eq!(orchestrator.evaluate(&registry, &mut wm), FocusStep::Unchanged);
    }

    #[test]
    fn draining_queue_returns_to_original_workspace() {
        let registry = registry_with(&[("a#1", AgentState::Awaiting), ("b#1", AgentState::Awaiting)]);
        let mut orchestrator = FocusOrchestrator::new(DaemonConfig {
            auto_focus_enabled: true,
            focus_delay_ms: 0,
        });
        orchestrator.set_idle(true);
        let mut wm = RecordingWm {
            workspace: Some(7),
            ..RecordingWm::default()
        };

        orchestrator.track_state("a#1", None, AgentState::Awaiting);
        orchestrator.track_state("b#1", None, AgentState::Awaiting);
        let FocusStep::Begin(first) = orchestrator.evaluate(&registry, &mut wm) else {
            panic!("expected focus on a#1")
        };
        assert!(orchestrator.fire(first.ticket, &registry, &mut wm));
        wm.workspace = Some(3);

        orchestrator.track_state("a#1", Some(AgentState::Awaiting), AgentState::Working);
        let FocusStep::Begin(second) = orchestrator.evaluate(&registry, &mut wm) else {
            panic!("expected focus on b#1")
        };
        assert_eq!(second.session, "b#1");
        assert_eq!(
            orchestrator.context(),
            Some(FocusContext {
                original_workspace: Some(7)
            })
        );

        orchestrator.track_state("b#1", Some(AgentState::Awaiting), AgentState::Working);
        assert_eq!(orchestrator.evaluate(&registry, &mut wm), FocusStep::Returned);
        assert_eq!(wm.switched, vec![7]);
        assert_eq!(orchestrator.context(), None);
    }

    #[test]
    fn explicit_focus_is_not_taken_over_by_queue() {
        let registry = registry_with(&[("a#1", AgentState::Awaiting), ("b#1", AgentState::Started)]);
        let mut orchestrator = FocusOrchestrator::new(DaemonConfig {
            auto_focus_enabled: true,
            focus_delay_ms: 10,
        });
        orchestrator.set_idle(true);
        let mut wm = RecordingWm::default();

        orchestrator.begin_auto_focus("b#1", &registry, &wm).expect("plan");
        orchestrator.track_state("a#1", None, AgentState::Awaiting);
        assert_eq!(orchestrator.evaluate(&registry, &mut wm), FocusStep::Unchanged);

        orchestrator.clear();
        assert_eq!(orchestrator.evaluate(&registry, &mut wm), FocusStep::Unchanged);
        assert_eq!(orchestrator.origin(), Some(FocusOrigin::Command));
    }
}
