use crate::outbox::Outbox;
use argus_core::focus::{DaemonConfig, FocusOrchestrator, FocusPlan, FocusStep, Renderer};
use argus_core::protocol::{IncomingMessage, OutgoingMessage};
use argus_core::registry::{group_of, SessionRegistry};
use argus_core::window_key::extract_session_key;
use tracing::debug;

/// Everything behind the daemon's single writer lock.
#[derive(Debug)]
pub struct DaemonCore {
    pub registry: SessionRegistry,
    pub focus: FocusOrchestrator,
}

impl DaemonCore {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            focus: FocusOrchestrator::new(config),
        }
    }
}

#[derive(Debug, Default)]
pub struct Effects {
    /// Sent only to the connection the message came from.
    pub replies: Vec<OutgoingMessage>,
    /// Sent to every connection that receives broadcasts.
    pub broadcasts: Vec<OutgoingMessage>,
    pub schedule: Option<FocusPlan>,
    pub cancel_pending: bool,
}

impl Effects {
    fn apply_step(&mut self, step: FocusStep) {
        match step {
            FocusStep::Begin(plan) => self.schedule = Some(plan),
            FocusStep::Returned => self.cancel_pending = true,
            FocusStep::Unchanged => {}
        }
    }
}

pub fn config_message(config: DaemonConfig) -> OutgoingMessage {
    OutgoingMessage::AutoFocusConfig {
        enabled: config.auto_focus_enabled,
        focus_delay_ms: config.focus_delay_ms,
    }
}

pub fn process(core: &mut DaemonCore, message: IncomingMessage) -> Effects {
    let mut effects = Effects::default();
    let mut outbox = Outbox::new(core.registry.focused_workspace());
    let DaemonCore { registry, focus } = core;

    match message {
        IncomingMessage::State {
            session,
            state,
            tool,
            agent_type,
        } => {
            let previous = registry.state_of(&session);
            let snapshot = registry.upsert(&session, state, tool.as_deref(), agent_type);
            outbox.apply(&snapshot);
            focus.track_state(&session, previous, state);
            effects.apply_step(focus.evaluate(registry, &mut outbox));
        }
        IncomingMessage::WindowFocus { title, .. } => {
            let key = extract_session_key(&title).or_else(|| registry.resolve(&title));
            debug!(
                event = "argus_window_focus",
                title = %title,
                key = key.as_deref().unwrap_or_default()
            );
            if registry.focus_window(key.as_deref()) {
                outbox.apply(&registry.snapshot());
            }
        }
        IncomingMessage::SessionWorkspace {
            session,
            workspace,
            monitor,
        } => {
            if registry.set_placement(&session, workspace, monitor) {
                outbox.apply(&registry.snapshot());
            } else {
                debug!(
                    event = "argus_placement_recorded",
                    group = group_of(&session),
                    workspace,
                    monitor
                );
            }
        }
        IncomingMessage::WindowClosed { session } => {
            if registry.remove(&session) {
                outbox.apply(&registry.snapshot());
                focus.forget(&session);
                effects.apply_step(focus.evaluate(registry, &mut outbox));
            }
        }
        IncomingMessage::Click { session } => match registry.agent_type_of(&session) {
            Some(agent_type) => effects
                .replies
                .push(OutgoingMessage::Focus { session, agent_type }),
            None => debug!(event = "argus_unknown_session", op = "click", session = %session),
        },
        IncomingMessage::FocusNext => {
            if let Some(session) = registry.next_focus_target() {
                let agent_type = registry.agent_type_of(&session).unwrap_or_default();
                effects
                    .replies
                    .push(OutgoingMessage::Focus { session, agent_type });
            }
        }
        IncomingMessage::ClearAgents => {
            registry.clear();
            focus.clear();
            outbox.apply(&registry.snapshot());
            effects.apply_step(focus.evaluate(registry, &mut outbox));
        }
        IncomingMessage::MarkAllStarted => {
            registry.mark_all_started();
            focus.clear();
            outbox.apply(&registry.snapshot());
            effects.apply_step(focus.evaluate(registry, &mut outbox));
        }
        IncomingMessage::AutoFocus { session } => {
            match focus.begin_auto_focus(&session, registry, &outbox) {
                Some(plan) => effects.schedule = Some(plan),
                None => debug!(event = "argus_unknown_session", op = "auto_focus", session = %session),
            }
        }
        IncomingMessage::ReturnWorkspace => {
            focus.return_workspace(&mut outbox);
            effects.cancel_pending = true;
        }
        IncomingMessage::AutoFocusConfig {
            enabled,
            focus_delay_ms,
        } => {
            let config = focus.configure(enabled, focus_delay_ms);
            outbox.push(config_message(config));
            effects.apply_step(focus.evaluate(registry, &mut outbox));
        }
        IncomingMessage::IdleStatus { idle } => {
            focus.set_idle(idle);
            outbox.push(OutgoingMessage::IdleStatus { idle });
            effects.apply_step(focus.evaluate(registry, &mut outbox));
        }
    }

    effects.broadcasts = outbox.into_messages();
    effects
}

/// Runs a delayed activation once its timer elapses.
pub fn fire_focus(core: &mut DaemonCore, ticket: u64) -> Vec<OutgoingMessage> {
    let mut outbox = Outbox::new(core.registry.focused_workspace());
    let DaemonCore { registry, focus } = core;
    focus.fire(ticket, registry, &mut outbox);
    outbox.into_messages()
}
