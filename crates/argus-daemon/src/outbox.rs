use argus_core::focus::{Renderer, WindowManager};
use argus_core::protocol::{AgentInfo, AgentType, OutgoingMessage};

/// Collects what the core asks of the window manager and the renderer as
/// wire messages, to be broadcast once the core lock is released.
#[derive(Debug, Default)]
pub struct Outbox {
    current_workspace: Option<u32>,
    messages: Vec<OutgoingMessage>,
}

impl Outbox {
    pub fn new(current_workspace: Option<u32>) -> Self {
        Self {
            current_workspace,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: OutgoingMessage) {
        self.messages.push(message);
    }

    pub fn into_messages(self) -> Vec<OutgoingMessage> {
        self.messages
    }
}

impl WindowManager for Outbox {
    fn activate(&mut self, session: &str, agent_type: &AgentType) {
        self.messages.push(OutgoingMessage::Focus {
            session: session.to_string(),
            agent_type: agent_type.clone(),
        });
    }

    fn switch_workspace(&mut self, workspace: u32) {
        self.current_workspace = Some(workspace);
        self.messages
            .push(OutgoingMessage::SwitchWorkspace { workspace });
    }

    fn current_workspace(&self) -> Option<u32> {
        self.current_workspace
    }
}

impl Renderer for Outbox {
    fn apply(&mut self, agents: &[AgentInfo]) {
        self.messages.push(OutgoingMessage::Render {
            agents: agents.to_vec(),
        });
    }
}
