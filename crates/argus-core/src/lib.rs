pub mod focus;
pub mod protocol;
pub mod registry;
pub mod window_key;

pub use focus::{DaemonConfig, FocusContext, FocusOrchestrator, FocusPlan, FocusStep, Renderer, WindowManager};
pub use protocol::{AgentInfo, AgentState, AgentType, FrameError, IncomingMessage, OutgoingMessage};
pub use registry::{AgentSession, Placement, SessionRegistry};
pub use window_key::extract_session_key;
