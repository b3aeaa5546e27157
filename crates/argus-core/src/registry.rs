use crate::protocol::{AgentInfo, AgentState, AgentType};
use std::collections::HashMap;

pub const GROUP_SEPARATOR: char = '#';

/// Priority tiers walked by `next_focus_target`, most urgent first.
pub const FOCUS_PRIORITIES: &[AgentState] = &[
    AgentState::Awaiting,
    AgentState::Completed,
    AgentState::Started,
];

pub fn group_of(session: &str) -> &str {
    session
        .split_once(GROUP_SEPARATOR)
        .map(|(group, _)| group)
        .unwrap_or(session)
}

/// A key naming a bare group (no separator) matches every session in it.
fn target_matches(target: &str, session: &str) -> bool {
    session == target || (!target.contains(GROUP_SEPARATOR) && group_of(session) == target)
}

fn normalize_tool(state: AgentState, tool: Option<&str>) -> Option<String> {
    if state != AgentState::Working {
        return None;
    }
    tool.map(str::trim)
        .filter(|tool| !tool.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    pub session: String,
    pub state: AgentState,
    pub agent_type: AgentType,
    pub tool: Option<String>,
    pub focused: bool,
}

impl AgentSession {
    fn new(session: &str, state: AgentState, tool: Option<String>, agent_type: AgentType) -> Self {
        Self {
            session: session.to_string(),
            state,
            agent_type,
            tool,
            focused: false,
        }
    }

    pub fn group(&self) -> &str {
        group_of(&self.session)
    }
}

/// Last known window placement, kept per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub workspace: u32,
    pub monitor: u32,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, AgentSession>,
    placements: HashMap<String, Placement>,
    focus_cursor: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session: &str) -> bool {
        self.sessions.contains_key(session)
    }

    pub fn get(&self, session: &str) -> Option<&AgentSession> {
        self.sessions.get(session)
    }

    pub fn state_of(&self, session: &str) -> Option<AgentState> {
        self.sessions.get(session).map(|entry| entry.state)
    }

    pub fn agent_type_of(&self, session: &str) -> Option<AgentType> {
        self.sessions
            .get(session)
            .map(|entry| entry.agent_type.clone())
    }

    /// Records the latest reported state for a session and returns the
    /// resulting snapshot. Focus and placement survive updates.
    pub fn upsert(
        &mut self,
        session: &str,
        state: AgentState,
        tool: Option<&str>,
        agent_type: AgentType,
    ) -> Vec<AgentInfo> {
        let tool = normalize_tool(state, tool);
        match self.sessions.get_mut(session) {
            Some(entry) => {
                entry.state = state;
                entry.tool = tool;
                entry.agent_type = agent_type;
            }
            None => {
                self.sessions.insert(
                    session.to_string(),
                    AgentSession::new(session, state, tool, agent_type),
                );
            }
        }
        self.snapshot()
    }

    pub fn set_focus(&mut self, target: &str, focused: bool) -> bool {
        let mut changed = false;
        for entry in self
            .sessions
            .values_mut()
            .filter(|entry| target_matches(target, &entry.session))
        {
            if entry.focused != focused {
                entry.focused = focused;
                changed = true;
            }
        }
        changed
    }

    /// Marks exactly the sessions matching `key` as focused and clears the
    /// flag everywhere else. Completed sessions the user looks at go back to
    /// started.
    pub fn focus_window(&mut self, key: Option<&str>) -> bool {
        let mut changed = false;
        for entry in self.sessions.values_mut() {
            let focused = key.is_some_and(|key| target_matches(key, &entry.session));
            if entry.focused != focused {
                entry.focused = focused;
                changed = true;
            }
            if focused && entry.state == AgentState::Completed {
                entry.state = AgentState::Started;
                changed = true;
            }
        }
        changed
    }

    pub fn placement_of(&self, session: &str) -> Option<Placement> {
        self.placements.get(group_of(session)).copied()
    }

    /// Records where a group's window sits. The placement also applies to
    /// sessions of that group that report in later. Returns whether any
    /// tracked session moved.
    pub fn set_placement(&mut self, target: &str, workspace: u32, monitor: u32) -> bool {
        let group = group_of(target.trim());
        if group.is_empty() {
            return false;
        }
        let placement = Placement { workspace, monitor };
        let previous = self.placements.insert(group.to_string(), placement);
        previous != Some(placement)
            && self
                .sessions
                .keys()
                .any(|session| group_of(session) == group)
    }

    pub fn remove(&mut self, session: &str) -> bool {
        self.sessions.remove(session).is_some()
    }

    pub fn clear(&mut self) -> bool {
        let had_sessions = !self.sessions.is_empty();
        self.sessions.clear();
        self.placements.clear();
        self.focus_cursor = 0;
        had_sessions
    }

    pub fn mark_all_started(&mut self) -> bool {
        let mut changed = false;
        for entry in self
            .sessions
            .values_mut()
            .filter(|entry| !entry.state.is_terminal())
        {
            if entry.state != AgentState::Started || entry.tool.is_some() {
                entry.state = AgentState::Started;
                entry.tool = None;
                changed = true;
            }
        }
        changed
    }

    /// Maps a window key or bare group name onto something this registry
    /// tracks, without guessing.
    pub fn resolve(&self, key: &str) -> Option<String> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        if self.sessions.contains_key(key) {
            return Some(key.to_string());
        }
        self.sessions
            .values()
            .any(|entry| target_matches(key, &entry.session))
            .then(|| key.to_string())
    }

    pub fn focused_workspace(&self) -> Option<u32> {
        self.ordered()
            .into_iter()
            .filter(|entry| entry.focused)
            .find_map(|entry| self.placement_of(&entry.session))
            .map(|placement| placement.workspace)
    }

    /// Picks the next session to jump to. Each priority tier is walked
    /// round-robin in display order.
    pub fn next_focus_target(&mut self) -> Option<String> {
        for tier in FOCUS_PRIORITIES {
            let candidates: Vec<String> = self
                .ordered()
                .into_iter()
                .filter(|entry| entry.state == *tier)
                .map(|entry| entry.session.clone())
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let pick = self.focus_cursor % candidates.len();
            self.focus_cursor = self.focus_cursor.wrapping_add(1);
            return candidates.into_iter().nth(pick);
        }
        None
    }

    pub fn snapshot(&self) -> Vec<AgentInfo> {
        let mut group_index = 0u32;
        let mut previous_group: Option<&str> = None;
        let mut agents = Vec::with_capacity(self.sessions.len());

        for entry in self.ordered() {
            let group = entry.group();
            let placement = self.placement_of(&entry.session);
            match previous_group {
                Some(prev) if prev != group => group_index += 1,
                _ => {}
            }
            previous_group = Some(group);

            agents.push(AgentInfo {
                session: entry.session.clone(),
                group: group.to_string(),
                group_index,
                state: entry.state,
                agent_type: entry.agent_type.clone(),
                tool: entry.tool.clone(),
                focused: entry.focused,
                workspace: placement.map(|placement| placement.workspace),
                monitor: placement.map(|placement| placement.monitor),
            });
        }

        agents
    }

    fn ordered(&self) -> Vec<&AgentSession> {
        let mut entries: Vec<&AgentSession> = self.sessions.values().collect();
        entries.sort_by_cached_key(|entry| {
            let placement = self.placement_of(&entry.session);
            (
                placement.map_or(u32::MAX, |placement| placement.workspace),
                placement.map_or(0, |placement| placement.monitor),
                entry.session.clone(),
            )
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(sessions: &[(&str, AgentState)]) -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        for (session, state) in sessions {
            registry.upsert(session, *state, None, AgentType::Claude);
        }
        registry
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let mut registry = SessionRegistry::new();
        registry.upsert("proj#1", AgentState::Working, Some("Edit"), AgentType::Claude);
        let snapshot = registry.upsert("proj#1", AgentState::Awaiting, Some("Edit"), AgentType::Claude);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, AgentState::Awaiting);
        assert_eq!(snapshot[0].tool, None);
        assert_eq!(snapshot[0].group, "proj");
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let first = registry.upsert("proj#1", AgentState::Working, Some(" Bash "), AgentType::Cursor);
        let second = registry.upsert("proj#1", AgentState::Working, Some(" Bash "), AgentType::Cursor);
        assert_eq!(first, second);
        assert_eq!(first[0].tool.as_deref(), Some("Bash"));
    }

    #[test]
    fn upsert_preserves_focus_and_placement() {
        let mut registry = registry_with(&[("proj#1", AgentState::Started)]);
        assert!(registry.set_placement("proj#1", 3, 1));
        assert!(registry.set_focus("proj#1", true));

        let snapshot = registry.upsert("proj#1", AgentState::Working, Some("Read"), AgentType::Claude);
        assert!(snapshot[0].focused);
        assert_eq!(snapshot[0].workspace, Some(3));
        assert_eq!(snapshot[0].monitor, Some(1));
    }

    #[test]
    fn focus_window_is_exclusive() {
        let mut registry = registry_with(&[
            ("alpha#1", AgentState::Started),
            ("beta#1", AgentState::Started),
        ]);
        assert!(registry.focus_window(Some("alpha#1")));
        assert!(registry.focus_window(Some("beta#1")));

        let focused: Vec<_> = registry
            .snapshot()
            .into_iter()
            .filter(|agent| agent.focused)
            .map(|agent| agent.session)
            .collect();
        assert_eq!(focused, vec!["beta#1".to_string()]);

        assert!(registry.focus_window(None));
        assert!(registry.snapshot().iter().all(|agent| !agent.focused));
        assert!(!registry.focus_window(None));
    }

    #[test]
    fn focusing_a_group_clears_completed() {
        let mut registry = registry_with(&[
            ("proj#1", AgentState::Completed),
            ("proj#2", AgentState::Awaiting),
            ("other#1", AgentState::Completed),
        ]);
        assert!(registry.focus_window(Some("proj")));

        assert_eq!(registry.state_of("proj#1"), Some(AgentState::Started));
        assert_eq!(registry.state_of("proj#2"), Some(AgentState::Awaiting));
        assert_eq!(registry.state_of("other#1"), Some(AgentState::Completed));
        assert_eq!(registry.get("proj#2").map(|entry| entry.focused), Some(true));
    }

    #[test]
    fn placement_by_group_covers_every_session() {
        let mut registry = registry_with(&[
            ("proj#1", AgentState::Started),
            ("proj#2", AgentState::Started),
        ]);
        assert!(registry.set_placement("proj", 4, 0));
        assert!(!registry.set_placement("missing", 1, 0));
        assert!(registry
            .snapshot()
            .iter()
            .all(|agent| agent.workspace == Some(4) && agent.monitor == Some(0)));
    }

    #[test]
    fn session_joining_a_placed_group_inherits_placement() {
        let mut registry = registry_with(&[
            ("proj#c-1", AgentState::Started),
            ("other#1", AgentState::Started),
        ]);
        registry.set_placement("proj", 1, 0);
        registry.set_placement("other", 2, 0);

        let snapshot = registry.upsert("proj#c-2", AgentState::Working, None, AgentType::Cursor);
        let rows: Vec<_> = snapshot
            .iter()
            .map(|agent| (agent.session.as_str(), agent.group_index, agent.workspace))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("proj#c-1", 0, Some(1)),
                ("proj#c-2", 0, Some(1)),
                ("other#1", 1, Some(2)),
            ]
        );
    }

    #[test]
    fn placement_reported_before_first_state_is_kept() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.set_placement("late", 0, 1));
        assert!(registry.is_empty());

        let snapshot = registry.upsert("late#1", AgentState::Started, None, AgentType::Claude);
        assert_eq!(snapshot[0].workspace, Some(0));
        assert_eq!(snapshot[0].monitor, Some(1));
        assert_eq!(
            registry.placement_of("late#1"),
            Some(Placement {
                workspace: 0,
                monitor: 1
            })
        );

        assert!(!registry.set_placement("late", 0, 1));
        registry.clear();
        assert_eq!(registry.placement_of("late#1"), None);
    }

    #[test]
    fn snapshot_orders_by_placement_then_session() {
        let mut registry = registry_with(&[
            ("zeta#1", AgentState::Started),
            ("beta#2", AgentState::Started),
            ("beta#1", AgentState::Started),
            ("alpha#1", AgentState::Started),
        ]);
        registry.set_placement("zeta", 1, 0);
        registry.set_placement("beta", 2, 0);

        let snapshot = registry.snapshot();
        let order: Vec<_> = snapshot.iter().map(|agent| agent.session.as_str()).collect();
        assert_eq!(order, vec!["zeta#1", "beta#1", "beta#2", "alpha#1"]);

        let indices: Vec<_> = snapshot.iter().map(|agent| agent.group_index).collect();
        assert_eq!(indices, vec![0, 1, 1, 2]);
    }

    #[test]
    fn mark_all_started_leaves_ended_alone() {
        let mut registry = SessionRegistry::new();
        registry.upsert("a#1", AgentState::Working, Some("Edit"), AgentType::Claude);
        registry.upsert("b#1", AgentState::Awaiting, None, AgentType::Claude);
        registry.upsert("c#1", AgentState::Ended, None, AgentType::Claude);

        assert!(registry.mark_all_started());
        assert_eq!(registry.state_of("a#1"), Some(AgentState::Started));
        assert_eq!(registry.get("a#1").and_then(|entry| entry.tool.clone()), None);
        assert_eq!(registry.state_of("b#1"), Some(AgentState::Started));
        assert_eq!(registry.state_of("c#1"), Some(AgentState::Ended));
        assert!(!registry.mark_all_started());
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = registry_with(&[("a#1", AgentState::Started), ("b#1", AgentState::Started)]);
        assert!(registry.remove("a#1"));
        assert!(!registry.remove("a#1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.clear());
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
        assert!(!registry.clear());
    }

    #[test]
    fn resolve_does_not_guess() {
        let registry = registry_with(&[("proj#1", AgentState::Started)]);
        assert_eq!(registry.resolve("proj#1"), Some("proj#1".to_string()));
        assert_eq!(registry.resolve("proj"), Some("proj".to_string()));
        assert_eq!(registry.resolve("pro"), None);
        assert_eq!(registry.resolve("proj#2"), None);
        assert_eq!(registry.resolve("  "), None);
    }

    #[test]
    fn next_focus_target_prefers_awaiting_and_rotates() {
        let mut registry = registry_with(&[
            ("a#1", AgentState::Started),
            ("b#1", AgentState::Awaiting),
            ("c#1", AgentState::Awaiting),
        ]);
        let first = registry.next_focus_target();
        let second = registry.next_focus_target();
        let third = registry.next_focus_target();
        assert_eq!(first.as_deref(), Some("b#1"));
        assert_eq!(second.as_deref(), Some("c#1"));
        assert_eq!(third.as_deref(), Some("b#1"));

        registry.mark_all_started();
        assert!(registry.next_focus_target().is_some());

        let mut ended_only = registry_with(&[("x#1", AgentState::Ended), ("y#1", AgentState::Working)]);
        assert_eq!(ended_only.next_focus_target(), None);
    }

    #[test]
    fn focused_workspace_follows_focused_session() {
        let mut registry = registry_with(&[("a#1", AgentState::Started), ("b#1", AgentState::Started)]);
        registry.set_placement("a", 2, 0);
        registry.set_placement("b", 5, 1);
        assert_eq!(registry.focused_workspace(), None);
        registry.focus_window(Some("b#1"));
        assert_eq!(registry.focused_workspace(), Some(5));
    }
}
