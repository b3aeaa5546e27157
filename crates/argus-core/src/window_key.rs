use regex::Regex;
use std::sync::OnceLock;

const CURSOR_SUFFIX: &str = "Cursor";
const TITLE_SEPARATOR: &str = " \u{2014} ";

fn argus_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Argus \(([^)]+)\)").expect("valid regex"))
}

fn parenthetical_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S\s*\(([^()]+)\)\s*$").expect("valid regex"))
}

fn pipe_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^|]+?)\s*\|").expect("valid regex"))
}

fn first_capture(re: &Regex, title: &str) -> Option<String> {
    re.captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Cursor editor titles, where the segment before `Cursor` names the project.
fn cursor_project(title: &str) -> Option<String> {
    let segments: Vec<&str> = title.trim().split(TITLE_SEPARATOR).map(str::trim).collect();
    match segments.as_slice() {
        [.., project, last] if *last == CURSOR_SUFFIX => {
            Some(project.to_string()).filter(|project| !project.is_empty())
        }
        _ => None,
    }
}

/// Pulls the session key (or group name) out of a window title. The first
/// matching pattern wins; titles that carry no key give `None`.
pub fn extract_session_key(title: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    first_capture(argus_marker(), title)
        .or_else(|| first_capture(parenthetical_suffix(), title))
        .or_else(|| first_capture(pipe_prefix(), title))
        .or_else(|| cursor_project(title))
}
