use regex::Regex;

/// Completion markers an agent can emit to end the orchestration loop
const COMPLETION_MARKERS: [&str; 2] = ["[COMPLETE]", "[DONE]"];

/// Routing decision extracted from one cleaned reply
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// Completion marker found; `final_result` is what to present
    Complete { final_result: String },
    /// `@<agent>: <task>` delegation request
    Delegate { target: String, task: String },
    /// Neither marker present
    Absent,
}

/// Parses delegation and completion markers out of cleaned reply text.
/// The delegation pattern is built from the registered agent names, so
/// `@anything-else:` never routes.
pub struct MarkerParser {
    delegation: Option<Regex>,
}

impl MarkerParser {
    pub fn new(agent_names: &[String]) -> Self {
        let delegation = if agent_names.is_empty() {
            None
        } else {
            let alternation = agent_names
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|");
            // Unanchored: the marker may appear anywhere in the reply
            Regex::new(&format!("@(?P<name>{}):", alternation)).ok()
        };
        Self { delegation }
    }

    /// Completion beats delegation: finishing the loop is preferred over
    /// recursing. Only the first delegation match is honored per turn.
    pub fn parse(&self, reply: &str) -> Marker {
        if let Some((idx, marker)) = first_completion(reply) {
            let after = reply[idx + marker.len()..].trim();
            let final_result = if after.is_empty() {
                // Nothing follows the marker: present the reply itself,
                // minus the marker
                let mut rest = String::with_capacity(reply.len());
                rest.push_str(&reply[..idx]);
                rest.push_str(&reply[idx + marker.len()..]);
                rest.trim().to_string()
            } else {
                after.to_string()
            };
            return Marker::Complete { final_result };
        }

        if let Some(ref delegation) = self.delegation {
            if let Some(caps) = delegation.captures(reply) {
                let target = caps["name"].to_string();
                let rest = &reply[caps.get(0).map(|m| m.end()).unwrap_or(reply.len())..];
                // The task runs to the next delegation or bracket marker
                // on a fresh line, or to the end of the reply
                let stop = [rest.find("\n@"), rest.find("\n[")]
                    .into_iter()
                    .flatten()
                    .min()
                    .unwrap_or(rest.len());
                let task = rest[..stop].trim().to_string();
                return Marker::Delegate { target, task };
            }
        }

        Marker::Absent
    }
}

/// Earliest completion marker in the reply, if any
fn first_completion(reply: &str) -> Option<(usize, &'static str)> {
    COMPLETION_MARKERS
        .iter()
        .filter_map(|m| reply.find(m).map(|idx| (idx, *m)))
        .min_by_key(|(idx, _)| *idx)
}
