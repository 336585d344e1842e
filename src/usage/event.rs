use super::UsageSnapshot;
use serde::{Deserialize, Deserializer, Serialize};

/// Anything the tracker consumes from the runtime's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    TokenUsage(TokenUsageEvent),
    SessionTitle(String),
}

/// `{"type":"session_title","title":"..."}`, emitted when the runtime names the session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionTitleEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
}

/// Usage report emitted by an agent session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageEvent {
    #[serde(
        default,
        rename = "sessionID",
        alias = "sessionId",
        alias = "session_id"
    )]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default", alias = "agent_context")]
    pub agent_context: AgentContext,
    /// Usage of this session alone.
    #[serde(default, alias = "self_usage")]
    pub self_usage: Option<UsageSnapshot>,
    /// Usage of this session plus everything it delegated.
    #[serde(default, alias = "inclusive_usage")]
    pub inclusive_usage: Option<UsageSnapshot>,
    /// Older runtimes report a single combined figure.
    #[serde(default)]
    pub usage: Option<UsageSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    #[serde(default, alias = "agent_name")]
    pub agent_name: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Self and inclusive views of an event after the legacy `usage` field is folded in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolvedUsage {
    pub self_usage: Option<UsageSnapshot>,
    pub inclusive_usage: Option<UsageSnapshot>,
}

impl TokenUsageEvent {
    pub fn session(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.agent_context
            .agent_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    pub fn resolve_usage(&self) -> ResolvedUsage {
        ResolvedUsage {
            self_usage: self.self_usage.or(self.usage).map(UsageSnapshot::sanitized),
            inclusive_usage: self
                .inclusive_usage
                .or(self.usage)
                .map(UsageSnapshot::sanitized),
        }
    }
}
