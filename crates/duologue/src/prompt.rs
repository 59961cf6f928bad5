//! Prompt composition: persona + world setting + remapped history.
//!
//! Two participants, `ai_left` and `ai_right`, take turns. When one of them is
//! generating, the other side's lines are what it responds to, so they are
//! sent upstream as `user` turns and its own earlier lines as `assistant`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::llm::{Message, Role};

/// Template used when the configuration does not provide one.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "{persona}\nWorld setting: {world_setting}";

// ============================================================================
// Participants and turns
// ============================================================================

/// One side of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    Left,
    Right,
}

impl Participant {
    pub const fn as_str(self) -> &'static str {
        match self {
            Participant::Left => "ai_left",
            Participant::Right => "ai_right",
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            Participant::Left => Participant::Right,
            Participant::Right => Participant::Left,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Participant {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_left" => Ok(Participant::Left),
            "ai_right" => Ok(Participant::Right),
            other => Err(RelayError::InvalidArgument(format!(
                "unknown role '{other}', expected ai_left or ai_right"
            ))),
        }
    }
}

/// Speaker tag of a client-supplied history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TurnRole {
    Participant(Participant),
    System,
    Other(String),
}

impl From<String> for TurnRole {
    fn from(s: String) -> Self {
        if s == "system" {
            return TurnRole::System;
        }
        match s.parse::<Participant>() {
            Ok(p) => TurnRole::Participant(p),
            Err(_) => TurnRole::Other(s),
        }
    }
}

impl From<TurnRole> for String {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::Participant(p) => p.as_str().to_string(),
            TurnRole::System => "system".to_string(),
            TurnRole::Other(s) => s,
        }
    }
}

/// One entry of the conversation history sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    #[serde(default)]
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Participant, content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Participant(role),
            content: content.into(),
        }
    }
}

/// Upstream role of a history entry as seen by `speaker`.
///
/// `None` means the entry is never forwarded.
pub fn remap_role(speaker: Participant, role: &TurnRole) -> Option<Role> {
    match role {
        TurnRole::System => None,
        TurnRole::Participant(p) if *p == speaker.opposite() => Some(Role::User),
        TurnRole::Participant(_) | TurnRole::Other(_) => Some(Role::Assistant),
    }
}

// ============================================================================
// System prompt
// ============================================================================

/// System prompt template with `{persona}` and `{world_setting}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl Default for PromptTemplate {
    fn default() -> Self {
        Self(DEFAULT_PROMPT_TEMPLATE.to_string())
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute placeholders in one pass; substituted text is not rescanned.
    pub fn render(&self, persona: &str, world_setting: &str) -> String {
        const PERSONA: &str = "{persona}";
        const WORLD: &str = "{world_setting}";

        let mut out = String::with_capacity(self.0.len() + persona.len() + world_setting.len());
        let mut rest = self.0.as_str();
        while let Some(pos) = rest.find('{') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix(PERSONA) {
                out.push_str(persona);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(WORLD) {
                out.push_str(world_setting);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

// ============================================================================
// Composer
// ============================================================================

/// Builds the upstream message list for one turn.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    template: PromptTemplate,
    personas: HashMap<String, String>,
}

impl PromptComposer {
    pub fn new(template: PromptTemplate, personas: HashMap<String, String>) -> Self {
        Self {
            template,
            personas,
        }
    }

    /// Persona text for a role; unknown roles get an empty persona.
    pub fn persona(&self, role: Participant) -> &str {
        self.personas
            .get(role.as_str())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn system_prompt(&self, role: Participant, world_setting: &str) -> String {
        self.template.render(self.persona(role), world_setting)
    }

    /// `[system] + [last history_limit turns, filtered and remapped] + [user]?`
    pub fn compose(
        &self,
        role: Participant,
        world_setting: &str,
        history: &[ConversationTurn],
        current_user_message: &str,
        history_limit: usize,
    ) -> Vec<Message> {
        compose_messages(
            self.system_prompt(role, world_setting),
            role,
            history,
            current_user_message,
            history_limit,
        )
    }
}

/// Assemble the message list around an already rendered system prompt.
pub fn compose_messages(
    system_prompt: String,
    role: Participant,
    history: &[ConversationTurn],
    current_user_message: &str,
    history_limit: usize,
) -> Vec<Message> {
    let window = &history[history.len().saturating_sub(history_limit)..];

    let mut messages = Vec::with_capacity(window.len() + 2);
    messages.push(Message::system(system_prompt));

    messages.extend(window.iter().filter_map(|turn| {
        if turn.content.trim().is_empty() {
            return None;
        }
        remap_role(role, &turn.role).map(|mapped| Message {
            role: mapped,
            content: turn.content.clone(),
        })
    }));

    let current = current_user_message.trim();
    if !current.is_empty() {
        messages.push(Message::user(current));
    }

    messages
}
