//! Meeting agenda: the ordered, time-boxed sections a session walks through.
//!
//! The agenda is supplied from outside (methodology-driven) and is fixed for
//! the lifetime of a session once selected.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Legacy and client-side section ids mapped to canonical agenda ids.
const SECTION_ALIASES: &[(&str, &str)] = &[
    ("segue", "good-news"),
    ("good_news", "good-news"),
    ("goodnews", "good-news"),
    ("rock_review", "priorities"),
    ("rock-review", "priorities"),
    ("rocks", "priorities"),
    ("rock", "priorities"),
    ("priority", "priorities"),
    ("todo", "todos"),
    ("todo-list", "todos"),
    ("todo_list", "todos"),
    ("ids", "issues"),
    ("issue", "issues"),
    ("problems", "issues"),
    ("problem", "issues"),
    ("conclusion", "conclude"),
];

/// A single time-boxed agenda section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaSection {
    pub id: String,
    pub label: String,
    pub allocated_seconds: u64,
}

impl AgendaSection {
    pub fn new(id: impl Into<String>, label: impl Into<String>, allocated_seconds: u64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            allocated_seconds,
        }
    }

    pub fn from_minutes(id: impl Into<String>, label: impl Into<String>, minutes: u64) -> Self {
        Self::new(id, label, minutes * 60)
    }
}

/// Section as delivered by the agenda source (`{id, label, allocatedMinutes}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    pub id: String,
    pub label: String,
    pub allocated_minutes: u64,
}

impl From<AgendaItem> for AgendaSection {
    fn from(item: AgendaItem) -> Self {
        AgendaSection::from_minutes(item.id, item.label, item.allocated_minutes)
    }
}

/// Ordered, non-empty list of sections with unique ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AgendaSection>", into = "Vec<AgendaSection>")]
pub struct Agenda {
    sections: Vec<AgendaSection>,
}

impl Agenda {
    pub fn new(sections: Vec<AgendaSection>) -> Result<Self, SessionError> {
        if sections.is_empty() {
            return Err(SessionError::InvalidAgenda(
                "agenda must contain at least one section".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for section in &sections {
            if section.id.is_empty() {
                return Err(SessionError::InvalidAgenda(
                    "section id must not be empty".to_string(),
                ));
            }
            if !seen.insert(section.id.as_str()) {
                return Err(SessionError::InvalidAgenda(format!(
                    "duplicate section id: {}",
                    section.id
                )));
            }
        }

        Ok(Self { sections })
    }

    /// Build an agenda from the agenda source's minute-based items.
    pub fn from_items(items: Vec<AgendaItem>) -> Result<Self, SessionError> {
        Self::new(items.into_iter().map(AgendaSection::from).collect())
    }

    /// The standard weekly accountability agenda (90 minutes).
    pub fn weekly() -> Self {
        Self {
            sections: vec![
                AgendaSection::from_minutes("good-news", "Good News", 5),
                AgendaSection::from_minutes("scorecard", "Scorecard", 5),
                AgendaSection::from_minutes("priorities", "Priority Review", 5),
                AgendaSection::from_minutes("headlines", "Headlines", 5),
                AgendaSection::from_minutes("todos", "To-Do Review", 5),
                AgendaSection::from_minutes("issues", "Issue Resolution", 60),
                AgendaSection::from_minutes("conclude", "Conclude", 5),
            ],
        }
    }

    pub fn sections(&self) -> &[AgendaSection] {
        &self.sections
    }

    pub fn first(&self) -> &AgendaSection {
        // Non-empty by construction
        &self.sections[0]
    }

    pub fn get(&self, id: &str) -> Option<&AgendaSection> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Resolve a raw section id, accepting legacy aliases.
    pub fn resolve(&self, raw: &str) -> Option<&AgendaSection> {
        if let Some(section) = self.get(raw) {
            return Some(section);
        }

        let normalized = raw.trim().to_ascii_lowercase();
        if let Some(section) = self.get(&normalized) {
            return Some(section);
        }

        SECTION_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .and_then(|(_, canonical)| self.get(canonical))
    }

    pub fn total_allocated_seconds(&self) -> u64 {
        self.sections.iter().map(|s| s.allocated_seconds).sum()
    }

    /// Sum of allocations for every section up to and including `id`.
    pub fn expected_elapsed_through(&self, id: &str) -> Option<u64> {
        let position = self.position(id)?;
        Some(
            self.sections[..=position]
                .iter()
                .map(|s| s.allocated_seconds)
                .sum(),
        )
    }
}

impl TryFrom<Vec<AgendaSection>> for Agenda {
    type Error = SessionError;

    fn try_from(sections: Vec<AgendaSection>) -> Result<Self, Self::Error> {
        Agenda::new(sections)
    }
}

impl From<Agenda> for Vec<AgendaSection> {
    fn from(agenda: Agenda) -> Self {
        agenda.sections
    }
}

impl Default for Agenda {
    fn default() -> Self {
        Self::weekly()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekly_agenda() {
        let agenda = Agenda::weekly();
        assert_eq!(agenda.sections().len(), 7);
        assert_eq!(agenda.first().id, "good-news");
        assert_eq!(agenda.total_allocated_seconds(), 90 * 60);
        assert_eq!(agenda.expected_elapsed_through("scorecard"), Some(600));
        assert_eq!(agenda.expected_elapsed_through("missing"), None);
    }

    #[test]
    fn test_rejects_empty_and_duplicate() {
        assert!(Agenda::new(vec![]).is_err());

        let dup = Agenda::new(vec![
            AgendaSection::new("a", "A", 60),
            AgendaSection::new("a", "Again", 60),
        ]);
        assert!(matches!(dup, Err(SessionError::InvalidAgenda(_))));
    }

    #[test]
    fn test_resolve_aliases() {
        let agenda = Agenda::weekly();
        assert_eq!(agenda.resolve("segue").map(|s| s.id.as_str()), Some("good-news"));
        assert_eq!(agenda.resolve("IDS").map(|s| s.id.as_str()), Some("issues"));
        assert_eq!(agenda.resolve("todo-list").map(|s| s.id.as_str()), Some("todos"));
        assert_eq!(agenda.resolve("headlines").map(|s| s.id.as_str()), Some("headlines"));
        assert!(agenda.resolve("lunch").is_none());
    }

    #[test]
    fn test_alias_requires_target_in_agenda() {
        let agenda = Agenda::new(vec![AgendaSection::new("scorecard", "Scorecard", 300)]).unwrap();
        assert!(agenda.resolve("segue").is_none());
    }

    #[test]
    fn test_from_items_converts_minutes() {
        let agenda = Agenda::from_items(vec![AgendaItem {
            id: "check-in".to_string(),
            label: "Check-in".to_string(),
            allocated_minutes: 3,
        }])
        .unwrap();
        assert_eq!(agenda.first().allocated_seconds, 180);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"[{"id":"a","label":"A","allocatedSeconds":60}]"#;
        let agenda: Agenda = serde_json::from_str(json).unwrap();
        assert_eq!(agenda.first().allocated_seconds, 60);

        assert!(serde_json::from_str::<Agenda>("[]").is_err());
    }
}
