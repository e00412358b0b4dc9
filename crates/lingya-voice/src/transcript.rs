//! Transcript reconciliation.
//!
//! Partial speech-to-text results for one utterance overwrite a single open
//! user entry in place; the final result closes it. Everything else is
//! appended as an immutable entry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    System,
    User,
    Assistant,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: EntryRole,
    pub text: String,
    pub is_final: bool,
}

impl TranscriptEntry {
    fn new(role: EntryRole, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            is_final,
        }
    }
}

#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    entries: Vec<TranscriptEntry>,
    /// Index of the user entry still receiving partials.
    open_user: Option<usize>,
    frozen: bool,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update the open user entry. Returns the entry as it now
    /// stands, or `None` once the transcript has been frozen by teardown.
    pub fn upsert_user(&mut self, text: &str, is_final: bool) -> Option<&TranscriptEntry> {
        if self.frozen {
            return None;
        }
        let index = match self.open_user {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.text = text.to_string();
                entry.is_final = is_final;
                index
            }
            None => {
                self.entries
                    .push(TranscriptEntry::new(EntryRole::User, text, is_final));
                self.entries.len() - 1
            }
        };
        self.open_user = if is_final { None } else { Some(index) };
        self.entries.get(index)
    }

    pub fn append_assistant(&mut self, text: &str) -> Option<&TranscriptEntry> {
        self.append(EntryRole::Assistant, text)
    }

    pub fn append_system(&mut self, text: &str) -> Option<&TranscriptEntry> {
        self.append(EntryRole::System, text)
    }

    pub fn append_error(&mut self, text: &str) -> Option<&TranscriptEntry> {
        self.append(EntryRole::Error, text)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn open_entry(&self) -> Option<&TranscriptEntry> {
        self.open_user.and_then(|i| self.entries.get(i))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Teardown: drop the open handle and stop accepting protocol updates.
    /// Entries stay readable.
    pub fn freeze(&mut self) {
        self.open_user = None;
        self.frozen = true;
    }

    /// A new session resumes appending after whatever is already displayed.
    pub fn resume(&mut self) {
        self.open_user = None;
        self.frozen = false;
    }

    fn append(&mut self, role: EntryRole, text: &str) -> Option<&TranscriptEntry> {
        if self.frozen {
            return None;
        }
        self.entries.push(TranscriptEntry::new(role, text, true));
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partials_collapse_into_one_final_entry() {
        let mut t = TranscriptReconciler::new();
        let id = t.upsert_user("hel", false).unwrap().id.clone();
        t.upsert_user("hello", false);
        t.upsert_user("hello wor", false);
        let last = t.upsert_user("hello world", true).unwrap();
        assert_eq!(last.id, id);
        assert!(last.is_final);
        assert_eq!(t.entries().len(), 1);
        assert_eq!(t.entries()[0].text, "hello world");
        assert!(t.open_entry().is_none());
    }

    #[test]
    fn next_utterance_gets_fresh_id() {
        let mut t = TranscriptReconciler::new();
        let first = t.upsert_user("one", true).unwrap().id.clone();
        let second = t.upsert_user("tw", false).unwrap().id.clone();
        assert_ne!(first, second);
        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.entries()[0].text, "one");
    }

    #[test]
    fn open_entry_keeps_its_position() {
        let mut t = TranscriptReconciler::new();
        t.upsert_user("partial", false);
        t.append_assistant("reply to earlier");
        t.upsert_user("partial grows", true);
        let roles: Vec<_> = t.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![EntryRole::User, EntryRole::Assistant]);
        assert_eq!(t.entries()[0].text, "partial grows");
    }

    #[test]
    fn appended_entries_are_final_and_unique() {
        let mut t = TranscriptReconciler::new();
        let a = t.append_system("ready").unwrap().id.clone();
        let b = t.append_error("oops").unwrap().id.clone();
        assert_ne!(a, b);
        assert!(t.entries().iter().all(|e| e.is_final));
    }

    #[test]
    fn frozen_transcript_is_read_only() {
        let mut t = TranscriptReconciler::new();
        t.upsert_user("half", false);
        t.freeze();
        assert!(t.upsert_user("more", false).is_none());
        assert!(t.append_assistant("late").is_none());
        assert_eq!(t.entries().len(), 1);
        assert_eq!(t.entries()[0].text, "half");

        t.resume();
        t.upsert_user("new session", false);
        assert_eq!(t.entries().len(), 2);
    }
}
