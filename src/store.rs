//! In-memory primary note store for local development.
//!
//! Every `create` yields the note and the creation event the hosting runtime
//! would deliver for it. Nothing here touches the search index.

use dashmap::DashMap;

use crate::error::{NoteSearchError, Result};
use crate::sync::NoteCreatedEvent;
use crate::types::{Note, SubjectId};

#[derive(Default)]
pub struct NoteStore {
    notes: DashMap<String, Note>,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `{author, text}` under a fresh id.
    pub fn create(&self, author: &SubjectId, text: impl Into<String>) -> (Note, NoteCreatedEvent) {
        let note = Note {
            id: uuid::Uuid::new_v4().simple().to_string(),
            author: author.as_str().to_string(),
            text: text.into(),
        };
        self.notes.insert(note.id.clone(), note.clone());
        let event = NoteCreatedEvent::new(note.id.clone(), note.fields());
        (note, event)
    }

    pub fn get(&self, id: &str) -> Result<Note> {
        self.notes
            .get(id)
            .map(|n| n.clone())
            .ok_or_else(|| NoteSearchError::ObjectNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
