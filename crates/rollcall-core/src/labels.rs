//! Label mapping: `id:name` text file produced by training.
//!
//! Parsed once at startup into an immutable map; any malformed line makes the
//! whole mapping unusable, so a corrupt file can never mark the wrong person.

use crate::types::Identity;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const DELIMITER: char = ':';

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("label mapping not found: {0} — run `rollcall train` first")]
    NotFound(String),
    #[error("line {line}: expected `id:name`, got {content:?}")]
    Malformed { line: usize, content: String },
    #[error("line {line}: invalid id {value:?}")]
    InvalidId { line: usize, value: String },
    #[error("line {line}: empty name for id {id}")]
    EmptyName { line: usize, id: u32 },
    #[error("line {line}: duplicate id {id}")]
    DuplicateId { line: usize, id: u32 },
    #[error("name {0:?} contains the `:` delimiter")]
    InvalidName(String),
    #[error("label mapping is empty")]
    Empty,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable numeric id → [`Identity`] mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
    identities: BTreeMap<u32, Identity>,
}

impl LabelMap {
    /// Build a mapping from names in id order (id = position).
    pub fn from_names<I, S>(names: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut identities = BTreeMap::new();
        for (id, name) in names.into_iter().enumerate() {
            let name = name.into();
            if name.contains(DELIMITER) || name.contains('\n') {
                return Err(LabelError::InvalidName(name));
            }
            let id = id as u32;
            identities.insert(id, Identity { id, name });
        }
        if identities.is_empty() {
            return Err(LabelError::Empty);
        }
        Ok(Self { identities })
    }

    /// Parse the text form. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self, LabelError> {
        let mut identities = BTreeMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut parts = trimmed.split(DELIMITER);
            let (Some(id_part), Some(name_part), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(LabelError::Malformed { line, content: raw.to_string() });
            };

            let id: u32 = id_part.trim().parse().map_err(|_| LabelError::InvalidId {
                line,
                value: id_part.to_string(),
            })?;
            let name = name_part.trim();
            if name.is_empty() {
                return Err(LabelError::EmptyName { line, id });
            }
            if identities.contains_key(&id) {
                return Err(LabelError::DuplicateId { line, id });
            }
            identities.insert(id, Identity { id, name: name.to_string() });
        }

        if identities.is_empty() {
            return Err(LabelError::Empty);
        }

        Ok(Self { identities })
    }

    /// Load and parse a label mapping file.
    pub fn load(path: &Path) -> Result<Self, LabelError> {
        if !path.exists() {
            return Err(LabelError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let labels = Self::parse(&text)?;
        tracing::info!(path = %path.display(), identities = labels.len(), "loaded label mapping");
        Ok(labels)
    }

    /// Write the text form, one `id:name` per line in id order.
    pub fn save(&self, path: &Path) -> Result<(), LabelError> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn to_text(&self) -> String {
        self.identities
            .values()
            .map(|identity| format!("{}{DELIMITER}{}\n", identity.id, identity.name))
            .collect()
    }

    pub fn get(&self, id: u32) -> Option<&Identity> {
        self.identities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }
}
