use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of one scraper instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScraperState {
    Uninitialized,
    SessionOpen,
    /// The entity's key is known (from the cache or the page)
    RecordResolved,
    /// At least one field has been read
    FieldsPopulated,
    /// Session released; no further access
    Closed,
}

impl ScraperState {
    /// Returns true if moving from `self` to `next` is allowed
    ///
    /// Any live state may close. `FieldsPopulated` may repeat as more fields
    /// arrive. Nothing leaves `Closed`.
    pub fn can_transition_to(&self, next: ScraperState) -> bool {
        use ScraperState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Uninitialized, SessionOpen) => true,
            (SessionOpen, RecordResolved) => true,
            (RecordResolved, FieldsPopulated) => true,
            (FieldsPopulated, FieldsPopulated) => true,
            _ => false,
        }
    }

    /// Returns true while the scraper may still touch its session
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Uninitialized | Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::SessionOpen => "session_open",
            Self::RecordResolved => "record_resolved",
            Self::FieldsPopulated => "fields_populated",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ScraperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid scraper transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ScraperState,
    pub to: ScraperState,
}

/// Presence of one field in the populated lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Absent,
    Present,
}

/// Current state plus the set of fields already populated
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ScraperState,
    populated: BTreeSet<&'static str>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ScraperState::Uninitialized,
            populated: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> ScraperState {
        self.state
    }

    pub fn advance(&mut self, next: ScraperState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Records that `field` now has a value
    ///
    /// The first populated field moves a resolved scraper to `FieldsPopulated`.
    pub fn mark_populated(&mut self, field: &'static str) -> Result<(), TransitionError> {
        if self.state != ScraperState::FieldsPopulated {
            self.advance(ScraperState::FieldsPopulated)?;
        }
        self.populated.insert(field);
        Ok(())
    }

    pub fn field_state(&self, field: &str) -> FieldState {
        if self.populated.contains(field) {
            FieldState::Present
        } else {
            FieldState::Absent
        }
    }

    /// Populated fields in name order
    pub fn populated(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.populated.iter().copied()
    }
}
