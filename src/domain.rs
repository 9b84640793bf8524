//! The CRM records the front-end lists: branches, contacts, cases, tasks,
//! notes. Each implements [`CollectionItem`] so a `PagedCollection` can manage
//! it; serde matches the backend's JSON, integer primary keys included.

use crate::error::{ApiError, ErrorKind};
use crate::model::{CollectionItem, CollectionSnapshot, ItemId, UnixTimeMs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Branch
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CollectionItem for Branch {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

// ============================================================================
// Contact
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ItemId,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub branch_id: Option<ItemId>,
    #[serde(default)]
    pub created_at: Option<UnixTimeMs>,
}

impl Contact {
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

impl CollectionItem for Contact {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

// ============================================================================
// Case
// ============================================================================

/// Workflow stage of a case. Stages advance along the board left to right;
/// any open stage can close early, and review can bounce work back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaseStage {
    #[default]
    Intake,
    Screening,
    InProgress,
    Review,
    Closed,
    Archived,
}

impl CaseStage {
    /// Every stage a board renders, in column order.
    pub const BOARD_ORDER: [Self; 6] = [
        Self::Intake,
        Self::Screening,
        Self::InProgress,
        Self::Review,
        Self::Closed,
        Self::Archived,
    ];

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "intake" | "new" | "open" => Some(Self::Intake),
            "screening" | "triage" => Some(Self::Screening),
            "in_progress" | "inprogress" | "active" => Some(Self::InProgress),
            "review" | "in_review" => Some(Self::Review),
            "closed" | "done" | "resolved" => Some(Self::Closed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Screening => "screening",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Intake => "Intake",
            Self::Screening => "Screening",
            Self::InProgress => "In Progress",
            Self::Review => "Review",
            Self::Closed => "Closed",
            Self::Archived => "Archived",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archived)
    }

    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Closed | Self::Archived)
    }

    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::Intake => vec![Self::Screening, Self::Closed],
            Self::Screening => vec![Self::InProgress, Self::Closed],
            Self::InProgress => vec![Self::Review, Self::Closed],
            Self::Review => vec![Self::InProgress, Self::Closed],
            Self::Closed => vec![Self::Archived],
            Self::Archived => vec![],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: Self) -> Result<(), TransitionError> {
        if self == to {
            return Err(TransitionError::SameStage);
        }
        if self.is_terminal() {
            return Err(TransitionError::FromTerminalStage { stage: self });
        }
        if !self.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { from: self, to });
        }
        Ok(())
    }
}

impl std::fmt::Display for CaseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Case is already in that stage")]
    SameStage,
    #[error("Cannot move a case out of terminal stage {stage}")]
    FromTerminalStage { stage: CaseStage },
    #[error("Invalid stage change from {from} to {to}")]
    InvalidTransition { from: CaseStage, to: CaseStage },
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        ApiError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub stage: CaseStage,
    #[serde(default)]
    pub branch_id: Option<ItemId>,
    #[serde(default)]
    pub contact_id: Option<ItemId>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub created_at: Option<UnixTimeMs>,
    #[serde(default)]
    pub updated_at: Option<UnixTimeMs>,
}

impl CaseRecord {
    /// Moves the case to a new stage after validating the transition.
    pub fn advance_to(&mut self, stage: CaseStage) -> Result<(), TransitionError> {
        self.stage.validate_transition(stage)?;
        self.stage = stage;
        self.updated_at = Some(UnixTimeMs::now());
        Ok(())
    }
}

impl CollectionItem for CaseRecord {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Todo | Self::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub case_id: Option<ItemId>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub due_at: Option<UnixTimeMs>,
}

impl TaskRecord {
    /// Open and past due at the given instant.
    #[must_use]
    pub fn is_overdue(&self, now: UnixTimeMs) -> bool {
        self.status.is_open() && self.due_at.is_some_and(|due| due < now)
    }
}

impl CollectionItem for TaskRecord {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

// ============================================================================
// Note
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: ItemId,
    pub body: String,
    #[serde(default)]
    pub case_id: Option<ItemId>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<UnixTimeMs>,
}

impl CollectionItem for NoteRecord {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

// ============================================================================
// Stage board
// ============================================================================

/// Kanban view of a case collection: one column per stage, cases kept in the
/// server-provided order within each column. Derived from a snapshot, never
/// mutated directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageBoard {
    columns: Vec<(CaseStage, Vec<CaseRecord>)>,
}

impl StageBoard {
    #[must_use]
    pub fn from_cases(cases: &[CaseRecord]) -> Self {
        let mut columns: Vec<(CaseStage, Vec<CaseRecord>)> = CaseStage::BOARD_ORDER
            .iter()
            .map(|stage| (*stage, Vec::new()))
            .collect();
        for case in cases {
            if let Some((_, column)) = columns.iter_mut().find(|(stage, _)| *stage == case.stage) {
                column.push(case.clone());
            }
        }
        Self { columns }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: &CollectionSnapshot<CaseRecord>) -> Self {
        Self::from_cases(&snapshot.items)
    }

    #[must_use]
    pub fn column(&self, stage: CaseStage) -> &[CaseRecord] {
        self.columns
            .iter()
            .find(|(s, _)| *s == stage)
            .map_or(&[], |(_, cases)| cases.as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = (CaseStage, &[CaseRecord])> {
        self.columns
            .iter()
            .map(|(stage, cases)| (*stage, cases.as_slice()))
    }

    #[must_use]
    pub fn total_cases(&self) -> usize {
        self.columns.iter().map(|(_, cases)| cases.len()).sum()
    }
}

const fn default_true() -> bool {
    true
}
