//! Run reports returned to callers and rendered by the CLI.

use serde::Serialize;

use crate::provider::EntityKind;
use crate::UtcDateTime;

/// Per-entity error messages kept on a report; the counter keeps counting.
pub const MAX_ERROR_MESSAGES: usize = 10;

/// Counts for one entity collection of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub entity: EntityKind,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
}

impl EntityReport {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Mutable counter folded into an [`EntityReport`] once the entity is done.
#[derive(Debug)]
pub(crate) struct EntityTally {
    report: EntityReport,
}

impl EntityTally {
    pub(crate) fn new(entity: EntityKind) -> Self {
        Self {
            report: EntityReport {
                entity,
                created: 0,
                updated: 0,
                unchanged: 0,
                errors: 0,
                error_messages: Vec::new(),
            },
        }
    }

    pub(crate) fn created(&mut self, count: usize) {
        self.report.created += count;
    }

    pub(crate) fn updated(&mut self) {
        self.report.updated += 1;
    }

    pub(crate) fn unchanged(&mut self) {
        self.report.unchanged += 1;
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.report.errors += 1;
        if self.report.error_messages.len() < MAX_ERROR_MESSAGES {
            self.report.error_messages.push(message.into());
        }
    }

    pub(crate) fn finish(self) -> EntityReport {
        self.report
    }
}

/// Why a connection was not synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    Inactive,
    Disabled,
    NotDue { next_due_at: UtcDateTime },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// Outcome of one connection's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSyncReport {
    pub connection_id: i64,
    pub connection_name: String,
    pub provider_type: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub entities: Vec<EntityReport>,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
}

impl ConnectionSyncReport {
    pub fn entity(&self, entity: EntityKind) -> Option<&EntityReport> {
        self.entities.iter().find(|report| report.entity == entity)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Outcome of a run over every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSyncReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub connections: Vec<ConnectionSyncReport>,
}

impl BatchSyncReport {
    pub fn from_reports(mut connections: Vec<ConnectionSyncReport>) -> Self {
        connections.sort_by_key(|report| report.connection_id);
        let count = |status: RunStatus| connections.iter().filter(|report| report.status == status).count();
        Self {
            succeeded: count(RunStatus::Success),
            failed: count(RunStatus::Error),
            skipped: count(RunStatus::Skipped),
            connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_capped_but_counted() {
        let mut tally = EntityTally::new(EntityKind::Contacts);
        for index in 0..15 {
            tally.error(format!("contact {index} failed"));
        }
        tally.updated();
        let report = tally.finish();

        assert_eq!(report.errors, 15);
        assert_eq!(report.error_messages.len(), MAX_ERROR_MESSAGES);
        assert_eq!(report.processed(), 1);
    }

    #[test]
    fn skip_reasons_serialize_with_a_tag() {
        let value = serde_json::to_value(SkipReason::AlreadyRunning).expect("json");
        assert_eq!(value["reason"], "already_running");
    }
}
