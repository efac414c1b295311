use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::UtcDateTime;

/// Canonical ticket lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    InProgress,
    Waiting,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Waiting => "waiting",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Map a free-text status label by keyword. Unknown labels become `New`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("closed") || has("cancel") || has("invoiced") {
            Self::Closed
        } else if has("resolved") || has("complete") || has("done") || has("fixed") {
            Self::Resolved
        } else if has("wait") || has("hold") || has("pending") || has("customer reply") || has("parts") {
            Self::Waiting
        } else if has("progress") || has("assigned") || has("scheduled") || has("working") || has("open") {
            Self::InProgress
        } else {
            Self::New
        }
    }
}

impl Display for TicketStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical ticket urgency. `critical` is accepted as a synonym of `urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    #[serde(alias = "critical")]
    Urgent,
}

impl TicketPriority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Map a free-text priority label by keyword. Unknown labels become `Medium`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("urgent") || has("critical") || has("emergency") {
            Self::Urgent
        } else if has("high") {
            Self::High
        } else if has("low") {
            Self::Low
        } else {
            Self::Medium
        }
    }
}

impl Display for TicketPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical PSA company (customer account).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Company {
    pub external_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub raw_data: Value,
}

/// Canonical PSA contact. `company_id` is the provider's company id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    pub external_id: String,
    pub company_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub raw_data: Value,
}

/// Canonical PSA ticket. `company_id` and `contact_id` are provider ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub external_id: String,
    pub company_id: Option<String>,
    pub contact_id: Option<String>,
    pub ticket_number: Option<String>,
    pub subject: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub external_created_at: Option<UtcDateTime>,
    pub external_updated_at: Option<UtcDateTime>,
    pub raw_data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_labels_fall_back_to_new() {
        assert_eq!(TicketStatus::from_label("Triaged"), TicketStatus::New);
        assert_eq!(TicketStatus::from_label(""), TicketStatus::New);
    }

    #[test]
    fn status_keywords_map_to_canonical_states() {
        assert_eq!(TicketStatus::from_label("In Progress"), TicketStatus::InProgress);
        assert_eq!(TicketStatus::from_label("Waiting on Customer"), TicketStatus::Waiting);
        assert_eq!(TicketStatus::from_label(">Closed"), TicketStatus::Closed);
        assert_eq!(TicketStatus::from_label("Completed"), TicketStatus::Resolved);
    }

    #[test]
    fn critical_priority_is_urgent() {
        assert_eq!(TicketPriority::from_label("Priority 1 - Critical"), TicketPriority::Urgent);
        assert_eq!(TicketPriority::from_label("Normal"), TicketPriority::Medium);
        let parsed: TicketPriority = serde_json::from_str("\"critical\"").expect("alias");
        assert_eq!(parsed, TicketPriority::Urgent);
    }
}
