use crate::core::Record;
use crate::{categorical, crm_record};
use chrono::{DateTime, NaiveDate, Utc};

categorical! {
    pub enum TaskStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
    }
}

categorical! {
    pub enum TaskPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

crm_record! {
    /// A follow-up item, optionally tied to a lead or deal.
    pub struct Task / TaskPatch {
        title: String,
        description: Option<String>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        status: Option<TaskStatus>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        priority: Option<TaskPriority>,
        due_date: Option<NaiveDate>,
        assigned_to: Option<String>,
        lead_id: Option<String>,
        deal_id: Option<String>,
    }
}

impl Record for Task {
    type Patch = TaskPatch;

    const COLLECTION: &'static str = "tasks";
    const ENTITY: &'static str = "Task";
    const BREAKDOWN_FIELDS: &'static [&'static str] = &["status", "priority"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn draft(id: String, now: DateTime<Utc>, patch: &TaskPatch) -> Self {
        Self::from_patch(id, now, patch)
    }

    fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        self.merge_patch(patch);
        self.updated_at = now;
    }

    fn category(&self, field: &str) -> Option<&str> {
        match field {
            "status" => self.status.map(|s| s.as_str()),
            "priority" => self.priority.map(|p| p.as_str()),
            _ => None,
        }
    }
}
