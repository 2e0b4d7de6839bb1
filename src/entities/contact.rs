use crate::core::Record;
use crate::entities::lead::LeadSource;
use crate::{categorical, crm_record};
use chrono::{DateTime, Utc};

categorical! {
    pub enum ContactStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

crm_record! {
    /// A person the team is in touch with.
    pub struct Contact / ContactPatch {
        first_name: String,
        last_name: String,
        email: Option<String>,
        phone: Option<String>,
        position: Option<String>,
        company_id: Option<String>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        status: Option<ContactStatus>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        source: Option<LeadSource>,
        notes: Option<String>,
    }
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

impl Record for Contact {
    type Patch = ContactPatch;

    const COLLECTION: &'static str = "contacts";
    const ENTITY: &'static str = "Contact";
    const BREAKDOWN_FIELDS: &'static [&'static str] = &["status", "source"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn draft(id: String, now: DateTime<Utc>, patch: &ContactPatch) -> Self {
        Self::from_patch(id, now, patch)
    }

    fn apply_patch(&mut self, patch: &ContactPatch, now: DateTime<Utc>) {
        self.merge_patch(patch);
        self.updated_at = now;
    }

    fn category(&self, field: &str) -> Option<&str> {
        match field {
            "status" => self.status.map(|s| s.as_str()),
            "source" => self.source.map(|s| s.as_str()),
            _ => None,
        }
    }
}
