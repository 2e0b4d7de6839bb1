use crate::core::Record;
use crate::{categorical, crm_record};
use chrono::{DateTime, Utc};

categorical! {
    /// Pipeline position of a lead.
    pub enum LeadStatus {
        New => "new",
        Contacted => "contacted",
        Qualified => "qualified",
        Proposal => "proposal",
        Negotiation => "negotiation",
        Won => "won",
        Lost => "lost",
    }
}

categorical! {
    /// Channel a lead came in through.
    pub enum LeadSource {
        Website => "website",
        Referral => "referral",
        Social => "social_media",
        Email => "email_campaign",
        Event => "event",
        ColdCall => "cold_call",
        Other => "other",
    }
}

crm_record! {
    /// A prospective customer.
    pub struct Lead / LeadPatch {
        name: String,
        email: Option<String>,
        phone: Option<String>,
        company: Option<String>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        status: Option<LeadStatus>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        source: Option<LeadSource>,
        /// Estimated deal value.
        value: Option<f64>,
        notes: Option<String>,
        assigned_to: Option<String>,
    }
}

impl Record for Lead {
    type Patch = LeadPatch;

    const COLLECTION: &'static str = "leads";
    const ENTITY: &'static str = "Lead";
    const BREAKDOWN_FIELDS: &'static [&'static str] = &["status", "source"];
    const MEASURE_FIELDS: &'static [&'static str] = &["value"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn draft(id: String, now: DateTime<Utc>, patch: &LeadPatch) -> Self {
        Self::from_patch(id, now, patch)
    }

    fn apply_patch(&mut self, patch: &LeadPatch, now: DateTime<Utc>) {
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

    fn measure(&self, field: &str) -> Option<f64> {
        match field {
            "value" => self.value,
            _ => None,
        }
    }
}
