use crate::core::Record;
use crate::{categorical, crm_record};
use chrono::{DateTime, Utc};

categorical! {
    /// Headcount band.
    pub enum CompanySize {
        Startup => "1-10",
        Small => "11-50",
        Medium => "51-200",
        Large => "201-1000",
        Enterprise => "1000+",
    }
}

crm_record! {
    /// An organisation contacts and deals belong to.
    pub struct Company / CompanyPatch {
        name: String,
        /// Free-form industry label; the list of industries is data.
        industry: Option<String>,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        size: Option<CompanySize>,
        website: Option<String>,
        phone: Option<String>,
        address: Option<String>,
        annual_revenue: Option<f64>,
        notes: Option<String>,
    }
}

impl Record for Company {
    type Patch = CompanyPatch;

    const COLLECTION: &'static str = "companies";
    const ENTITY: &'static str = "Company";
    const BREAKDOWN_FIELDS: &'static [&'static str] = &["industry", "size"];
    const MEASURE_FIELDS: &'static [&'static str] = &["annual_revenue"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn draft(id: String, now: DateTime<Utc>, patch: &CompanyPatch) -> Self {
        Self::from_patch(id, now, patch)
    }

    fn apply_patch(&mut self, patch: &CompanyPatch, now: DateTime<Utc>) {
        self.merge_patch(patch);
        self.updated_at = now;
    }

    fn category(&self, field: &str) -> Option<&str> {
        match field {
            "industry" => self.industry.as_deref().filter(|s| !s.is_empty()),
            "size" => self.size.map(|s| s.as_str()),
            _ => None,
        }
    }

    fn measure(&self, field: &str) -> Option<f64> {
        match field {
            "annual_revenue" => self.annual_revenue,
            _ => None,
        }
    }
}
