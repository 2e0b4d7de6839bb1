use crate::core::Record;
use crate::{categorical, crm_record};
use chrono::{DateTime, NaiveDate, Utc};

categorical! {
    pub enum DealStage {
        Prospecting => "prospecting",
        Qualification => "qualification",
        Proposal => "proposal",
        Negotiation => "negotiation",
        ClosedWon => "closed_won",
        ClosedLost => "closed_lost",
    }
}

crm_record! {
    /// An opportunity moving through the sales pipeline.
    pub struct Deal / DealPatch {
        title: String,
        value: f64,
        #[serde(deserialize_with = "crate::core::lenient_category")]
        stage: Option<DealStage>,
        /// Win probability in percent.
        probability: u8,
        expected_close_date: Option<NaiveDate>,
        contact_id: Option<String>,
        company_id: Option<String>,
        notes: Option<String>,
    }
}

impl Deal {
    pub fn is_closed(&self) -> bool {
        matches!(
            self.stage,
            Some(DealStage::ClosedWon | DealStage::ClosedLost)
        )
    }
}

impl Record for Deal {
    type Patch = DealPatch;

    const COLLECTION: &'static str = "deals";
    const ENTITY: &'static str = "Deal";
    const BREAKDOWN_FIELDS: &'static [&'static str] = &["stage"];
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

    fn draft(id: String, now: DateTime<Utc>, patch: &DealPatch) -> Self {
        Self::from_patch(id, now, patch)
    }

    fn apply_patch(&mut self, patch: &DealPatch, now: DateTime<Utc>) {
        self.merge_patch(patch);
        self.updated_at = now;
    }

    fn category(&self, field: &str) -> Option<&str> {
        match field {
            "stage" => self.stage.map(|s| s.as_str()),
            _ => None,
        }
    }

    fn measure(&self, field: &str) -> Option<f64> {
        match field {
            "value" => Some(self.value),
            _ => None,
        }
    }
}
