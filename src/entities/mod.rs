//! Typed CRM entities.
//!
//! Each entity is a closed record shape with a matching patch type; the
//! categorical enums define the buckets the statistics aggregator counts.

pub mod company;
pub mod contact;
pub mod deal;
pub mod lead;
pub mod task;

pub use company::{Company, CompanyPatch, CompanySize};
pub use contact::{Contact, ContactPatch, ContactStatus};
pub use deal::{Deal, DealPatch, DealStage};
pub use lead::{Lead, LeadPatch, LeadSource, LeadStatus};
pub use task::{Task, TaskPatch, TaskPriority, TaskStatus};
