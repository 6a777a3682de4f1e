//! Ad serving and event recording: eligibility filtering, ranking, dedup,
//! charging, and the `AdEngine` facade that ties them to the ledger.

#![warn(clippy::unwrap_used)]

pub mod dedup;
pub mod eligibility;
pub mod engine;
pub mod recorder;
pub mod selector;

pub use dedup::{DedupCheck, DedupWindow};
pub use eligibility::{Candidate, EligibilityFilter, Ineligible};
pub use engine::{AdEngine, CampaignReport, MaintenanceReport};
pub use recorder::{EventRecorder, RecordOutcome};
pub use selector::{AdSelector, Selection};
