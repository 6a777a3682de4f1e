//! Campaign ledger and pacing: the authoritative spend state every serving
//! and recording path depends on.

#![warn(clippy::unwrap_used)]

pub mod ledger;
pub mod pacing;

pub use ledger::{AdRemoval, CampaignLedger, DebitOutcome, LedgerStatus, RefundOutcome};
pub use pacing::{PacingController, PacingStatus};
