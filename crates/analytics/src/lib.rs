#![warn(clippy::unwrap_used)]

pub mod aggregator;
pub mod writer;

pub use aggregator::{AnalyticsAggregator, CampaignTotals};
pub use writer::EventWriter;
