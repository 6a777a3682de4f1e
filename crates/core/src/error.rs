use crate::types::CampaignStatus;
use thiserror::Error;
use uuid::Uuid;

pub type AdResult<T> = Result<T, AdError>;

#[derive(Error, Debug)]
pub enum AdError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown campaign: {0}")]
    CampaignNotFound(Uuid),

    #[error("Owner {owner_id} may not modify campaign {campaign_id}")]
    Forbidden { campaign_id: Uuid, owner_id: String },

    #[error("Invalid campaign transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AdError {
    /// Errors the caller caused; rejected synchronously and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AdError::Validation(_) | AdError::CampaignNotFound(_) | AdError::Forbidden { .. }
        )
    }
}
