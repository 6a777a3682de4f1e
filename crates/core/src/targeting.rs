//! Campaign targeting predicates, evaluated against the channel of a serve request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Targeting {
    /// Untargeted: matches every request, including ones with no channel.
    #[default]
    NoFilter,
    ChannelEquals { channel_id: String },
    ChannelIn { channel_ids: BTreeSet<String> },
}

impl Targeting {
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Targeting::ChannelEquals {
            channel_id: channel_id.into(),
        }
    }

    pub fn channels<I, S>(channel_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Targeting::ChannelIn {
            channel_ids: channel_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// A targeted campaign never matches a request that carries no channel.
    pub fn matches(&self, channel_id: Option<&str>) -> bool {
        match (self, channel_id) {
            (Targeting::NoFilter, _) => true,
            (Targeting::ChannelEquals { channel_id: want }, Some(got)) => want == got,
            (Targeting::ChannelIn { channel_ids }, Some(got)) => channel_ids.contains(got),
            (_, None) => false,
        }
    }
}
