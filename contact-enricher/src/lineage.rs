//! Walking a contact's chain of related contacts back to where it started.
//!
//! Transfers and callbacks create new contacts that point at the one they came from. The
//! walk follows those back-references until it reaches a voice contact, a contact with no
//! further reference, a contact that refers to itself, or the hop budget runs out. The
//! contact it stops on is the origin, and its details describe the whole chain.
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::UpstreamError;
use crate::metric_consts::{LINEAGE_HOPS, LINEAGE_WALKS};
use crate::upstream::{
    with_timeout, CampaignDirectory, ContactDirectory, ContactRecord, TIMESTAMP_FIELDS,
};

/// The most back-references followed. The contact reached by the last hop is fetched too,
/// so that it can be described as the origin: a chain that never ends costs
/// `MAX_HOPS + 1` DescribeContact calls.
pub const MAX_HOPS: u32 = 5;

/// Contacts of this channel are where chains begin.
pub const TERMINAL_CHANNEL: &str = "VOICE";

pub const DESCRIBED_CONTACT_ID_ATTR: &str = "DescribedContactId";
pub const ORIGINAL_CHANNEL_ATTR: &str = "OriginalContactChannel";
pub const LINEAGE_HOPS_ATTR: &str = "LineageHops";
pub const AGENT_ID_ATTR: &str = "AgentId";
pub const AGENT_NAME_ATTR: &str = "AgentName";
pub const AGENT_USERNAME_ATTR: &str = "AgentUsername";
pub const CAMPAIGN_ID_ATTR: &str = "CampaignId";
pub const CAMPAIGN_NAME_ATTR: &str = "CampaignName";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TerminalChannel,
    NoReference,
    SelfReference,
    HopLimit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::TerminalChannel => "terminal_channel",
            StopReason::NoReference => "no_reference",
            StopReason::SelfReference => "self_reference",
            StopReason::HopLimit => "hop_limit",
        }
    }
}

/// Where a walk ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkEnd {
    Terminal {
        contact: ContactRecord,
        hops: u32,
        reason: StopReason,
    },
    /// A fetch failed part way. No further calls are made.
    Aborted {
        contact_id: String,
        hops: u32,
        error: UpstreamError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Walk { contact_id: String, hops: u32 },
    Stop(WalkEnd),
}

/// Decide what to do after fetching `contact_id`, `hops` references into the walk.
pub fn step(
    contact_id: &str,
    hops: u32,
    fetched: Result<ContactRecord, UpstreamError>,
) -> Transition {
    let contact = match fetched {
        Ok(contact) => contact,
        Err(error) => {
            return Transition::Stop(WalkEnd::Aborted {
                contact_id: contact_id.to_owned(),
                hops,
                error,
            })
        }
    };

    let stop = |contact, reason| Transition::Stop(WalkEnd::Terminal { contact, hops, reason });

    if contact.channel.as_deref() == Some(TERMINAL_CHANNEL) {
        return stop(contact, StopReason::TerminalChannel);
    }

    match contact.related_contact_id.clone() {
        None => stop(contact, StopReason::NoReference),
        Some(next) if next.is_empty() => stop(contact, StopReason::NoReference),
        Some(next) if next == contact_id => stop(contact, StopReason::SelfReference),
        Some(_) if hops >= MAX_HOPS => stop(contact, StopReason::HopLimit),
        Some(next) => Transition::Walk {
            contact_id: next,
            hops: hops + 1,
        },
    }
}

/// What we learned about the origin of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineageRecord {
    pub hops: u32,
    pub aborted: bool,
    pub described_contact_id: Option<String>,
    pub original_channel: Option<String>,
    /// Only timestamps that parse as ISO-8601 are kept.
    pub timestamps: BTreeMap<String, String>,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub agent_username: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
}

impl LineageRecord {
    fn aborted(hops: u32) -> Self {
        Self {
            hops,
            aborted: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &LineageRecord::default()
    }

    /// Flatten into record attributes. Absent values are left out rather than nulled.
    pub fn to_attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        if self.is_empty() {
            return attributes;
        }

        attributes.insert(LINEAGE_HOPS_ATTR.to_owned(), Value::from(self.hops));

        let optional = [
            (DESCRIBED_CONTACT_ID_ATTR, &self.described_contact_id),
            (ORIGINAL_CHANNEL_ATTR, &self.original_channel),
            (AGENT_ID_ATTR, &self.agent_id),
            (AGENT_NAME_ATTR, &self.agent_name),
            (AGENT_USERNAME_ATTR, &self.agent_username),
            (CAMPAIGN_ID_ATTR, &self.campaign_id),
            (CAMPAIGN_NAME_ATTR, &self.campaign_name),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                attributes.insert(name.to_owned(), Value::String(value.clone()));
            }
        }
        for (name, value) in &self.timestamps {
            attributes.insert(name.clone(), Value::String(value.clone()));
        }

        attributes
    }
}

fn valid_timestamps(contact: &ContactRecord) -> BTreeMap<String, String> {
    TIMESTAMP_FIELDS
        .iter()
        .filter_map(|name| {
            let value = contact.timestamps.get(*name)?;
            match DateTime::parse_from_rfc3339(value) {
                Ok(_) => Some(((*name).to_owned(), value.clone())),
                Err(e) => {
                    warn!(field = name, "dropping unparseable timestamp: {}", e);
                    None
                }
            }
        })
        .collect()
}

pub struct LineageResolver<'a> {
    contacts: &'a dyn ContactDirectory,
    campaigns: &'a dyn CampaignDirectory,
    timeout: Duration,
}

impl<'a> LineageResolver<'a> {
    pub fn new(
        contacts: &'a dyn ContactDirectory,
        campaigns: &'a dyn CampaignDirectory,
        timeout: Duration,
    ) -> Self {
        Self {
            contacts,
            campaigns,
            timeout,
        }
    }

    /// Resolve the origin of the chain containing `start_id`. When the event already
    /// names the contact `start_id` came from, the walk starts there instead.
    pub async fn resolve(
        &self,
        instance_id: &str,
        start_id: &str,
        related_id: Option<&str>,
    ) -> LineageRecord {
        let first = related_id.filter(|id| !id.is_empty()).unwrap_or(start_id);

        match self.walk(instance_id, first).await {
            WalkEnd::Terminal {
                contact,
                hops,
                reason,
            } => {
                info!(
                    origin = %contact.id,
                    hops,
                    reason = reason.as_str(),
                    "lineage resolved"
                );
                metrics::counter!(LINEAGE_WALKS, "outcome" => reason.as_str()).increment(1);
                metrics::histogram!(LINEAGE_HOPS).record(hops as f64);
                self.describe_origin(instance_id, contact, hops).await
            }
            WalkEnd::Aborted {
                contact_id,
                hops,
                error,
            } => {
                error!(
                    contact_id = %contact_id,
                    hops,
                    class = error.class(),
                    "lineage walk aborted: {}",
                    error
                );
                metrics::counter!(LINEAGE_WALKS, "outcome" => "aborted").increment(1);
                LineageRecord::aborted(hops)
            }
        }
    }

    async fn walk(&self, instance_id: &str, first: &str) -> WalkEnd {
        let mut contact_id = first.to_owned();
        let mut hops = 0;

        loop {
            let fetched = with_timeout(
                "DescribeContact",
                self.timeout,
                self.contacts.describe_contact(instance_id, &contact_id),
            )
            .await;

            match step(&contact_id, hops, fetched) {
                Transition::Walk {
                    contact_id: next,
                    hops: next_hops,
                } => {
                    info!(from = %contact_id, to = %next, hop = next_hops, "following related contact");
                    contact_id = next;
                    hops = next_hops;
                }
                Transition::Stop(end) => return end,
            }
        }
    }

    async fn describe_origin(
        &self,
        instance_id: &str,
        contact: ContactRecord,
        hops: u32,
    ) -> LineageRecord {
        let mut record = LineageRecord {
            hops,
            timestamps: valid_timestamps(&contact),
            ..Default::default()
        };

        if let Some(agent_id) = contact.agent_id.as_deref() {
            record.agent_id = Some(agent_id.to_owned());
            let user = with_timeout(
                "DescribeUser",
                self.timeout,
                self.contacts.describe_user(instance_id, agent_id),
            )
            .await;
            match user {
                Ok(user) => {
                    record.agent_name = user.display_name();
                    record.agent_username = user.username.filter(|u| !u.is_empty());
                }
                Err(e) => error!(agent_id, class = e.class(), "agent lookup failed: {}", e),
            }
        }

        if let Some(campaign_id) = contact.campaign_id.as_deref() {
            record.campaign_id = Some(campaign_id.to_owned());
            let campaign = with_timeout(
                "DescribeCampaign",
                self.timeout,
                self.campaigns.describe_campaign(campaign_id),
            )
            .await;
            match campaign {
                Ok(campaign) => record.campaign_name = campaign.name.filter(|n| !n.is_empty()),
                Err(e) => error!(campaign_id, class = e.class(), "campaign lookup failed: {}", e),
            }
        }

        record.described_contact_id = Some(contact.id);
        record.original_channel = contact.channel;
        record
    }
}
