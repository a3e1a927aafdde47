//! Channel classification

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DepotError;

/// Logical class of channels sharing allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKindId {
    System,
    Data,
    Log,
}

impl fmt::Display for ChannelKindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKindId::System => "system",
            ChannelKindId::Data => "data",
            ChannelKindId::Log => "log",
        };
        f.write_str(name)
    }
}

impl FromStr for ChannelKindId {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(ChannelKindId::System),
            "data" => Ok(ChannelKindId::Data),
            "log" => Ok(ChannelKindId::Log),
            other => Err(DepotError::Config(format!("unknown channel kind: {}", other))),
        }
    }
}

/// A physical channel and the storage group currently backing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub channel: u8,
    pub group_id: u32,
}

/// One row of the channel-kind table handed out on registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelKindEntry {
    pub kind: ChannelKindId,
    pub channel_groups: Vec<ChannelGroup>,
}

/// Parses `kind=channel@group,channel@group`, e.g. `data=2@2001,3@2002`
impl FromStr for ChannelKindEntry {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once('=')
            .ok_or_else(|| DepotError::Config(format!("expected kind=channels, got {}", s)))?;
        let kind: ChannelKindId = kind.trim().parse()?;

        let mut channel_groups = Vec::new();
        for part in rest.split(',').filter(|p| !p.trim().is_empty()) {
            let (channel, group) = part.trim().split_once('@').ok_or_else(|| {
                DepotError::Config(format!("expected channel@group, got {}", part))
            })?;
            let channel = channel
                .parse::<u8>()
                .map_err(|e| DepotError::Config(format!("bad channel {}: {}", channel, e)))?;
            let group_id = group
                .parse::<u32>()
                .map_err(|e| DepotError::Config(format!("bad group id {}: {}", group, e)))?;
            channel_groups.push(ChannelGroup { channel, group_id });
        }

        if channel_groups.is_empty() {
            return Err(DepotError::Config(format!("kind {} has no channels", kind)));
        }

        Ok(Self {
            kind,
            channel_groups,
        })
    }
}
