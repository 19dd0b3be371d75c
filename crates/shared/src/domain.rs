use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(SongId);

pub const DEFAULT_RELAY_CHANNEL_COUNT: u8 = 6;

/// One physical relay/breaker on the device adapter, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelayChannel(pub u8);

impl fmt::Display for RelayChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RelayState::On => "ON",
            RelayState::Off => "OFF",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid relay state '{0}' (expected 'on' or 'off')")]
pub struct InvalidRelayState(pub String);

impl FromStr for RelayState {
    type Err = InvalidRelayState;

    // Exact match only; the device adapter rejects anything else.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(RelayState::On),
            "off" => Ok(RelayState::Off),
            other => Err(InvalidRelayState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayGroup {
    pub name: String,
    pub label: String,
    pub channels: Vec<RelayChannel>,
}

impl RelayGroup {
    pub fn new(name: impl Into<String>, channels: impl IntoIterator<Item = u8>) -> Self {
        let name = name.into();
        Self {
            label: name.to_uppercase(),
            name,
            channels: channels.into_iter().map(RelayChannel).collect(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("relay channel count must be at least 1")]
    NoChannels,
    #[error("relay group name must not be empty")]
    EmptyGroupName,
    #[error("relay group '{0}' has no channels")]
    EmptyGroup(String),
    #[error("relay group '{0}' is defined more than once")]
    DuplicateGroup(String),
    #[error("relay group '{group}' references channel {channel} outside 1..={max}")]
    ChannelOutOfRange { group: String, channel: u8, max: u8 },
}

/// Static channel range and named groups. Built once at startup and shared
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLayout {
    channel_count: u8,
    groups: Vec<RelayGroup>,
}

impl RelayLayout {
    pub fn new(channel_count: u8, groups: Vec<RelayGroup>) -> Result<Self, LayoutError> {
        if channel_count == 0 {
            return Err(LayoutError::NoChannels);
        }
        let mut seen = HashSet::new();
        for group in &groups {
            if group.name.trim().is_empty() {
                return Err(LayoutError::EmptyGroupName);
            }
            if group.channels.is_empty() {
                return Err(LayoutError::EmptyGroup(group.name.clone()));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(LayoutError::DuplicateGroup(group.name.clone()));
            }
            if let Some(channel) = group
                .channels
                .iter()
                .find(|channel| channel.0 == 0 || channel.0 > channel_count)
            {
                return Err(LayoutError::ChannelOutOfRange {
                    group: group.name.clone(),
                    channel: channel.0,
                    max: channel_count,
                });
            }
        }
        Ok(Self {
            channel_count,
            groups,
        })
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    pub fn groups(&self) -> &[RelayGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&RelayGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn channel(&self, number: i64) -> Option<RelayChannel> {
        u8::try_from(number)
            .ok()
            .filter(|n| (1..=self.channel_count).contains(n))
            .map(RelayChannel)
    }
}

impl Default for RelayLayout {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_RELAY_CHANNEL_COUNT,
            groups: vec![
                RelayGroup::new("frente", [1, 2]),
                RelayGroup::new("meio", [3, 4]),
                RelayGroup::new("fundo", [5, 6]),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub content: String,
    pub categories: Option<String>,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
