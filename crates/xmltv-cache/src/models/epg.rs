use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Channel as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub id: String,
    pub primary_name: String,
    #[serde(default)]
    pub alternate_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

impl ChannelRecord {
    /// Case-insensitive substring match over the primary and alternate names.
    ///
    /// `needle` must already be lowercased.
    fn matches_lowercase(&self, needle: &str) -> bool {
        self.primary_name.to_lowercase().contains(needle)
            || self
                .alternate_names
                .iter()
                .any(|name| name.to_lowercase().contains(needle))
    }
}

/// One scheduled programme. `stop >= start` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRecord {
    pub channel_id: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Programmes bucketed by channel id, each bucket sorted by `start`.
pub type ChannelProgramIndex = BTreeMap<String, Vec<ProgramRecord>>;

/// The fully indexed result of one ingestion or cache reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedSource {
    pub channels: Vec<ChannelRecord>,
    pub programs: Vec<ProgramRecord>,
    pub channel_map: BTreeMap<String, ChannelRecord>,
    pub program_map: ChannelProgramIndex,
}

impl IndexedSource {
    pub fn channel(&self, id: &str) -> Option<&ChannelRecord> {
        self.channel_map.get(id)
    }

    /// Programmes for one channel, ordered by start time.
    pub fn programs_for_channel(&self, channel_id: &str) -> &[ProgramRecord] {
        self.program_map
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Channels whose primary or alternate name contains `term`, ignoring case.
    pub fn search_channels(&self, term: &str) -> Vec<&ChannelRecord> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.channels
            .iter()
            .filter(|channel| channel.matches_lowercase(&needle))
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.program_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str, primary: &str, alternates: &[&str]) -> ChannelRecord {
        ChannelRecord {
            id: id.to_string(),
            primary_name: primary.to_string(),
            alternate_names: alternates.iter().map(|s| s.to_string()).collect(),
            icon_url: None,
        }
    }

    #[test]
    fn test_search_channels_matches_alternate_names() {
        let source = IndexedSource {
            channels: vec![
                channel("bbc1", "BBC One", &["BBC1 HD"]),
                channel("itv", "ITV", &["ITV1"]),
            ],
            ..IndexedSource::default()
        };

        let hits: Vec<_> = source.search_channels("hd").iter().map(|c| c.id.as_str()).collect();
        assert_eq!(hits, vec!["bbc1"]);
        assert_eq!(source.search_channels("itv").len(), 1);
        assert!(source.search_channels("   ").is_empty());
    }

    #[test]
    fn test_programs_for_unknown_channel_is_empty() {
        let source = IndexedSource::default();
        assert!(source.programs_for_channel("nope").is_empty());
        assert!(source.is_empty());
    }

    #[test]
    fn test_optional_fields_omitted_from_json() {
        let record = channel("a", "A", &[]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["primaryName"], "A");
        assert!(json.get("iconUrl").is_none());
    }
}
