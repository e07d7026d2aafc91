//! Final shaping of accumulated data into an [`IndexedSource`].

use crate::ingestor::accumulator::AccumulatedSource;
use crate::ingestor::xmltv_parser::XmltvChannel;
use crate::models::{ChannelProgramIndex, ChannelRecord, IndexedSource, ProgramRecord};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostProcessStats {
    pub channels_capped: usize,
    pub programs_discarded: usize,
}

/// Project a parsed channel: first display name is primary, the rest alternates.
pub fn project_channel(channel: XmltvChannel) -> ChannelRecord {
    let mut names = channel.display_names.into_iter();
    let primary_name = names.next().unwrap_or_else(|| channel.id.clone());
    ChannelRecord {
        id: channel.id,
        primary_name,
        alternate_names: names.collect(),
        icon_url: channel.icon,
    }
}

/// Sort by start (stable) and keep the `max` earliest. Returns how many were dropped.
pub fn cap_channel_programs(programs: &mut Vec<ProgramRecord>, max: usize) -> usize {
    programs.sort_by_key(|program| program.start);
    let discarded = programs.len().saturating_sub(max);
    programs.truncate(max);
    discarded
}

pub fn post_process(
    accumulated: AccumulatedSource,
    max_programs_per_channel: usize,
) -> (IndexedSource, PostProcessStats) {
    let mut stats = PostProcessStats::default();
    let mut program_map: ChannelProgramIndex = accumulated.programs;

    for (channel_id, programs) in program_map.iter_mut() {
        let discarded = cap_channel_programs(programs, max_programs_per_channel);
        if discarded > 0 {
            stats.channels_capped += 1;
            stats.programs_discarded += discarded;
            debug!(
                "Channel '{}' capped at {} programmes, discarded {}",
                channel_id, max_programs_per_channel, discarded
            );
        }
    }

    if stats.programs_discarded > 0 {
        info!(
            "Discarded {} programmes beyond the per-channel limit of {} across {} channels",
            stats.programs_discarded, max_programs_per_channel, stats.channels_capped
        );
    }

    let channels: Vec<ChannelRecord> = accumulated
        .channels
        .into_iter()
        .map(project_channel)
        .collect();

    let mut channel_map = BTreeMap::new();
    for channel in &channels {
        channel_map.insert(channel.id.clone(), channel.clone());
    }

    let programs = program_map.values().flatten().cloned().collect();

    (
        IndexedSource {
            channels,
            programs,
            channel_map,
            program_map,
        },
        stats,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestor::accumulator::AccumulatorStats;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn program(channel: &str, minute_offset: i64, title: &str) -> ProgramRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute_offset);
        ProgramRecord {
            channel_id: channel.to_string(),
            start,
            stop: start + Duration::minutes(30),
            title: title.to_string(),
            description: None,
            category: None,
        }
    }

    #[test]
    fn test_projection_falls_back_to_id() {
        let record = project_channel(XmltvChannel {
            id: "c1".to_string(),
            display_names: vec![],
            icon: Some("http://example.com/c1.png".to_string()),
        });
        assert_eq!(record.primary_name, "c1");
        assert!(record.alternate_names.is_empty());
        assert_eq!(record.icon_url.as_deref(), Some("http://example.com/c1.png"));

        let record = project_channel(XmltvChannel {
            id: "c2".to_string(),
            display_names: vec!["Two".to_string(), "2".to_string(), "TWO HD".to_string()],
            icon: None,
        });
        assert_eq!(record.primary_name, "Two");
        assert_eq!(record.alternate_names, vec!["2", "TWO HD"]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_starts() {
        let mut programs = vec![
            program("a", 60, "late"),
            program("a", 0, "first"),
            program("a", 0, "second"),
        ];
        cap_channel_programs(&mut programs, 10);
        let titles: Vec<_> = programs.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_programs_follow_program_map_key_order() {
        let mut programs = ChannelProgramIndex::new();
        programs.insert("b".to_string(), vec![program("b", 0, "b0")]);
        programs.insert(
            "a".to_string(),
            vec![program("a", 30, "a1"), program("a", 0, "a0")],
        );

        let (source, stats) = post_process(
            AccumulatedSource {
                channels: vec![],
                programs,
                stats: AccumulatorStats::default(),
            },
            1,
        );

        let titles: Vec<_> = source.programs.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["a0", "b0"]);
        assert_eq!(stats.programs_discarded, 1);
        assert_eq!(stats.channels_capped, 1);
    }

    proptest! {
        #[test]
        fn prop_cap_keeps_earliest_in_order(
            offsets in proptest::collection::vec(0i64..100_000, 0..200),
            max in 1usize..50,
        ) {
            let mut programs: Vec<_> = offsets
                .iter()
                .map(|offset| program("c", *offset, "t"))
                .collect();

            let discarded = cap_channel_programs(&mut programs, max);

            let mut expected = offsets.clone();
            expected.sort();
            expected.truncate(max);

            prop_assert_eq!(programs.len(), offsets.len().min(max));
            prop_assert_eq!(discarded, offsets.len().saturating_sub(max));
            let starts: Vec<_> = programs
                .iter()
                .map(|p| (p.start - Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).num_minutes())
                .collect();
            prop_assert_eq!(starts, expected);
        }
    }
}
