//! Non-negative day-fact deltas between successive snapshots

use chrono::NaiveDate;

use crate::models::{ChannelDayFact, ChannelSnapshot, ItemDayFact, ItemSnapshot};

/// Growth of one counter since the previous snapshot
///
/// Zero when there is no baseline, when either side is unavailable, or when
/// the counter went down.
pub fn counter_delta(current: Option<u64>, previous: Option<u64>) -> u64 {
    match (current, previous) {
        (Some(current), Some(previous)) => current.saturating_sub(previous),
        _ => 0,
    }
}

pub fn channel_day_fact(
    current: &ChannelSnapshot,
    previous: Option<&ChannelSnapshot>,
    day: NaiveDate,
) -> ChannelDayFact {
    ChannelDayFact {
        channel_id: current.id.clone(),
        day,
        views: counter_delta(Some(current.view_count), previous.map(|p| p.view_count)),
        subscribers: counter_delta(
            current.subscriber_count,
            previous.and_then(|p| p.subscriber_count),
        ),
        videos: counter_delta(Some(current.video_count), previous.map(|p| p.video_count)),
    }
}

pub fn item_day_fact(
    current: &ItemSnapshot,
    previous: Option<&ItemSnapshot>,
    day: NaiveDate,
) -> ItemDayFact {
    ItemDayFact {
        item_id: current.id.clone(),
        channel_id: current.channel_id.clone(),
        day,
        views: counter_delta(Some(current.view_count), previous.map(|p| p.view_count)),
        likes: counter_delta(current.like_count, previous.and_then(|p| p.like_count)),
        comments: counter_delta(current.comment_count, previous.and_then(|p| p.comment_count)),
    }
}
