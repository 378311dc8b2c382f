//! YouTube API response normalization
//!
//! Converts API responses to channel and item snapshots.

use super::api::{Channel, Video};
use crate::models::{ChannelSnapshot, ItemSnapshot};

/// Normalize a `channels.list` item
///
/// A hidden subscriber count becomes `None` rather than zero.
pub fn normalize_channel(channel: Channel) -> ChannelSnapshot {
    let stats = channel.statistics;
    let subscriber_count = stats
        .as_ref()
        .filter(|s| !s.hidden_subscriber_count)
        .and_then(|s| parse_count(s.subscriber_count.as_deref()));

    ChannelSnapshot {
        id: channel.id,
        name: channel.snippet.title,
        description: channel.snippet.description,
        subscriber_count,
        video_count: stats
            .as_ref()
            .and_then(|s| parse_count(s.video_count.as_deref()))
            .unwrap_or(0),
        view_count: stats
            .as_ref()
            .and_then(|s| parse_count(s.view_count.as_deref()))
            .unwrap_or(0),
        created_at: channel.snippet.published_at,
    }
}

/// Normalize a `videos.list` item
pub fn normalize_video(video: Video) -> ItemSnapshot {
    let stats = video.statistics;
    let duration_seconds = video
        .content_details
        .and_then(|d| d.duration)
        .and_then(|d| parse_duration_seconds(&d))
        .unwrap_or(0);

    ItemSnapshot {
        id: video.id,
        channel_id: video.snippet.channel_id,
        title: video.snippet.title,
        view_count: stats
            .as_ref()
            .and_then(|s| parse_count(s.view_count.as_deref()))
            .unwrap_or(0),
        like_count: stats
            .as_ref()
            .and_then(|s| parse_count(s.like_count.as_deref())),
        comment_count: stats
            .as_ref()
            .and_then(|s| parse_count(s.comment_count.as_deref())),
        published_at: video.snippet.published_at,
        duration_seconds,
    }
}

/// Parse a decimal counter string
pub fn parse_count(value: Option<&str>) -> Option<u64> {
    value?.trim().parse().ok()
}

/// Parse an ISO-8601 duration such as `PT1H2M3S` or `P1DT5M` into seconds
///
/// Returns `None` for anything that isn't a day/time duration.
pub fn parse_duration_seconds(value: &str) -> Option<u64> {
    let rest = value.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut total = 0u64;
    total += sum_units(date_part, |unit| match unit {
        'W' => Some(7 * 86_400),
        'D' => Some(86_400),
        _ => None,
    })?;
    total += sum_units(time_part, |unit| match unit {
        'H' => Some(3_600),
        'M' => Some(60),
        'S' => Some(1),
        _ => None,
    })?;
    Some(total)
}

fn sum_units(part: &str, unit_seconds: impl Fn(char) -> Option<u64>) -> Option<u64> {
    let mut total = 0u64;
    let mut digits = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            let amount: u64 = digits.parse().ok()?;
            total = total.checked_add(amount.checked_mul(unit_seconds(c)?)?)?;
            digits.clear();
        }
    }
    // Trailing digits without a unit
    if !digits.is_empty() {
        return None;
    }
    Some(total)
}
