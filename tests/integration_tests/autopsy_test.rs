//! Channel autopsy on scheduled and human upload histories

use chrono::{DateTime, Duration, Utc};

use obscura::autopsy::ChannelAutopsy;
use obscura::error::Error;
use obscura::models::{MediaRecord, SourceKind, UploadPattern};
use obscura::sources::MemorySource;

use crate::common::{engine_with, fixed_now, test_config, vid};

fn uploads_at(offsets_hours: &[i64]) -> Vec<MediaRecord> {
    let start = fixed_now() - Duration::days(60);
    offsets_hours
        .iter()
        .enumerate()
        .map(|(i, hours)| {
            MediaRecord::video(vid(i), SourceKind::Api)
                .with_title(format!("Day at the lake, part {}", i + 1))
                .with_duration(60 + 37 * i as u64)
                .with_uploaded_at(start + Duration::hours(*hours))
        })
        .collect()
}

#[tokio::test]
async fn test_every_four_hours_reads_as_bot() {
    let offsets: Vec<i64> = (0..12).map(|i| i * 4).collect();
    let engine = engine_with(
        test_config(),
        vec![MemorySource::new(SourceKind::Api).with_uploads("UCclockwork", uploads_at(&offsets))],
    );

    let fingerprint = engine.autopsy("UCclockwork").await.unwrap();

    assert_eq!(fingerprint.bot_likelihood, 100);
    assert_eq!(fingerprint.interval_variance_score, Some(0.0));
    assert!(fingerprint
        .flags
        .iter()
        .any(|flag| flag == "UNIFORM_INTERVALS"));
    assert_eq!(fingerprint.upload_timestamps.len(), 12);
    assert!(fingerprint.dormant_days.is_some_and(|days| days > 0));
}

#[tokio::test]
async fn test_irregular_uploads_read_as_human() {
    let offsets = [0, 2, 30, 31, 100, 107, 300, 410];
    let engine = engine_with(
        test_config(),
        vec![MemorySource::new(SourceKind::Api).with_uploads("UCfamily", uploads_at(&offsets))],
    );

    let fingerprint = engine.autopsy("UCfamily").await.unwrap();

    assert!(fingerprint.bot_likelihood < 20);
    assert!(fingerprint.interval_variance_score.unwrap() >= 0.5);
    assert_eq!(fingerprint.pattern, UploadPattern::Human);
}

#[tokio::test]
async fn test_unknown_channel_propagates_not_found() {
    let engine = engine_with(test_config(), vec![MemorySource::new(SourceKind::Api)]);
    let err = engine.autopsy("UCnobody").await.unwrap_err();
    assert!(matches!(err, Error::Source(_)));
}

#[test]
fn test_single_upload_has_neutral_likelihood() {
    let autopsy = ChannelAutopsy::default();
    let at: DateTime<Utc> = fixed_now() - Duration::days(3);

    let fingerprint = autopsy.analyze("UClonely", &[at], fixed_now());

    assert_eq!(fingerprint.interval_variance_score, None);
    assert_eq!(fingerprint.bot_likelihood, 50);
    assert_eq!(fingerprint.pattern, UploadPattern::Unknown);
    assert_eq!(fingerprint.dormant_days, Some(3));
}

#[test]
fn test_burst_day_detected() {
    let autopsy = ChannelAutopsy::default();
    let start = fixed_now() - Duration::days(30);
    let mut timestamps: Vec<DateTime<Utc>> =
        (0..10).map(|day| start + Duration::days(day * 3)).collect();
    // Five uploads within one afternoon
    timestamps.extend((0..5).map(|i| start + Duration::days(7) + Duration::minutes(10 * i)));

    let fingerprint = autopsy.analyze("UCbursty", &timestamps, fixed_now());

    assert_eq!(fingerprint.burst_days.len(), 1);
    assert!(fingerprint.flags.iter().any(|flag| flag == "BURST_DAYS:1"));
}
