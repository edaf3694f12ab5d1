use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use super::PriorityLabel;

/// Elapsed time between when a mail was sent and when it is scored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgeBand {
    Recent, // < 6h, also used when the timestamp is unusable
    Aging,  // 6h..12h
    Stale,  // 12h..24h
    Old,    // >= 24h
}

impl AgeBand {
    pub fn from_age(age: TimeDelta) -> Self {
        if age < TimeDelta::hours(6) {
            AgeBand::Recent
        } else if age < TimeDelta::hours(12) {
            AgeBand::Aging
        } else if age < TimeDelta::hours(24) {
            AgeBand::Stale
        } else {
            AgeBand::Old
        }
    }

    pub fn multiplier(self) -> f64 {
        match self {
            AgeBand::Recent => 1.0,
            AgeBand::Aging => 1.2,
            AgeBand::Stale => 1.5,
            AgeBand::Old => 2.0,
        }
    }
}

/// Parse a free-text sent timestamp. Accepts RFC 3339, RFC 2822 (mail
/// `Date:` header) and naive `YYYY-MM-DD HH:MM:SS` read as UTC.
pub fn parse_sent_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Classify the age of an event. Never fails: a missing, unparseable or
/// future timestamp is treated as recent and logged.
pub fn age_band(sent_at: Option<&str>, now: DateTime<Utc>) -> AgeBand {
    let Some(raw) = sent_at.map(str::trim).filter(|s| !s.is_empty()) else {
        tracing::warn!("sent timestamp missing, scoring as recent");
        return AgeBand::Recent;
    };
    let Some(sent) = parse_sent_at(raw) else {
        tracing::warn!(sent_at = raw, "unparseable sent timestamp, scoring as recent");
        return AgeBand::Recent;
    };
    let age = now - sent;
    if age < TimeDelta::zero() {
        tracing::warn!(sent_at = raw, %now, "sent timestamp is in the future, scoring as recent");
        return AgeBand::Recent;
    }
    AgeBand::from_age(age)
}

/// Priority- and age-weighted score of a single event.
pub fn score(priority: PriorityLabel, sent_at: Option<&str>, now: DateTime<Utc>) -> u64 {
    let weighted = priority.base_score() as f64 * age_band(sent_at, now).multiplier();
    weighted.round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-07-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn hours_ago(h: i64) -> String {
        (now() - TimeDelta::hours(h)).to_rfc3339()
    }

    #[test]
    fn high_priority_grows_with_age() {
        let scores: Vec<u64> = [1, 7, 13, 25]
            .iter()
            .map(|h| score(PriorityLabel::High, Some(&hours_ago(*h)), now()))
            .collect();
        assert_eq!(scores, vec![5, 6, 8, 10]);
    }

    #[test]
    fn score_is_non_decreasing_across_bands() {
        for p in [PriorityLabel::High, PriorityLabel::Medium, PriorityLabel::Low] {
            let mut last = 0;
            for h in 0..48 {
                let s = score(p, Some(&hours_ago(h)), now());
                assert!(s >= last, "{p} dropped at {h}h: {s} < {last}");
                last = s;
            }
        }
    }

    #[test]
    fn low_and_medium_round_half_away_from_zero() {
        assert_eq!(score(PriorityLabel::Low, Some(&hours_ago(7)), now()), 1);
        assert_eq!(score(PriorityLabel::Low, Some(&hours_ago(13)), now()), 2);
        assert_eq!(score(PriorityLabel::Medium, Some(&hours_ago(7)), now()), 2);
        assert_eq!(score(PriorityLabel::Medium, Some(&hours_ago(13)), now()), 3);
        assert_eq!(score(PriorityLabel::Medium, Some(&hours_ago(30)), now()), 4);
    }

    #[test]
    fn band_edges_are_half_open() {
        assert_eq!(AgeBand::from_age(TimeDelta::hours(6)), AgeBand::Aging);
        assert_eq!(AgeBand::from_age(TimeDelta::hours(12)), AgeBand::Stale);
        assert_eq!(AgeBand::from_age(TimeDelta::hours(24)), AgeBand::Old);
        assert_eq!(
            AgeBand::from_age(TimeDelta::hours(6) - TimeDelta::seconds(1)),
            AgeBand::Recent
        );
    }

    #[test]
    fn unusable_timestamps_fall_back_to_recent() {
        assert_eq!(score(PriorityLabel::High, Some("yesterday-ish"), now()), 5);
        assert_eq!(score(PriorityLabel::High, None, now()), 5);
        assert_eq!(score(PriorityLabel::High, Some("   "), now()), 5);
        let future = (now() + TimeDelta::hours(30)).to_rfc3339();
        assert_eq!(score(PriorityLabel::High, Some(&future), now()), 5);
    }

    #[test]
    fn parses_mail_header_dates() {
        let t = parse_sent_at("Tue, 1 Jul 2025 01:00:00 +0000").unwrap();
        assert_eq!(AgeBand::from_age(now() - t), AgeBand::Aging);
        assert!(parse_sent_at("2025-07-01 11:00:00").is_some());
    }
}
