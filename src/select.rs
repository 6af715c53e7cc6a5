//! Publisher selection over the identifier index.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use regex::Regex;

use crate::index::IndexEntry;

/// Per-publisher rollup for the `--show-index` report.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSummary {
    pub publisher: String,
    pub display: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub issues: usize,
    pub matched: bool,
}

/// The display form a pattern is matched against: the publisher title alone,
/// or `title | alternate` when a distinct alternate title exists.
pub fn display_form(publisher: &str, publisher_alt: &str) -> String {
    if publisher_alt.is_empty() || publisher_alt == publisher {
        publisher.to_string()
    } else {
        format!("{publisher} | {publisher_alt}")
    }
}

/// Distinct publisher names whose display form matches `pattern`, sorted.
pub fn select_publishers(index: &[IndexEntry], pattern: &Regex) -> Vec<String> {
    let mut matched: Vec<String> = summarize(index, pattern)
        .into_iter()
        .filter(|s| s.matched)
        .map(|s| s.publisher)
        .collect();
    matched.sort();
    matched
}

/// One summary per distinct publisher, sorted by name.
pub fn summarize(index: &[IndexEntry], pattern: &Regex) -> Vec<PublisherSummary> {
    let mut by_publisher: BTreeMap<&str, PublisherSummary> = BTreeMap::new();
    for entry in index {
        by_publisher
            .entry(&entry.publisher)
            .and_modify(|s| {
                s.first_date = s.first_date.min(entry.date);
                s.last_date = s.last_date.max(entry.date);
                s.issues += 1;
            })
            .or_insert_with(|| {
                let display = display_form(&entry.publisher, &entry.publisher_alt);
                PublisherSummary {
                    publisher: entry.publisher.clone(),
                    matched: pattern.is_match(&display),
                    display,
                    first_date: entry.date,
                    last_date: entry.date,
                    issues: 1,
                }
            });
    }
    by_publisher.into_values().collect()
}

/// Render the `--show-index` report.
pub fn render_summary(summaries: &[PublisherSummary]) -> String {
    let mut out = String::new();
    for s in summaries {
        let marker = if s.matched { "*" } else { " " };
        out.push_str(&format!(
            "{marker} {display}: {first} .. {last} ({issues} issues)\n",
            display = s.display,
            first = s.first_date,
            last = s.last_date,
            issues = s.issues,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(identifier: &str, publisher: &str, alt: &str, date: (i32, u32, u32)) -> IndexEntry {
        IndexEntry {
            identifier: identifier.to_string(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            publisher: publisher.to_string(),
            publisher_alt: alt.to_string(),
            harvest_timestamp: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn sample() -> Vec<IndexEntry> {
        vec![
            entry("id1", "NRC", "NRC Handelsblad", (1930, 5, 1)),
            entry("id2", "NRC", "NRC Handelsblad", (1931, 2, 1)),
            entry("id3", "De Tijd", "", (1930, 8, 1)),
        ]
    }

    #[test]
    fn display_forms() {
        assert_eq!(display_form("NRC", "NRC Handelsblad"), "NRC | NRC Handelsblad");
        assert_eq!(display_form("De Tijd", ""), "De Tijd");
        assert_eq!(display_form("Trouw", "Trouw"), "Trouw");
    }

    #[test]
    fn pattern_matches_against_display_form() {
        let index = sample();
        // matches only through the alternate title
        let matched = select_publishers(&index, &Regex::new("Handelsblad").unwrap());
        assert_eq!(matched, vec!["NRC".to_string()]);
        assert!(select_publishers(&index, &Regex::new("Telegraaf").unwrap()).is_empty());
    }

    #[test]
    fn summaries_roll_up_dates_and_counts() {
        let index = sample();
        let summaries = summarize(&index, &Regex::new("NRC").unwrap());
        assert_eq!(summaries.len(), 2);

        let nrc = summaries.iter().find(|s| s.publisher == "NRC").unwrap();
        assert_eq!(nrc.issues, 2);
        assert_eq!(nrc.first_date, NaiveDate::from_ymd_opt(1930, 5, 1).unwrap());
        assert_eq!(nrc.last_date, NaiveDate::from_ymd_opt(1931, 2, 1).unwrap());
        assert!(nrc.matched);

        let tijd = summaries.iter().find(|s| s.publisher == "De Tijd").unwrap();
        assert!(!tijd.matched);
    }

    #[test]
    fn report_marks_matches() {
        let index = sample();
        let report = render_summary(&summarize(&index, &Regex::new("Tijd").unwrap()));
        assert!(report.contains("* De Tijd: 1930-08-01 .. 1930-08-01 (1 issues)"));
        assert!(report.contains("  NRC | NRC Handelsblad"));
    }
}
