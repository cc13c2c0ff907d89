//! Keyword-based natural-language query parser.
//!
//! Maps a sanitized query onto one of the registered public-data sources
//! (R-ONE real-estate statistics, NEC election data, YouTube) and pulls out
//! the filters the data clients understand: year, region and result limit.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::types::{ParsedQuery, QueryIntent, QueryOutputFormat, SourceDescriptor};

struct IntentProfile {
    intent: QueryIntent,
    api: &'static str,
    keywords: &'static [&'static str],
}

const PROFILES: &[IntentProfile] = &[
    IntentProfile {
        intent: QueryIntent::Statistics,
        api: "rone",
        keywords: &[
            "통계", "부동산", "아파트", "매매", "전세", "월세", "가격", "지수", "주택",
            "statistics", "price", "index", "housing", "apartment", "rent",
        ],
    },
    IntentProfile {
        intent: QueryIntent::Election,
        api: "nec",
        keywords: &[
            "선거", "후보", "투표", "득표", "당선", "개표", "election", "candidate", "vote",
            "ballot", "turnout",
        ],
    },
    IntentProfile {
        intent: QueryIntent::Video,
        api: "youtube",
        keywords: &[
            "유튜브", "영상", "동영상", "채널", "조회수", "youtube", "video", "channel", "views",
        ],
    },
];

const REGIONS: &[&str] = &[
    "서울", "부산", "대구", "인천", "광주", "대전", "울산", "세종", "경기", "강원", "충북",
    "충남", "전북", "전남", "경북", "경남", "제주",
];

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})(?:년)?").expect("static regex"));
static LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:top\s*(\d{1,3}))|(?:상위\s*(\d{1,3}))|(?:(\d{1,3})\s*개)")
        .expect("static regex")
});

fn count_hits(haystack: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| haystack.contains(*k)).count()
}

fn output_format(lower: &str) -> QueryOutputFormat {
    if lower.contains("csv") {
        QueryOutputFormat::Csv
    } else if lower.contains("json") {
        QueryOutputFormat::Json
    } else if ["chart", "graph", "차트", "그래프", "추이"]
        .iter()
        .any(|k| lower.contains(k))
    {
        QueryOutputFormat::Chart
    } else {
        QueryOutputFormat::Table
    }
}

fn filters(query: &str) -> Map<String, Value> {
    let mut filters = Map::new();

    let years: Vec<Value> = YEAR
        .captures_iter(query)
        .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .map(Value::from)
        .collect();
    match years.len() {
        0 => {}
        1 => {
            filters.insert("year".into(), years[0].clone());
        }
        _ => {
            filters.insert("years".into(), Value::Array(years));
        }
    }

    let regions: Vec<Value> = REGIONS
        .iter()
        .filter(|r| query.contains(*r))
        .map(|r| Value::from(*r))
        .collect();
    if !regions.is_empty() {
        filters.insert("regions".into(), Value::Array(regions));
    }

    if let Some(limit) = LIMIT.captures(query).and_then(|c| {
        c.iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| m.as_str().parse::<u32>().ok())
    }) {
        filters.insert("limit".into(), Value::from(limit));
    }

    filters
}

/// Parses an already-sanitized query.
///
/// Confidence is the winning profile's share of all keyword hits, scaled down
/// when only a single keyword matched. Ties resolve in profile order.
pub fn parse_query(query: &str) -> ParsedQuery {
    let lower = query.to_lowercase();

    let scored: Vec<(&IntentProfile, usize)> = PROFILES
        .iter()
        .map(|p| (p, count_hits(&lower, p.keywords)))
        .collect();
    let total: usize = scored.iter().map(|(_, n)| n).sum();
    let best = scored
        .iter()
        .fold(None::<&(&IntentProfile, usize)>, |acc, cur| match acc {
            Some(a) if a.1 >= cur.1 => Some(a),
            _ => Some(cur),
        })
        .filter(|(_, n)| *n > 0);

    let (intent, source, confidence) = match best {
        Some((profile, hits)) => {
            let share = *hits as f64 / total as f64;
            let strength = if *hits >= 2 { 1.0 } else { 0.75 };
            (
                profile.intent,
                Some(SourceDescriptor {
                    api: profile.api.to_string(),
                    dataset: None,
                }),
                (share * strength * 100.0).round() / 100.0,
            )
        }
        None => (QueryIntent::Unknown, None, 0.0),
    };

    ParsedQuery {
        intent,
        confidence,
        source,
        filters: filters(query),
        output_format: output_format(&lower),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_estate_query_maps_to_rone() {
        let parsed = parse_query("2023년 서울 아파트 매매 가격 지수 차트");
        assert_eq!(parsed.intent, QueryIntent::Statistics);
        assert_eq!(parsed.source.as_ref().unwrap().api, "rone");
        assert_eq!(parsed.filters["year"], 2023);
        assert_eq!(parsed.filters["regions"][0], "서울");
        assert_eq!(parsed.output_format, QueryOutputFormat::Chart);
        assert!(parsed.confidence > 0.9);
    }

    #[test]
    fn election_query_with_limit_and_csv() {
        let parsed = parse_query("top 10 candidates by vote in 2020 and 2024 election as csv");
        assert_eq!(parsed.intent, QueryIntent::Election);
        assert_eq!(parsed.filters["limit"], 10);
        assert_eq!(parsed.filters["years"], serde_json::json!([2020, 2024]));
        assert_eq!(parsed.output_format, QueryOutputFormat::Csv);
    }

    #[test]
    fn single_keyword_lowers_confidence() {
        let parsed = parse_query("유튜브 인기");
        assert_eq!(parsed.intent, QueryIntent::Video);
        assert_eq!(parsed.confidence, 0.75);
    }

    #[test]
    fn unrelated_query_is_unknown() {
        let parsed = parse_query("hello there");
        assert_eq!(parsed.intent, QueryIntent::Unknown);
        assert!(parsed.source.is_none());
        assert_eq!(parsed.confidence, 0.0);
        assert_eq!(parsed.output_format, QueryOutputFormat::Table);
    }
}
