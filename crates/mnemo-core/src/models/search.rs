use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            date_range: None,
            topics: Vec::new(),
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        !self.keywords.is_empty() || self.date_range.is_some() || !self.topics.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// In `[0, 1]`.
    pub relevance_score: f64,
    pub timestamp: DateTime<Utc>,
    pub content_snippet: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn open_range_contains_everything() {
        assert!(DateRange::default().contains(Utc::now()));
    }

    #[test]
    fn bounded_range() {
        let now = Utc::now();
        let range = DateRange {
            start: Some(now - Duration::hours(1)),
            end: Some(now),
        };
        assert!(range.contains(now - Duration::minutes(30)));
        assert!(!range.contains(now + Duration::minutes(1)));
    }

    #[test]
    fn keyword_query_has_filters() {
        assert!(SearchQuery::keywords(["rust"]).has_filters());
        assert!(!SearchQuery::default().has_filters());
        assert_eq!(SearchQuery::default().limit, 20);
    }
}
