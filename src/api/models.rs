//! Request and response bodies of the operator API

use crate::infrastructure::audit_store::{
    BinaryFileRecord, ListLimit, RequestFilter, RequestRecord, ResponseRecord,
};
use crate::providers::canned::OverrideAction;
use crate::proxy::types::ExchangeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query string of `GET /api/requests`.
///
/// Parsing is lenient: values that do not parse fall back to "no filter" or
/// the default page.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub provider: Option<String>,
    pub path_pattern: Option<String>,
    /// Unix seconds
    pub date_from: Option<String>,
    /// Unix seconds
    pub date_to: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListQuery {
    pub fn into_filter(self) -> RequestFilter {
        RequestFilter {
            provider: self.provider.filter(|p| !p.is_empty()),
            path_pattern: self.path_pattern.filter(|p| !p.is_empty()),
            date_from: self.date_from.as_deref().and_then(parse_unix_seconds),
            date_to: self.date_to.as_deref().and_then(parse_unix_seconds),
            limit: self
                .limit
                .as_deref()
                .and_then(|l| l.parse::<u32>().ok())
                .and_then(|l| ListLimit::try_new(l).ok())
                .unwrap_or_default(),
            offset: self
                .offset
                .as_deref()
                .and_then(|o| o.parse().ok())
                .unwrap_or(0),
        }
    }
}

fn parse_unix_seconds(value: &str) -> Option<DateTime<Utc>> {
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// `GET /api/requests/{id}`
#[derive(Debug, Serialize)]
pub struct RequestDetail {
    pub request: RequestRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binary_files: Vec<BinaryFileRecord>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalReply {
    pub request_id: ExchangeId,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideReply {
    pub request_id: ExchangeId,
    pub action: OverrideAction,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReply {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideStatus {
    pub enabled: bool,
    pub pending_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let filter = ListQuery::default().into_filter();
        assert_eq!(filter, RequestFilter::default());
    }

    #[test]
    fn test_list_query_ignores_unparseable_values() {
        let query = ListQuery {
            provider: Some(String::new()),
            date_from: Some("yesterday".into()),
            limit: Some("5000".into()),
            offset: Some("-3".into()),
            ..Default::default()
        };
        let filter = query.into_filter();
        assert!(filter.provider.is_none());
        assert!(filter.date_from.is_none());
        assert_eq!(*filter.limit.as_ref(), 50);
        assert_eq!(filter.offset, 0);
    }

    #[test]
    fn test_list_query_parses_valid_values() {
        let query = ListQuery {
            provider: Some("openai".into()),
            path_pattern: Some("chat".into()),
            date_from: Some("1700000000".into()),
            date_to: Some("1800000000".into()),
            limit: Some("10".into()),
            offset: Some("20".into()),
        };
        let filter = query.into_filter();
        assert_eq!(filter.provider.as_deref(), Some("openai"));
        assert_eq!(filter.date_from.map(|d| d.timestamp()), Some(1_700_000_000));
        assert_eq!(*filter.limit.as_ref(), 10);
        assert_eq!(filter.offset, 20);
    }
}
