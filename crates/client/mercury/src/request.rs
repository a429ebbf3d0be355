//! Request planning and response decoding for each Mercury protocol version.

use crate::error::MercuryError;
use alloy_primitives::Bytes;
use kp_upkeep::{MercuryLookup, UpkeepId};
use serde::Deserialize;
use url::Url;

const V02_FEED_LABELS: [&str; 3] = ["feedIDStr", "feedIDHex", "feedIdHex"];
const V02_QUERY_LABEL: &str = "blockNumber";
const V03_FEED_LABELS: [&str; 2] = ["feedID", "feedIDs"];
const V03_QUERY_LABEL: &str = "timestamp";
const V03_FEED_PARAM: &str = "feedID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MercuryProtocol {
    /// One request per feed, pinned to a block number.
    V02,
    /// Reports pinned to a timestamp, several feeds per request.
    V03,
}

impl MercuryProtocol {
    pub fn from_labels(feed_label: &str, query_label: &str) -> Result<Self, MercuryError> {
        if V02_FEED_LABELS.contains(&feed_label) && query_label == V02_QUERY_LABEL {
            Ok(Self::V02)
        } else if V03_FEED_LABELS.contains(&feed_label) && query_label == V03_QUERY_LABEL {
            Ok(Self::V03)
        } else {
            Err(MercuryError::UnsupportedLabels { feed_label: feed_label.into(), query_label: query_label.into() })
        }
    }
}

/// What a planned request is expected to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expected {
    Blob,
    Report,
    Bulk(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedRequest {
    pub url: Url,
    pub expected: Expected,
}

impl PlannedRequest {
    /// `route` is appended to the path of `base`.
    fn new(base: &Url, route: &str, params: &[(&str, &str)], expected: Expected) -> Self {
        let mut url = base.clone();
        url.set_path(&format!("{}{route}", base.path().trim_end_matches('/')));
        url.query_pairs_mut().clear().extend_pairs(params);
        Self { url, expected }
    }

    /// The `path?query` part covered by the request signature.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }
}

/// Requests needed to answer `lookup`. Decoding their answers in order
/// yields one value per feed, in the order of `lookup.feeds`.
pub(crate) fn plan(base: &Url, lookup: &MercuryLookup, upkeep_id: UpkeepId) -> Result<Vec<PlannedRequest>, MercuryError> {
    let query = lookup.query.to_string();
    let user = upkeep_id.to_string();

    Ok(match MercuryProtocol::from_labels(&lookup.feed_label, &lookup.query_label)? {
        MercuryProtocol::V02 => lookup
            .feeds
            .iter()
            .map(|feed| {
                PlannedRequest::new(
                    base,
                    "/client",
                    &[(lookup.feed_label.as_str(), feed.as_str()), (V02_QUERY_LABEL, query.as_str()), ("userId", user.as_str())],
                    Expected::Blob,
                )
            })
            .collect(),
        MercuryProtocol::V03 if lookup.feeds.len() == 1 => vec![PlannedRequest::new(
            base,
            "/v1/reports",
            &[(V03_FEED_PARAM, lookup.feeds[0].as_str()), (V03_QUERY_LABEL, query.as_str()), ("userId", user.as_str())],
            Expected::Report,
        )],
        MercuryProtocol::V03 => {
            let mut params: Vec<(&str, &str)> = lookup.feeds.iter().map(|feed| (V03_FEED_PARAM, feed.as_str())).collect();
            params.push((V03_QUERY_LABEL, query.as_str()));
            params.push(("userId", user.as_str()));
            vec![PlannedRequest::new(base, "/v1/reports/bulk", &params, Expected::Bulk(lookup.feeds.clone()))]
        }
    })
}

#[derive(Deserialize)]
struct BlobResponse {
    #[serde(rename = "chainlinkBlob")]
    chainlink_blob: String,
}

/// Only the fields the keeper reads; `validFromTimestamp` and
/// `observationsTimestamp` are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(rename = "feedID")]
    feed_id: String,
    full_report: String,
}

#[derive(Deserialize)]
struct SingleReportResponse {
    report: Report,
}

#[derive(Deserialize)]
struct BulkReportResponse {
    reports: Vec<Report>,
}

fn decode_hex(s: &str) -> Result<Bytes, MercuryError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map(Bytes::from).map_err(|e| MercuryError::Decode(e.to_string()))
}

fn decode_json<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, MercuryError> {
    serde_json::from_slice(body).map_err(|e| MercuryError::Decode(e.to_string()))
}

impl Expected {
    pub(crate) fn decode(&self, body: &[u8]) -> Result<Vec<Bytes>, MercuryError> {
        match self {
            Self::Blob => Ok(vec![decode_hex(&decode_json::<BlobResponse>(body)?.chainlink_blob)?]),
            Self::Report => Ok(vec![decode_hex(&decode_json::<SingleReportResponse>(body)?.report.full_report)?]),
            Self::Bulk(feeds) => {
                let reports = decode_json::<BulkReportResponse>(body)?.reports;
                feeds
                    .iter()
                    .map(|feed| {
                        let report = reports
                            .iter()
                            .find(|r| r.feed_id.eq_ignore_ascii_case(feed))
                            .ok_or_else(|| MercuryError::MissingReport(feed.clone()))?;
                        decode_hex(&report.full_report)
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn lookup(feed_label: &str, feeds: &[&str], query_label: &str, query: u64) -> MercuryLookup {
        MercuryLookup {
            feed_label: feed_label.into(),
            feeds: feeds.iter().map(|f| f.to_string()).collect(),
            query_label: query_label.into(),
            query: U256::from(query),
            extra_data: Bytes::new(),
        }
    }

    fn base() -> Url {
        "https://mercury.example".parse().unwrap()
    }

    #[rstest]
    #[case("feedIDStr", "blockNumber", MercuryProtocol::V02)]
    #[case("feedIDHex", "blockNumber", MercuryProtocol::V02)]
    #[case("feedIdHex", "blockNumber", MercuryProtocol::V02)]
    #[case("feedID", "timestamp", MercuryProtocol::V03)]
    #[case("feedIDs", "timestamp", MercuryProtocol::V03)]
    fn protocol_dispatch(#[case] feed_label: &str, #[case] query_label: &str, #[case] protocol: MercuryProtocol) {
        assert_eq!(MercuryProtocol::from_labels(feed_label, query_label), Ok(protocol));
    }

    #[rstest]
    #[case("feedIDHex", "timestamp")]
    #[case("feedID", "blockNumber")]
    #[case("feeds", "blockNumber")]
    fn unsupported_labels(#[case] feed_label: &str, #[case] query_label: &str) {
        assert_matches!(MercuryProtocol::from_labels(feed_label, query_label), Err(MercuryError::UnsupportedLabels { .. }));
    }

    #[test]
    fn v02_one_request_per_feed() {
        let reqs = plan(&base(), &lookup("feedIDHex", &["0x01", "0x02"], "blockNumber", 100), UpkeepId::from(7u64)).unwrap();
        let paths: Vec<_> = reqs.iter().map(|r| r.path_and_query()).collect();
        assert_eq!(
            paths,
            vec!["/client?feedIDHex=0x01&blockNumber=100&userId=7", "/client?feedIDHex=0x02&blockNumber=100&userId=7"]
        );
        assert!(reqs.iter().all(|r| r.expected == Expected::Blob));
    }

    #[test]
    fn v03_single_and_bulk() {
        let single = plan(&base(), &lookup("feedID", &["0x01"], "timestamp", 5), UpkeepId::from(7u64)).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].path_and_query(), "/v1/reports?feedID=0x01&timestamp=5&userId=7");

        let bulk = plan(&base(), &lookup("feedIDs", &["0x01", "0x02"], "timestamp", 5), UpkeepId::from(7u64)).unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].path_and_query(), "/v1/reports/bulk?feedID=0x01&feedID=0x02&timestamp=5&userId=7");
        assert_eq!(bulk[0].expected, Expected::Bulk(vec!["0x01".into(), "0x02".into()]));
    }

    #[rstest]
    #[case("https://mercury.example/mercury")]
    #[case("https://mercury.example/mercury/")]
    fn routes_keep_the_base_path(#[case] base: &str) {
        let base: Url = base.parse().unwrap();
        let v02 = plan(&base, &lookup("feedIDHex", &["0x01"], "blockNumber", 100), UpkeepId::from(7u64)).unwrap();
        assert_eq!(v02[0].path_and_query(), "/mercury/client?feedIDHex=0x01&blockNumber=100&userId=7");

        let bulk = plan(&base, &lookup("feedIDs", &["0x01", "0x02"], "timestamp", 5), UpkeepId::from(7u64)).unwrap();
        assert_eq!(bulk[0].url.as_str(), "https://mercury.example/mercury/v1/reports/bulk?feedID=0x01&feedID=0x02&timestamp=5&userId=7");
    }

    #[test]
    fn bulk_reports_follow_request_order() {
        let body = br#"{"reports":[
            {"feedID":"0x02","validFromTimestamp":1,"observationsTimestamp":2,"fullReport":"0xbb"},
            {"feedID":"0x01","validFromTimestamp":1,"observationsTimestamp":2,"fullReport":"0xaa"}
        ]}"#;
        let values = Expected::Bulk(vec!["0x01".into(), "0x02".into()]).decode(body).unwrap();
        assert_eq!(values, vec![Bytes::from_static(&[0xaa]), Bytes::from_static(&[0xbb])]);

        assert_matches!(
            Expected::Bulk(vec!["0x03".into()]).decode(body),
            Err(MercuryError::MissingReport(feed)) if feed == "0x03"
        );
    }

    #[test]
    fn blob_response() {
        assert_eq!(Expected::Blob.decode(br#"{"chainlinkBlob":"0x0102"}"#), Ok(vec![Bytes::from_static(&[1, 2])]));
        assert_matches!(Expected::Blob.decode(br#"{"chainlinkBlob":"0xzz"}"#), Err(MercuryError::Decode(_)));
        assert_matches!(Expected::Blob.decode(b"not json"), Err(MercuryError::Decode(_)));
    }
}
