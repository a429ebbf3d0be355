use crate::auth::auth_headers;
use crate::config::MercuryConfig;
use crate::error::MercuryError;
use crate::request::{plan, PlannedRequest};
use alloy_primitives::Bytes;
use kc_analytics::MERCURY_CALLS_TARGET;
use kp_upkeep::{MercuryLookup, UpkeepId};
use reqwest::StatusCode;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Authenticated HTTP client for the Mercury data service.
#[derive(Clone, Debug)]
pub struct MercuryClient {
    http: reqwest::Client,
    config: MercuryConfig,
}

enum Answer {
    Found(Vec<u8>),
    NotFound,
}

fn now_ms() -> Result<u128, MercuryError> {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).map_err(|e| MercuryError::Auth(e.to_string()))
}

impl MercuryClient {
    pub fn new(config: MercuryConfig) -> Result<Self, MercuryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(MercuryError::from_reqwest_error)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &MercuryConfig {
        &self.config
    }

    /// Fetches one value per feed of `lookup`, in feed order.
    ///
    /// Feeds are fetched concurrently and the first failure aborts the
    /// whole lookup.
    pub async fn fetch(&self, lookup: &MercuryLookup, upkeep_id: UpkeepId) -> Result<Vec<Bytes>, MercuryError> {
        let requests = plan(&self.config.url, lookup, upkeep_id)?;
        let answers = futures::future::try_join_all(requests.iter().map(|req| self.fetch_one(req))).await?;
        Ok(answers.into_iter().flatten().collect())
    }

    async fn fetch_one(&self, req: &PlannedRequest) -> Result<Vec<Bytes>, MercuryError> {
        let body = self.get_with_retry(req).await?;
        req.expected.decode(&body)
    }

    /// Retries `404 Not Found` answers only, since they usually mean the
    /// report for that block or timestamp is not produced yet. Any other
    /// failure is final.
    async fn get_with_retry(&self, req: &PlannedRequest) -> Result<Vec<u8>, MercuryError> {
        let attempts = self.config.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.get(req).await? {
                Answer::Found(body) => return Ok(body),
                Answer::NotFound if attempt < attempts => {
                    tracing::debug!(url = %req.url, attempt, "Mercury report not found yet, retrying");
                    tokio::time::sleep(self.config.retry.delay).await;
                }
                Answer::NotFound => {}
            }
        }
        Err(MercuryError::NotFound { attempts })
    }

    async fn get(&self, req: &PlannedRequest) -> Result<Answer, MercuryError> {
        let path = req.path_and_query();
        let headers = auth_headers(&path, &self.config.username, &self.config.password, now_ms()?)?;

        let start = Instant::now();
        let response =
            self.http.get(req.url.clone()).headers(headers).send().await.map_err(MercuryError::from_reqwest_error)?;
        let status = response.status();
        tracing::debug!(
            target: MERCURY_CALLS_TARGET,
            path = path.as_str(),
            status = u64::from(status.as_u16()),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Mercury call"
        );

        match status {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(MercuryError::from_reqwest_error)?;
                Ok(Answer::Found(body.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(Answer::NotFound),
            other => Err(MercuryError::Status(other)),
        }
    }
}
