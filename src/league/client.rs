//! Federation REST API client

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::league::api::LeagueApi;
use crate::league::decoder::{AutoDecoder, ResponseDecoder};
use crate::league::error::ApiError;
use crate::league::types::{Club, Match, MatchSeries, RankingEntry, Season};

/// Longest error body kept in [`ApiError::Status`]
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Debug, Deserialize)]
struct SeasonsResponse {
    seasons: Vec<Season>,
}

#[derive(Debug, Deserialize)]
struct ClubResponse {
    club: Club,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchSeriesResponse {
    match_series: Vec<MatchSeries>,
}

#[derive(Debug, Deserialize)]
struct MatchesResponse {
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct RankingsResponse {
    rankings: Vec<RankingEntry>,
}

/// [`LeagueApi`] over HTTP, authenticated with an `apiKey` query parameter
pub struct HttpLeagueApi<D: ResponseDecoder = AutoDecoder> {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    decoder: D,
}

impl HttpLeagueApi<AutoDecoder> {
    /// Client that accepts both JSON and XML response bodies
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, url::ParseError> {
        Self::with_decoder(base_url, api_key, timeout, AutoDecoder::default())
    }
}

impl<D: ResponseDecoder> HttpLeagueApi<D> {
    pub fn with_decoder(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        decoder: D,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("volley-sync")
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: Url::parse(base_url)?,
            api_key: api_key.to_string(),
            decoder,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        url
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments);
        debug!("GET {}", url.path());

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Unavailable(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("Upstream returned status {}: {}", status, url.path());
            let mut body = body;
            if body.len() > MAX_ERROR_BODY_LEN {
                let cut = (0..=MAX_ERROR_BODY_LEN)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        self.decoder.decode(&body).inspect_err(|e| {
            warn!("Failed to decode response from {}: {}", url.path(), e);
        })
    }
}

#[async_trait::async_trait]
impl<D: ResponseDecoder> LeagueApi for HttpLeagueApi<D> {
    async fn fetch_seasons(&self) -> Result<Vec<Season>, ApiError> {
        let response: SeasonsResponse = self.get(&["seasons"]).await?;
        Ok(response.seasons)
    }

    async fn fetch_match_series_catalog(&self) -> Result<Vec<MatchSeries>, ApiError> {
        let response: MatchSeriesResponse = self.get(&["matchSeries"]).await?;
        Ok(response.match_series)
    }

    async fn fetch_matches(&self, match_series_uuid: &str) -> Result<Vec<Match>, ApiError> {
        let response: MatchesResponse = self
            .get(&["matchSeries", match_series_uuid, "matches"])
            .await?;
        Ok(response.matches)
    }

    async fn fetch_rankings(
        &self,
        match_series_uuid: &str,
    ) -> Result<Vec<RankingEntry>, ApiError> {
        let response: RankingsResponse = self
            .get(&["matchSeries", match_series_uuid, "rankings"])
            .await?;
        Ok(response.rankings)
    }

    async fn fetch_club(&self, club_id: &str) -> Result<Club, ApiError> {
        let response: ClubResponse = self.get(&["clubs", club_id]).await?;
        Ok(response.club)
    }
}
