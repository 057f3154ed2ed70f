use std::time::Duration;

use mapview_core::{CancelToken, MapviewError, MapviewResult, TileQuery, TileSource};
use reqwest::StatusCode;

/// Fetches crops of the world raster from the tile service's `/api/crop` endpoint.
pub struct HttpTileSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTileSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn crop_url(&self) -> String {
        format!("{}/api/crop", self.base_url)
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, query: &TileQuery, cancel: &CancelToken) -> MapviewResult<Vec<u8>> {
        let response = self
            .client
            .get(self.crop_url())
            .query(&[
                ("x0", query.x0),
                ("x1", query.x1),
                ("y0", query.y0),
                ("y1", query.y1),
                ("layer", query.layer),
            ])
            .send()
            .map_err(|err| MapviewError::unavailable(format!("tile request failed: {err}")))?;

        // Skip reading the body of a response nobody wants any more.
        if cancel.is_cancelled() {
            return Err(MapviewError::unavailable("request cancelled"));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(MapviewError::upstream(error_detail(status, &body)));
        }
        let bytes = response
            .bytes()
            .map_err(|err| MapviewError::upstream(format!("failed to read tile body: {err}")))?;
        Ok(bytes.to_vec())
    }
}

/// The service reports errors as `{"detail": "..."}`; anything else falls back
/// to the status text.
fn error_detail(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(|detail| detail.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_owned)
                .unwrap_or_else(|| status.as_str().to_owned())
        })
}
