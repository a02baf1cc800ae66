use crate::config::{RelayConfig, ScraperConfig};
use crate::errors::IngestError;
use crate::models::SessionCookies;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// Headers of a desktop Chrome 129 on Linux, so the relayed request does not
/// trip a second challenge.
const BROWSER_HEADERS: [(&str, &str); 19] = [
    ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"),
    ("accept-language", "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("cache-control", "max-age=0"),
    ("priority", "u=0, i"),
    ("sec-ch-ua", "\"Google Chrome\";v=\"129\", \"Not=A?Brand\";v=\"8\", \"Chromium\";v=\"129\""),
    ("sec-ch-ua-arch", "\"x86\""),
    ("sec-ch-ua-bitness", "\"64\""),
    ("sec-ch-ua-full-version", "\"129.0.6668.100\""),
    ("sec-ch-ua-full-version-list", "\"Google Chrome\";v=\"129.0.6668.100\", \"Not=A?Brand\";v=\"8.0.0.0\", \"Chromium\";v=\"129.0.6668.100\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-model", "\"\""),
    ("sec-ch-ua-platform", "\"Linux\""),
    ("sec-ch-ua-platform-version", "\"6.8.0\""),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36"),
];

pub fn browser_headers() -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(BROWSER_HEADERS.len());
    for (name, value) in BROWSER_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(value).with_context(|| format!("header {}", name))?,
        );
    }
    Ok(headers)
}

/// Fetches pages through the scrape.do relay instead of hitting the target
/// directly. One attempt per call.
pub struct RelayClient {
    inner: reqwest::Client,
    relay_url: Url,
    api_key: String,
}

impl RelayClient {
    pub fn new(scraper: &ScraperConfig, relay: &RelayConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(scraper.timeout_secs))
            .gzip(true)
            .default_headers(browser_headers()?)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            relay_url: Url::parse(&relay.url)
                .with_context(|| format!("Invalid relay URL {:?}", relay.url))?,
            api_key: relay.api_key()?.to_string(),
        })
    }

    /// `https://api.scrape.do/?token=…&url=<target>`
    pub fn relay_url_for(&self, target: &str) -> Url {
        let mut url = self.relay_url.clone();
        url.query_pairs_mut()
            .append_pair("token", &self.api_key)
            .append_pair("url", target);
        url
    }

    /// Loggable form of a relayed request. The token never appears in it.
    fn describe(&self, target: &str) -> String {
        format!(
            "{}{} -> {}",
            self.relay_url.host_str().unwrap_or_default(),
            self.relay_url.port().map(|p| format!(":{p}")).unwrap_or_default(),
            target
        )
    }

    pub async fn fetch_listing_html(
        &self,
        target: &str,
        cookies: &SessionCookies,
    ) -> Result<String, IngestError> {
        info!("Fetching listing {} via relay", target);
        debug!("GET {}", self.describe(target));
        let url = self.relay_url_for(target);

        let resp = self
            .inner
            .get(url)
            .header(COOKIE, cookies.header_value())
            .send()
            .await?;

        let status = resp.status();
        info!("Listing request status: {}", status);
        if status != StatusCode::OK {
            error!("Listing fetch failed with status {}", status);
            return Err(IngestError::Fetch {
                status: status.as_u16(),
            });
        }

        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{RawQuery, State};
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn client() -> RelayClient {
        let relay = RelayConfig {
            url: "https://api.scrape.do".into(),
            api_key: Some("secret-token".into()),
        };
        RelayClient::new(&ScraperConfig::default(), &relay).unwrap()
    }

    #[test]
    fn relay_url_carries_token_and_encoded_target() {
        let url = client().relay_url_for("https://steamdb.info/sales/");
        assert_eq!(url.host_str(), Some("api.scrape.do"));

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            [
                ("token".to_string(), "secret-token".to_string()),
                ("url".to_string(), "https://steamdb.info/sales/".to_string()),
            ]
        );
        assert!(url.as_str().contains("url=https%3A%2F%2Fsteamdb.info%2Fsales%2F"));
    }

    #[test]
    fn browser_header_set_is_complete() {
        let headers = browser_headers().unwrap();
        assert_eq!(headers.len(), BROWSER_HEADERS.len());
        assert_eq!(headers["sec-fetch-mode"], "navigate");
        assert_eq!(headers["sec-ch-ua-platform"], "\"Linux\"");
        assert!(headers.contains_key("user-agent"));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let relay = RelayConfig {
            url: "https://api.scrape.do".into(),
            api_key: None,
        };
        assert!(RelayClient::new(&ScraperConfig::default(), &relay).is_err());
    }

    #[test]
    fn request_description_hides_token() {
        let relay = RelayConfig {
            url: "https://api.scrape.do".into(),
            api_key: Some("a+b/c&d=e".into()),
        };
        let client = RelayClient::new(&ScraperConfig::default(), &relay).unwrap();

        let line = client.describe("https://steamdb.info/sales/");
        assert_eq!(line, "api.scrape.do -> https://steamdb.info/sales/");
        assert!(!line.contains("a+b"));
        assert!(!line.contains("a%2Bb"));
    }

    /// What the local relay saw: raw query string and Cookie header.
    #[derive(Clone, Default)]
    struct RelayLog {
        hits: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    async fn fake_relay(
        State(log): State<RelayLog>,
        RawQuery(query): RawQuery,
        headers: HeaderMap,
    ) -> (StatusCode, String) {
        let cookie = headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        log.requests
            .lock()
            .unwrap()
            .push((query.unwrap_or_default(), cookie));

        match log.hits.fetch_add(1, Ordering::SeqCst) {
            0 => (StatusCode::FORBIDDEN, "blocked".to_string()),
            _ => (StatusCode::OK, "<table><tr class=\"app\"></tr></table>".to_string()),
        }
    }

    async fn spawn_relay(log: RelayLog) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(fake_relay)).with_state(log);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn non_200_is_a_fetch_failure_and_200_returns_the_body() {
        let log = RelayLog::default();
        let relay = RelayConfig {
            url: spawn_relay(log.clone()).await,
            api_key: Some("secret-token".into()),
        };
        let client = RelayClient::new(&ScraperConfig::default(), &relay).unwrap();
        let cookies = SessionCookies {
            clearance: "clear".into(),
            bot_management: "bm".into(),
        };

        let err = client
            .fetch_listing_html("https://steamdb.info/sales/", &cookies)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Fetch { status: 403 }));

        let body = client
            .fetch_listing_html("https://steamdb.info/sales/", &cookies)
            .await
            .unwrap();
        assert_eq!(body, "<table><tr class=\"app\"></tr></table>");

        let requests = log.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        for (query, cookie) in &requests {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            assert_eq!(
                pairs,
                [
                    ("token".to_string(), "secret-token".to_string()),
                    ("url".to_string(), "https://steamdb.info/sales/".to_string()),
                ]
            );
            assert_eq!(cookie.as_deref(), Some("cf_clearance=clear; __cf_bm=bm"));
        }
    }
}
