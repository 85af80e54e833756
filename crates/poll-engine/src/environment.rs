use crate::{EnvironmentError, LocationConfig};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENWEATHER_URL: &str = "http://api.openweathermap.org/data/2.5/weather";

/// Weather at the installation site, shared by every device in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    /// Degrees Fahrenheit.
    pub temperature: f64,
    /// Cloud cover, percent.
    pub cloudiness: i64,
}

#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    async fn fetch(&self) -> Result<EnvironmentReading, EnvironmentError>;
}

/// Current-weather lookup by zip code against OpenWeatherMap (imperial units).
pub struct OpenWeatherSource {
    client: reqwest::Client,
    url: Url,
}

impl OpenWeatherSource {
    pub fn new(
        location: &LocationConfig,
        api_key: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EnvironmentError> {
        let zip = format!("{},{}", location.zip, location.country);
        let url = Url::parse_with_params(
            base_url.unwrap_or(OPENWEATHER_URL),
            &[
                ("zip", zip.as_str()),
                ("units", "imperial"),
                ("APPID", api_key),
            ],
        )
        .map_err(|e| EnvironmentError::Request(format!("invalid weather url: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    /// Parse the `main.temp` / `clouds.all` pair out of a current-weather body.
    pub fn parse_body(body: &[u8]) -> Result<EnvironmentReading, EnvironmentError> {
        #[derive(Deserialize)]
        struct Main {
            temp: f64,
        }
        #[derive(Deserialize)]
        struct Clouds {
            all: i64,
        }
        #[derive(Deserialize)]
        struct Body {
            main: Main,
            clouds: Clouds,
        }
        let body: Body =
            serde_json::from_slice(body).map_err(|e| EnvironmentError::Body(e.to_string()))?;
        Ok(EnvironmentReading {
            temperature: body.main.temp,
            cloudiness: body.clouds.all,
        })
    }
}

#[async_trait]
impl EnvironmentSource for OpenWeatherSource {
    async fn fetch(&self) -> Result<EnvironmentReading, EnvironmentError> {
        let resp = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(EnvironmentError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let reading = Self::parse_body(&body)?;
        debug!(
            "weather: {:.1}F, {}% clouds",
            reading.temperature, reading.cloudiness
        );
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;

    fn location() -> LocationConfig {
        LocationConfig {
            zip: "97201".to_string(),
            country: "us".to_string(),
            kind: "residential".to_string(),
            address_one: "1 Main St".to_string(),
        }
    }

    const BODY: &str = r#"{"coord":{"lon":-122.69,"lat":45.51},"main":{"temp":61.3,"humidity":80},"clouds":{"all":75},"name":"Portland"}"#;

    #[test]
    fn test_parse_body() {
        let r = OpenWeatherSource::parse_body(BODY.as_bytes()).unwrap();
        assert_eq!(r.temperature, 61.3);
        assert_eq!(r.cloudiness, 75);
        assert!(matches!(
            OpenWeatherSource::parse_body(br#"{"main":{}}"#),
            Err(EnvironmentError::Body(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_success_sends_query() {
        let (base, request) = serve_once("200 OK", BODY).await;
        let src = OpenWeatherSource::new(
            &location(),
            "key42",
            Some(&format!("{base}/data/2.5/weather")),
            Duration::from_secs(5),
        )
        .unwrap();
        let r = src.fetch().await.unwrap();
        assert_eq!(r.cloudiness, 75);

        let req = request.await.unwrap();
        assert!(req.starts_with("GET /data/2.5/weather?"));
        assert!(req.contains("zip=97201%2Cus"));
        assert!(req.contains("units=imperial"));
        assert!(req.contains("APPID=key42"));
        assert!(req.to_ascii_lowercase().contains("accept: application/json"));
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let (base, _request) = serve_once("401 Unauthorized", r#"{"cod":401}"#).await;
        let src =
            OpenWeatherSource::new(&location(), "bad", Some(&base), Duration::from_secs(5)).unwrap();
        match src.fetch().await {
            Err(EnvironmentError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("401"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let src = OpenWeatherSource::new(
            &location(),
            "k",
            Some("http://127.0.0.1:1/weather"),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(
            src.fetch().await,
            Err(EnvironmentError::Request(_))
        ));
    }
}
