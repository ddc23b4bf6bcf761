use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ProviderError;

/// A provider response stripped down to what retry and error-mapping logic
/// needs. The body is kept as text so decoding failures can be reported with
/// context instead of a bare deserialize error.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    /// Parsed Retry-After header in seconds, when the provider sent one.
    pub retry_after: Option<u64>,
    pub body: String,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        serde_json::from_str(&self.body).map_err(|err| {
            ProviderError::MalformedResponse(format!("failed to decode response body: {err}"))
        })
    }
}

/// Port trait wrapping the HTTP calls made to provider APIs.
///
/// The production implementation is [`ReqwestGateway`]; tests script
/// responses through the mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait HttpGateway: Send + Sync {
    /// GET with a bearer token and query parameters.
    async fn get(
        &self,
        url: &str,
        bearer: &str,
        params: &[(String, String)],
    ) -> Result<WireResponse, ProviderError>;

    /// POST an urlencoded form with extra headers (e.g. Basic auth).
    async fn post_form(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<WireResponse, ProviderError>;
}

pub struct ReqwestGateway {
    client: reqwest::Client,
}

impl ReqwestGateway {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn into_wire(response: reqwest::Response) -> Result<WireResponse, ProviderError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let body = response.text().await?;
        Ok(WireResponse {
            status,
            retry_after,
            body,
        })
    }
}

impl Default for ReqwestGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpGateway for ReqwestGateway {
    async fn get(
        &self,
        url: &str,
        bearer: &str,
        params: &[(String, String)],
    ) -> Result<WireResponse, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .bearer_auth(bearer)
            .send()
            .await?;
        Self::into_wire(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<WireResponse, ProviderError> {
        let mut request = self.client.post(url).form(form);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        Self::into_wire(response).await
    }
}
