use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};

use super::Transport;
use super::types::{ApiKey, CreateMethod, RawCreateResponse, RawStatusResponse, Route};
use crate::error::TransportError;
use crate::state_machine::JobRequest;
use crate::vendor::RequestEncoder;

/// [`Transport`] over HTTP with `reqwest`.
pub struct HttpTransport {
    client: Client,
    route: Route,
    encoder: Arc<dyn RequestEncoder>,
    api_key: Option<ApiKey>,
}

impl HttpTransport {
    pub fn new(
        route: Route,
        encoder: Arc<dyn RequestEncoder>,
        api_key: Option<ApiKey>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self::with_client(client, route, encoder, api_key))
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling, tests).
    pub fn with_client(
        client: Client,
        route: Route,
        encoder: Arc<dyn RequestEncoder>,
        api_key: Option<ApiKey>,
    ) -> Self {
        Self {
            client,
            route,
            encoder,
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    fn decorate(&self, mut builder: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.route.headers {
            builder = builder.header(name, value);
        }
        if let (Some(header), Some(key)) = (&self.route.key_header, &self.api_key) {
            builder = builder.header(header, key.expose());
        }
        builder
    }

    /// Send the request and decode the body as JSON.
    ///
    /// Non-2xx responses become [`TransportError::Http`] with the body text
    /// kept for diagnostics.
    async fn send_json(&self, builder: RequestBuilder) -> Result<serde_json::Value, TransportError> {
        let response = self.decorate(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = status.as_u16(), bytes = body.len(), "vendor response");

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::Decode {
            message: e.to_string(),
            body,
        })
    }
}

impl Transport for HttpTransport {
    async fn create(&self, request: &JobRequest) -> Result<RawCreateResponse, TransportError> {
        let body = self.encoder.encode_create(request);
        let builder = match self.route.create_method {
            CreateMethod::Post => self.client.post(&self.route.create_url),
            CreateMethod::Put => self.client.put(&self.route.create_url),
        };
        let value = self
            .send_json(builder.header("content-type", "application/json").json(&body))
            .await?;
        Ok(RawCreateResponse(value))
    }

    async fn fetch_status(&self, job_id: &str) -> Result<RawStatusResponse, TransportError> {
        let url = self.route.status_url_for(job_id);
        let builder = self.client.get(url).header("accept", "application/json");
        let value = self.send_json(builder).await?;
        Ok(RawStatusResponse(value))
    }
}
