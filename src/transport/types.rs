//! Wire-level types shared by every transport.
//!
//! Raw responses are kept as untyped JSON: the transport only guarantees
//! that the body parsed, the vendor normalizers give it meaning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Body returned by the vendor's job-creation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawCreateResponse(pub serde_json::Value);

/// Body returned by the vendor's status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawStatusResponse(pub serde_json::Value);

/// Opaque credential sent in a request header.
///
/// `Debug` and `Display` never reveal the value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<unset>")
        } else {
            f.write_str("***")
        }
    }
}

/// HTTP method used to create a job. Vendors differ here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CreateMethod {
    #[default]
    Post,
    Put,
}

/// Where and how to reach one vendor.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub create_method: CreateMethod,
    pub create_url: String,
    /// Status endpoint; `{job_id}` is replaced with the vendor job id.
    pub status_url: String,
    /// Header carrying the credential, if the vendor needs one.
    pub key_header: Option<String>,
    /// Extra static headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl Route {
    pub fn status_url_for(&self, job_id: &str) -> String {
        self.status_url.replace("{job_id}", job_id)
    }
}
