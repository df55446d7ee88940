pub mod client;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use crate::error::TransportError;
use crate::state_machine::JobRequest;

pub use client::HttpTransport;
pub use types::{ApiKey, CreateMethod, RawCreateResponse, RawStatusResponse, Route};

/// The two HTTP operations a vendor job needs.
///
/// Implementations do generic JSON decoding only; payload semantics belong
/// to the vendor normalizers.
pub trait Transport: Send + Sync + 'static {
    fn create(
        &self,
        request: &JobRequest,
    ) -> impl Future<Output = Result<RawCreateResponse, TransportError>> + Send;

    fn fetch_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<RawStatusResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    async fn create(&self, request: &JobRequest) -> Result<RawCreateResponse, TransportError> {
        self.as_ref().create(request).await
    }

    async fn fetch_status(&self, job_id: &str) -> Result<RawStatusResponse, TransportError> {
        self.as_ref().fetch_status(job_id).await
    }
}
