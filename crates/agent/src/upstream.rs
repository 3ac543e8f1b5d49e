use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use noor_core::domain::booking::{AppointmentReceipt, BookingRequest};
use noor_core::domain::patient::DirectoryLookupResult;
use noor_core::errors::UpstreamError;

pub const PATIENT_DIRECTORY: &str = "patient_directory";
pub const APPOINTMENT_BOOK: &str = "appointment_book";
pub const KNOWLEDGE_BASE: &str = "knowledge_base";
pub const LANGUAGE_MODEL: &str = "language_model";

/// Lookup of a patient record by the sender's normalized phone number or a
/// typed identifier. Not-found is a normal result, never an error.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn lookup(&self, identifier: &str) -> DirectoryLookupResult;
}

#[async_trait]
pub trait AppointmentBook: Send + Sync {
    async fn submit(&self, request: &BookingRequest) -> Result<AppointmentReceipt, UpstreamError>;
}

/// Runs one upstream call under `limit`. Elapsed time becomes
/// [`UpstreamError::Timeout`]; the in-flight call is dropped.
pub async fn call_with_timeout<T, F>(
    upstream: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!(event_name = "upstream.timeout", upstream, timeout_ms, "upstream call timed out");
            Err(UpstreamError::Timeout { upstream, timeout_ms })
        }
    }
}

/// Directory lookup with the same bound. A timeout is reported as an
/// upstream error so the flow stays at the lookup point.
pub async fn lookup_with_timeout(
    directory: &dyn PatientDirectory,
    identifier: &str,
    limit: Duration,
) -> DirectoryLookupResult {
    let call = async { Ok::<_, UpstreamError>(directory.lookup(identifier).await) };
    match call_with_timeout(PATIENT_DIRECTORY, limit, call).await {
        Ok(result) => result,
        Err(error) => DirectoryLookupResult::UpstreamError(error.to_string()),
    }
}
