use bytes::Bytes;
use shop_tunnel_instruments::{AsOperation, CompletedOperation};
use std::time::Duration;

/// A timed request to the shop.
///
/// Requests never fail from the caller's point of view. A request that did not get a complete
/// response has a status of `0` and carries the transport error in [CompletedRequest::error].
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    operation: CompletedOperation,
    body: Bytes,
    error: Option<String>,
}

impl CompletedRequest {
    pub(crate) fn new(operation: CompletedOperation, body: Bytes, error: Option<String>) -> Self {
        Self {
            operation,
            body,
            error,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation.operation_id
    }

    /// The HTTP status, or `0` if no complete response was received.
    pub fn status(&self) -> u16 {
        self.operation.status_code
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn duration(&self) -> Duration {
        self.operation.duration
    }

    /// Why the request or reading its body failed, if it did.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Read a string field from a JSON object body.
    ///
    /// A body that isn't a JSON object, or a field that is missing or not a string, all give
    /// `None`.
    pub fn json_str(&self, field: &str) -> Option<String> {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()?
            .get(field)?
            .as_str()
            .map(ToString::to_string)
    }

    /// The message from an error response, for example `{"errors": "not enough coins"}`.
    pub fn error_message(&self) -> Option<String> {
        self.json_str("errors")
    }
}

impl AsOperation for CompletedRequest {
    fn operation(&self) -> &CompletedOperation {
        &self.operation
    }

    fn transport_error(&self) -> Option<&str> {
        self.error()
    }
}
