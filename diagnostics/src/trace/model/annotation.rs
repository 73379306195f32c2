use crate::trace::model::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Server receive.
pub const SERVER_RECV: &str = "sr";
/// Server send.
pub const SERVER_SEND: &str = "ss";
/// Client send.
pub const CLIENT_SEND: &str = "cs";
/// Client receive.
pub const CLIENT_RECV: &str = "cr";
/// Local component, recorded as a binary annotation.
pub const LOCAL_COMPONENT: &str = "lc";
/// Error text of a span that finished with an error.
pub const ERROR: &str = "error";

/// A timestamped event on a span, such as `sr` or `cs`.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[builder(setter(into))]
    value: String,
    /// Microseconds since the Unix epoch.
    timestamp: u64,
    endpoint: Endpoint,
}

impl Annotation {
    /// The event code.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the event happened, in microseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Where the event was recorded.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// A key/value tag on a span.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryAnnotation {
    #[builder(setter(into))]
    key: String,
    #[builder(setter(into))]
    value: String,
    endpoint: Endpoint,
}

impl BinaryAnnotation {
    /// The tag key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The tag value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Where the tag was recorded.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
