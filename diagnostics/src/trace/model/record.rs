use crate::trace::model::annotation::{Annotation, BinaryAnnotation};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// A finished span in the collector's wire format.
///
/// Ids are 16 character hex strings. A root span carries `parentId: 0`, every
/// other span carries its parent's id string.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    #[builder(setter(into))]
    id: String,
    #[builder(setter(into))]
    trace_id: String,
    #[builder(default, setter(strip_option, into))]
    #[serde(with = "parent_id")]
    parent_id: Option<String>,
    #[builder(setter(into))]
    name: String,
    /// Start of the span in microseconds since the Unix epoch.
    timestamp: u64,
    /// Elapsed microseconds between start and finish.
    duration: u64,
    #[builder(default)]
    annotations: Vec<Annotation>,
    #[builder(default)]
    binary_annotations: Vec<BinaryAnnotation>,
}

impl TraceRecord {
    /// The span id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The id of the trace this span belongs to.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The parent span id, `None` for a root span.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// The span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start of the span in microseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Elapsed microseconds between start and finish.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Timestamped events, in the order they were recorded.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Tags, in the order they were recorded.
    pub fn binary_annotations(&self) -> &[BinaryAnnotation] {
        &self.binary_annotations
    }
}

/// `parentId` is the number `0` for a root span and a hex string otherwise.
mod parent_id {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Root(u64),
        Span(String),
    }

    pub(super) fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(id) => serializer.serialize_str(id),
            None => serializer.serialize_u64(0),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Root(0) => Ok(None),
            Repr::Root(other) => Err(serde::de::Error::custom(format!(
                "numeric parentId must be 0, got {other}"
            ))),
            Repr::Span(id) => Ok(Some(id)),
        }
    }
}
