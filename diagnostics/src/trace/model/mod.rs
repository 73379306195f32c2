//! Wire model for trace records handed to a [`TraceCollector`].
//!
//! [`TraceCollector`]: crate::trace::TraceCollector
mod annotation;
mod endpoint;
mod record;

pub use annotation::{
    Annotation, BinaryAnnotation, CLIENT_RECV, CLIENT_SEND, ERROR, LOCAL_COMPONENT, SERVER_RECV,
    SERVER_SEND,
};
pub use endpoint::Endpoint;
pub use record::TraceRecord;
