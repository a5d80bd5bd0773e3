//! Common data model for the capture relay
//!
//! Everything that crosses a crate boundary lives here:
//! - envelopes pushed by the capturing client
//! - stored records (requests, responses, modified responses, held requests)
//! - the three rule kinds
//! - body representation and request id generation

pub mod body;
pub mod envelope;
pub mod headers;
pub mod ids;
pub mod records;
pub mod rules;

pub use body::{BinaryBody, CapturedBody};
pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use headers::HeaderMap;
pub use ids::RequestIdGenerator;
pub use records::{
    CapturedRequest, CapturedResponse, InterceptedRequest, ModifiedResponse, OriginalRequest,
    Searchable, UpstreamResponse,
};
pub use rules::{
    CaptureRule, InterceptRule, InterceptRuleInput, MethodsInput, NewCaptureRule, ResponseRule,
    ResponseRuleInput,
};
