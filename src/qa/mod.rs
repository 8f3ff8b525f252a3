//! Question answering over stored documents: context selection, the answer pipeline, and
//! history queries.

pub mod context;
mod service;
pub mod types;

pub use context::build_context;
pub use service::{DocumentApi, DocumentService};
pub use types::{
    Answer, AnswerSource, GENERATION_ERROR_PREFIX, MAX_QUESTION_CHARS, NO_ANSWER, ServiceError,
    ServiceSettings, UNCONFIGURED_ANSWER, UploadRequest,
};
