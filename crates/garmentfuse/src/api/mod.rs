//! Framework-agnostic fusion API: typed requests in, typed responses and
//! status codes out.

pub mod error;
pub mod handlers;
pub mod types;

pub use error::{ApiError, ErrorBody};
pub use handlers::{FusionApi, DEFAULT_MAX_UPLOAD_BYTES};
pub use types::{CreateJobRequest, CreateJobResponse, ResultResponse, StatusResponse, UploadedFile};
