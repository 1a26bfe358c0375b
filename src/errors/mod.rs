pub mod app_error;
pub mod gateway_error;

pub use app_error::{AppError, AppResult};
pub use gateway_error::{BackendError, SipError, VadError};
