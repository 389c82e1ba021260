//! Request orchestration and the error taxonomy shared by every layer.

pub mod dispatcher;
pub mod error;

pub use dispatcher::Dispatcher;
pub use error::{AppError, DispatchError, ErrorReport};
