//! The `utils` module holds the pieces shared by every other module: the
//! error taxonomy and the structured JSON logger.

pub mod error;
pub mod logging;

pub use error::{ConfigurationError, ConnectionError, HandlerError, PipelineError, PublishError};
pub use logging::{Level, LogRecord};

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests;
