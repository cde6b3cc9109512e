//! Observability: tracing and logging.

mod tracing_init;

pub use tracing_init::init;
