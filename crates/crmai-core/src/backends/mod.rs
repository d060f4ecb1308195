//! Concrete provider backends.

pub mod direct;
pub mod mock;
pub mod proxied;

pub use direct::{ChatCompletionsBackend, ChatCompletionsConfig};
pub use mock::{MockBackend, MockBehavior};
pub use proxied::{FunctionsBackend, FunctionsConfig};
