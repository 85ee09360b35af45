//! Built-in command handlers.

mod base;
mod echo;
mod example;

pub use base::BaseHandler;
pub use echo::EchoHandler;
pub use example::ExampleHandler;
