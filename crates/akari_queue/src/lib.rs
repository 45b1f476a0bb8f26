mod error;
mod handler;
mod queue;
mod request;

pub use error::*;
pub use handler::*;
pub use queue::*;
pub use request::*;
