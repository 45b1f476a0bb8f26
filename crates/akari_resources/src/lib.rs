mod config;
mod error;
mod handle;
mod manager;
mod meta;
pub mod path;
mod request;
mod resource;
mod serialize;

pub use config::*;
pub use error::*;
pub use handle::*;
pub use manager::*;
pub use meta::*;
pub use request::*;
pub use resource::*;
pub use serialize::*;
