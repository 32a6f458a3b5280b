//! huddle-core — message model, frame codec, and configuration shared by
//! the coordinator and peer roles.

pub mod codec;
pub mod config;
pub mod message;

pub use message::{Destination, Message, Method, SERVER_ID};
