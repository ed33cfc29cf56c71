pub mod cas_server;
pub mod login;
pub mod pages;

pub use pages::{PageRenderer, StaticPages};
