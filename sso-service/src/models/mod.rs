//! Domain models for the SSO broker.

mod group;
mod person;

pub use group::Group;
pub use person::{Permissions, Person};
