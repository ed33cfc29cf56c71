//! Services layer for the SSO broker.
//!
//! Identity resolution, ticket and session storage, and the outbound CAS
//! protocol client.

pub mod cas_client;
pub mod directory;
pub mod error;
pub mod resolver;
pub mod sessions;
pub mod tickets;

pub use cas_client::CasClient;
pub use directory::{Directory, MockDirectory, PgDirectory};
pub use error::ServiceError;
pub use resolver::{
    CreatePersonPolicy, GroupPolicy, IdentityResolver, NoopHooks, PrincipalSource, ProvisionHooks,
    ResolverOptions,
};
pub use sessions::{
    MemorySessionStore, RedisSessionStore, SESSION_COOKIE, SessionData, SessionStore,
    new_session_id,
};
pub use tickets::{MemoryTicketStore, RedisTicketStore, TicketStore, new_ticket_id};
