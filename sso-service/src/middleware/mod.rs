pub mod session;

pub use session::{
    deferred_cas_redirect_middleware, destroy_session, load_session, persist_session,
    resolve_assertion_middleware,
};
