//! The two fixed diagnostic pages.
//!
//! Rendering is a collaborator concern; the flows only ever ask for these
//! two documents, so the seam is a small trait with a static default.

pub trait PageRenderer: Send + Sync {
    /// HTML shown (with an anonymous role context) when a principal
    /// authenticated externally but could not be resolved to a local user.
    fn insufficient_page(&self) -> String;

    /// Plain-text notice returned when the trusted header is missing in
    /// header mode. Deliberately permissive: dev environments run without
    /// the edge proxy.
    fn misconfigured_notice(&self) -> String;
}

pub struct StaticPages;

impl PageRenderer for StaticPages {
    fn insufficient_page(&self) -> String {
        concat!(
            "<!DOCTYPE html>\n",
            "<html>\n",
            "<head><title>Insufficient privileges</title></head>\n",
            "<body>\n",
            "<h1>Insufficient privileges</h1>\n",
            "<p>Your account authenticated successfully but does not have ",
            "access to this site. Contact an administrator if you believe ",
            "this is an error.</p>\n",
            "</body>\n",
            "</html>\n"
        )
        .to_string()
    }

    fn misconfigured_notice(&self) -> String {
        concat!(
            "MISCONFIGURED: the upstream proxy configuration is not complete. ",
            "No X-Remote-User header was supplied with this request. ",
            "See the deployment documentation for the proxy-auth login flow. ",
            "It is possible to disable this service in dev environments."
        )
        .to_string()
    }
}
