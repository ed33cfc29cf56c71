//! Outbound CAS protocol client.
//!
//! Drives redirect-based authentication against the external CAS server:
//! builds the login/logout redirect URLs and exchanges a returned ticket
//! for a principal via `serviceValidate`.

use crate::config::CasClientConfig;
use crate::services::ServiceError;

#[derive(Clone)]
pub struct CasClient {
    http: reqwest::Client,
    host: String,
    login_path: String,
    logout_path: String,
    service_validate_path: String,
    callback_url: String,
}

impl CasClient {
    pub fn new(config: &CasClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: config.host.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            logout_path: config.logout_path.clone(),
            service_validate_path: config.service_validate_path.clone(),
            callback_url: config.callback_url.clone(),
        }
    }

    /// URL of the external CAS login form, pointing back at our callback.
    pub fn login_url(&self) -> String {
        format!(
            "{}{}?service={}",
            self.host,
            self.login_path,
            urlencoding::encode(&self.callback_url)
        )
    }

    /// URL of the external CAS logout endpoint.
    pub fn logout_url(&self) -> String {
        format!("{}{}", self.host, self.logout_path)
    }

    /// Exchange a ticket for the asserted principal.
    pub async fn validate_ticket(&self, ticket: &str) -> Result<String, ServiceError> {
        let url = format!(
            "{}{}?ticket={}&service={}",
            self.host,
            self.service_validate_path,
            urlencoding::encode(ticket),
            urlencoding::encode(&self.callback_url)
        );

        let response = self.http.get(&url).send().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to reach the CAS server for serviceValidate");
            ServiceError::CasProtocol("CAS server unreachable".to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, "CAS serviceValidate returned an error status");
            return Err(ServiceError::CasProtocol(format!(
                "CAS serviceValidate failed with status {status}"
            )));
        }

        let body = response.text().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to read CAS serviceValidate response");
            ServiceError::CasProtocol("unreadable CAS response".to_string())
        })?;

        extract_cas_user(&body).ok_or_else(|| {
            tracing::warn!(ticket = %ticket, "CAS serviceValidate did not assert a principal");
            ServiceError::CasProtocol("ticket rejected by CAS server".to_string())
        })
    }
}

/// Pull the principal out of a `cas:serviceResponse` success envelope. The
/// envelope shape is fixed by the protocol, so a scan for the `cas:user`
/// element suffices.
fn extract_cas_user(xml: &str) -> Option<String> {
    let start = xml.find("<cas:user>")? + "<cas:user>".len();
    let end = xml[start..].find("</cas:user>")? + start;
    let raw = xml[start..end].trim();
    if raw.is_empty() {
        return None;
    }
    Some(xml_unescape(raw))
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
