//! Socket URL construction.

use crate::Result;
use crate::error::Error;
use crate::ws::config::Environment;

/// Fields that determine where a connection goes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct UrlParts<'a> {
    pub resource_id: &'a str,
    pub endpoint: &'a str,
    pub socket_base_url: Option<&'a str>,
}

impl<'a> UrlParts<'a> {
    #[must_use]
    pub fn new(resource_id: &'a str, endpoint: &'a str, socket_base_url: Option<&'a str>) -> Self {
        Self {
            resource_id,
            endpoint,
            socket_base_url,
        }
    }
}

/// Build the socket URL for `parts`, using the page described by `env` for
/// anything the override leaves unspecified.
///
/// An origin-relative override (`/ws`) yields an origin-relative URL; see
/// [`resolve_against_page`] for the form a transport can open.
///
/// # Example
///
/// ```
/// use resilient_socket::ws::Environment;
/// use resilient_socket::ws::url::{UrlParts, build_websocket_url};
///
/// let env = Environment::default();
/// let parts = UrlParts::new("r1", "/stream", Some("https://api.example.com/"));
/// assert_eq!(
///     build_websocket_url(&parts, &env).unwrap(),
///     "wss://api.example.com/stream/r1"
/// );
/// ```
pub fn build_websocket_url(parts: &UrlParts<'_>, env: &Environment) -> Result<String> {
    if parts.resource_id.is_empty() {
        return Err(Error::missing_field("resource_id"));
    }
    if parts.endpoint.is_empty() {
        return Err(Error::missing_field("endpoint"));
    }

    let endpoint = if parts.endpoint.starts_with('/') {
        parts.endpoint.to_owned()
    } else {
        format!("/{}", parts.endpoint)
    };
    let path = format!("{endpoint}/{}", parts.resource_id);

    let Some(base) = parts.socket_base_url else {
        let scheme = page_socket_scheme(env);
        return Ok(format!("{scheme}://{}{path}", env.host()));
    };

    let base = base.strip_suffix('/').unwrap_or(base);

    if base.starts_with('/') {
        return Ok(format!("{base}{path}"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{path}"));
    }
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{path}"));
    }

    let scheme = page_socket_scheme(env);
    Ok(format!("{scheme}://{base}{path}"))
}

/// Turn an origin-relative URL into an absolute one on the page's host. Absolute
/// URLs pass through unchanged.
#[must_use]
pub fn resolve_against_page(url: &str, env: &Environment) -> String {
    if url.starts_with('/') {
        format!("{}://{}{url}", page_socket_scheme(env), env.host())
    } else {
        url.to_owned()
    }
}

fn page_socket_scheme(env: &Environment) -> &'static str {
    if env.is_secure() { "wss" } else { "ws" }
}
