//! HTTP plumbing shared by the remote providers.

use super::error::PkgError;
use crate::version::USER_AGENT;
use reqwest::{Certificate, Client, RequestBuilder, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// First delay between connectivity checks; doubles on each retry.
pub const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for the retry backoff.
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Basic-auth credentials.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Extra PEM bundle to trust.
    pub ca_cert: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            verify_tls: true,
            ca_cert: None,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Build a reqwest client from options.
///
/// # Errors
/// Returns an error if the CA bundle cannot be read or the client cannot be created.
pub fn build_client(options: &HttpOptions) -> Result<Client, PkgError> {
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.timeout)
        .user_agent(USER_AGENT);

    if !options.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(path) = &options.ca_cert {
        let pem = std::fs::read(path).map_err(|e| {
            PkgError::config_invalid(format!("Failed to read CA bundle {}: {e}", path.display()))
        })?;
        let cert = Certificate::from_pem(&pem).map_err(|e| {
            PkgError::config_invalid(format!("Invalid CA bundle {}: {e}", path.display()))
        })?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| PkgError::config_invalid(format!("Failed to create HTTP client: {e}")))
}

/// Join URL segments with exactly one `/` between them.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) if !path.is_empty() => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Attach basic auth when credentials are present.
pub fn with_auth(request: RequestBuilder, auth: Option<&Credentials>) -> RequestBuilder {
    match auth {
        Some(c) => request.basic_auth(&c.user, Some(&c.password)),
        None => request,
    }
}

/// GET a page as text.
///
/// # Errors
/// `PKG_NOT_FOUND` on 404, `PKG_REGISTRY_ERROR` on other failures.
pub async fn get_text(
    client: &Client,
    url: &str,
    auth: Option<&Credentials>,
) -> Result<String, PkgError> {
    let response = with_auth(client.get(url), auth).send().await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(PkgError::not_found(url));
    }

    if !response.status().is_success() {
        return Err(PkgError::registry(format!(
            "Server returned status {} for '{url}'",
            response.status()
        )));
    }

    Ok(response.text().await?)
}

/// Poll `url` until it answers 2xx, with exponential backoff between attempts.
pub async fn check_reachable(
    client: &Client,
    url: &str,
    auth: Option<&Credentials>,
    max_attempts: u32,
    initial_backoff: Duration,
) -> bool {
    let attempts = max_attempts.max(1);
    let mut delay = initial_backoff;

    for attempt in 1..=attempts {
        debug!(url, attempt, "checking connection");
        match with_auth(client.get(url), auth).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => {
                warn!(url, attempt, status = %response.status(), "connection check failed");
            }
            Err(e) => warn!(url, attempt, error = %e, "connection check failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(RETRY_MAX_BACKOFF);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://h/a", "b"), "https://h/a/b");
        assert_eq!(join_url("https://h/a/", "b"), "https://h/a/b");
        assert_eq!(join_url("https://h/a/", "/b"), "https://h/a/b");
        assert_eq!(join_url("https://h/a", "/b"), "https://h/a/b");
        assert_eq!(join_url("https://h/a", ""), "https://h/a");
    }

    #[test]
    fn test_client_creation() {
        assert!(build_client(&HttpOptions::default()).is_ok());
        let insecure = HttpOptions {
            verify_tls: false,
            ..Default::default()
        };
        assert!(build_client(&insecure).is_ok());
    }

    #[test]
    fn test_missing_ca_bundle() {
        let options = HttpOptions {
            ca_cert: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        let err = build_client(&options).unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_CONFIG_INVALID);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let c = Credentials {
            user: "john".into(),
            password: "secret".into(),
        };
        let s = format!("{c:?}");
        assert!(s.contains("john"));
        assert!(!s.contains("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_url() {
        let client = build_client(&HttpOptions::default()).unwrap();
        // Port 9 (discard) is closed on test machines
        let ok = check_reachable(&client, "http://127.0.0.1:9/", None, 2, Duration::from_millis(10)).await;
        assert!(!ok);
    }
}
