//! One-Time Token
//!
//! The server authenticates a socket by the `ott` sent with `join`. The
//! token comes from the site's HTTP endpoint, exchanged for a session
//! cookie. This module only fetches it; the token itself is opaque.

use reqwest::header::COOKIE;
use thiserror::Error;

/// Where the join token comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TokenSource {
    /// Join anonymously (watch only).
    #[default]
    None,
    /// A token obtained elsewhere.
    Static(String),
    /// POST to `url` with cookie `id=<session>`; the body is the token.
    Http {
        /// Token endpoint.
        url: String,
        /// Session cookie value.
        session: String,
    },
}

impl TokenSource {
    /// Create from environment variables.
    ///
    /// `CRASHPOINT_OTT_URL` and `CRASHPOINT_SESSION` together select the
    /// HTTP exchange; `CRASHPOINT_OTT` alone is used as a static token.
    pub fn from_env() -> Self {
        let url = std::env::var("CRASHPOINT_OTT_URL").ok();
        let session = std::env::var("CRASHPOINT_SESSION").ok();
        let token = std::env::var("CRASHPOINT_OTT").ok();
        Self::from_parts(url, session, token)
    }

    fn from_parts(url: Option<String>, session: Option<String>, token: Option<String>) -> Self {
        match (url, session, token) {
            (Some(url), Some(session), _) => TokenSource::Http { url, session },
            (_, _, Some(token)) => TokenSource::Static(token),
            _ => TokenSource::None,
        }
    }

    /// Check if a token will be sent.
    pub fn is_configured(&self) -> bool {
        !matches!(self, TokenSource::None)
    }

    /// Fetch a fresh token. Called once per connection.
    pub async fn fetch(&self) -> Result<Option<String>, TokenError> {
        match self {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Http { url, session } => {
                let response = reqwest::Client::new()
                    .post(url)
                    .header(COOKIE, format!("id={}", session))
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    return Err(TokenError::Status(status.as_u16()));
                }

                let token = response.text().await?.trim().to_string();
                if token.is_empty() {
                    return Err(TokenError::Empty);
                }
                Ok(Some(token))
            }
        }
    }
}

/// Token exchange errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Request failed.
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Endpoint answered with a non-success status.
    #[error("token endpoint returned status {0}")]
    Status(u16),
    /// Endpoint answered with an empty body.
    #[error("token endpoint returned an empty body")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response; returns the URL and the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ott", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_from_parts() {
        let http = TokenSource::from_parts(Some("u".into()), Some("s".into()), Some("t".into()));
        assert_eq!(
            http,
            TokenSource::Http {
                url: "u".to_string(),
                session: "s".to_string(),
            }
        );

        let fixed = TokenSource::from_parts(Some("u".into()), None, Some("t".into()));
        assert_eq!(fixed, TokenSource::Static("t".to_string()));

        assert_eq!(TokenSource::from_parts(None, Some("s".into()), None), TokenSource::None);
        assert!(!TokenSource::default().is_configured());
    }

    #[tokio::test]
    async fn test_fetch_without_http() {
        assert_eq!(TokenSource::None.fetch().await.unwrap(), None);
        assert_eq!(
            TokenSource::Static("abc".to_string()).fetch().await.unwrap(),
            Some("abc".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_http_sends_cookie_and_trims() {
        let (url, server) = serve_once("200 OK", "  tok-123\n").await;
        let source = TokenSource::Http {
            url,
            session: "sess-9".to_string(),
        };

        let token = source.fetch().await.unwrap();
        assert_eq!(token, Some("tok-123".to_string()));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /ott"));
        assert!(request.to_ascii_lowercase().contains("cookie: id=sess-9"));
    }

    #[tokio::test]
    async fn test_fetch_http_error_status() {
        let (url, _server) = serve_once("403 Forbidden", "").await;
        let source = TokenSource::Http {
            url,
            session: "expired".to_string(),
        };

        let result = source.fetch().await;
        assert!(matches!(result, Err(TokenError::Status(403))));
    }
}
