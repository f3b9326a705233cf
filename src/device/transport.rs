//! HTTP transport for the IoTaWatt Query API
//!
//! A single blocking GET that answers HTTP digest challenges when
//! credentials are configured. Retrying is the query layer's job.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::errors::TransportError;

/// Status code and body of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Request/response primitive underneath the query layer
pub trait Transport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Username/password pair for digest authentication
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .finish()
    }
}

/// Blocking reqwest transport with optional digest authentication
pub struct HttpTransport {
    client: Client,
    credentials: Option<Credentials>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, credentials: Option<Credentials>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("iotawatt-access/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                reason: format!("building http client: {}", e),
            })?;
        Ok(Self {
            client,
            credentials,
        })
    }

    fn send(
        &self,
        url: &str,
        authorization: Option<String>,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        let mut request = self.client.get(url);
        if let Some(header) = authorization {
            request = request.header(AUTHORIZATION, header);
        }
        request.send().map_err(|e| TransportError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Build the Authorization header answering a digest challenge
    fn answer_challenge(
        url: &str,
        challenge: &str,
        credentials: &Credentials,
    ) -> Result<String, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::Authentication(e.to_string()))?;
        let uri = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };
        let context =
            digest_auth::AuthContext::new(&credentials.username, &credentials.password, &uri);
        let mut prompt = digest_auth::parse(challenge)
            .map_err(|e| TransportError::Authentication(e.to_string()))?;
        let answer = prompt
            .respond(&context)
            .map_err(|e| TransportError::Authentication(e.to_string()))?;
        Ok(answer.to_header_string())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let mut response = self.send(url, None)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(credentials) = &self.credentials {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                if let Some(challenge) = challenge {
                    debug!("Answering digest challenge for {}", url);
                    let header = Self::answer_challenge(url, &challenge, credentials)?;
                    response = self.send(url, Some(header))?;
                }
            }
        }

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| TransportError::Request {
            url: url.to_string(),
            reason: format!("reading body: {}", e),
        })?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let output = format!("{:?}", credentials);
        assert!(output.contains("admin"));
        assert!(!output.contains("secret"));
    }

    #[test]
    fn test_digest_answer_uses_path_and_query() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let challenge = r#"Digest realm="admin@iotawatt", qop="auth", nonce="0a4f113b", opaque="5ccc069c""#;
        let header = HttpTransport::answer_challenge(
            "http://iotawatt.local/query?show=series",
            challenge,
            &credentials,
        )
        .unwrap();
        assert!(header.starts_with("Digest "));
        assert!(header.contains(r#"username="admin""#));
        assert!(header.contains(r#"uri="/query?show=series""#));
        assert!(!header.contains("secret"));
    }
}
