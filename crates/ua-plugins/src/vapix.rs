//! Device API access
//!
//! Plugins talk to the camera's VAPIX CGI endpoints through a
//! `VapixTransport`. The production transport is an HTTP client
//! authenticated with service-account credentials fetched over D-Bus.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const VAPIX_BASE_URL: &str = "http://127.0.0.12/axis-cgi/";

const CREDENTIALS_SERVICE: &str = "com.axis.HTTPConf1";
const CREDENTIALS_PATH: &str = "/com/axis/HTTPConf1/VAPIXServiceAccounts1";
const CREDENTIALS_INTERFACE: &str = "com.axis.HTTPConf1.VAPIXServiceAccounts1";

#[derive(Error, Debug)]
pub enum VapixError {
    #[error("Got response code {code} from request to {endpoint} with response '{body}'")]
    Status {
        code: u16,
        endpoint: String,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("DBus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("Invalid credentials: {0}")]
    Credentials(String),

    #[error("'{method}' error: {message}")]
    Api { method: String, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl VapixError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        VapixError::Malformed(msg.into())
    }
}

impl From<serde_json::Error> for VapixError {
    fn from(err: serde_json::Error) -> Self {
        VapixError::Malformed(err.to_string())
    }
}

impl From<VapixError> for ua_core::Error {
    fn from(err: VapixError) -> Self {
        ua_core::Error::DataSource(err.to_string())
    }
}

/// Request/response access to VAPIX endpoints (`endpoint` is relative to
/// the CGI root, e.g. `io/portmanagement.cgi`)
#[async_trait]
pub trait VapixTransport: Send + Sync {
    async fn get(&self, endpoint: &str) -> Result<String, VapixError>;

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<String, VapixError>;
}

/// Call a JSON-RPC style VAPIX method and return its `data` member
///
/// An `error` member in the response becomes `VapixError::Api`; a response
/// without `data` yields `Value::Null`.
pub async fn json_method(
    transport: &dyn VapixTransport,
    endpoint: &str,
    method: &str,
    body: &Value,
) -> Result<Value, VapixError> {
    let text = transport.post_json(endpoint, body).await?;
    let mut response: Value = serde_json::from_str(&text)
        .map_err(|e| VapixError::malformed(format!("'{}' failed: {}", method, e)))?;

    if let Some(error) = response.get("error") {
        return Err(match error.get("message").and_then(Value::as_str) {
            Some(message) => VapixError::Api {
                method: method.to_string(),
                message: message.to_string(),
            },
            None => VapixError::malformed(format!("'{}': unknown error", method)),
        });
    }

    Ok(response.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

/// Split a `user:password` credential string
pub fn parse_credentials(raw: &str) -> Result<(String, String), VapixError> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 2 {
        return Err(VapixError::Credentials(format!(
            "Invalid credential string: expected 2 parts, got {}",
            parts.len()
        )));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Fetches service-account credentials from the HTTP configuration service
pub struct DbusCredentials {
    connection: zbus::Connection,
}

impl DbusCredentials {
    pub async fn system() -> Result<Self, VapixError> {
        let connection = zbus::Connection::system().await?;
        Ok(Self { connection })
    }

    pub async fn fetch(&self, service_account: &str) -> Result<(String, String), VapixError> {
        let proxy: zbus::Proxy<'_> = zbus::proxy::Builder::new(&self.connection)
            .destination(CREDENTIALS_SERVICE)?
            .path(CREDENTIALS_PATH)?
            .interface(CREDENTIALS_INTERFACE)?
            .build()
            .await?;

        let raw: String = proxy.call("GetCredentials", &(service_account,)).await?;
        debug!("Fetched credentials for {}", service_account);
        parse_credentials(&raw)
    }
}

/// VAPIX over HTTP with basic authentication
pub struct HttpVapixClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpVapixClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Result<Self, VapixError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn finish(endpoint: &str, response: reqwest::Response) -> Result<String, VapixError> {
        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(VapixError::Status {
                code: status.as_u16(),
                endpoint: endpoint.to_string(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VapixTransport for HttpVapixClient {
    async fn get(&self, endpoint: &str) -> Result<String, VapixError> {
        debug!("VAPIX GET {}", endpoint);
        let response = self
            .client
            .get(self.url(endpoint))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::finish(endpoint, response).await
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<String, VapixError> {
        debug!("VAPIX POST {}", endpoint);
        let response = self
            .client
            .post(self.url(endpoint))
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        Self::finish(endpoint, response).await
    }
}

/// Produces an authenticated transport for a service account
#[async_trait]
pub trait VapixConnector: Send + Sync {
    async fn connect(&self, service_account: &str) -> Result<Arc<dyn VapixTransport>, VapixError>;
}

/// Credentials over the system bus, requests over HTTP
pub struct DefaultVapixConnector {
    base_url: String,
}

impl DefaultVapixConnector {
    pub fn new() -> Self {
        Self {
            base_url: VAPIX_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Default for DefaultVapixConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VapixConnector for DefaultVapixConnector {
    async fn connect(&self, service_account: &str) -> Result<Arc<dyn VapixTransport>, VapixError> {
        let credentials = DbusCredentials::system().await?;
        let (username, password) = credentials.fetch(service_account).await?;
        let client = HttpVapixClient::new(self.base_url.clone(), username, password)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Canned(&'static str);

    #[async_trait]
    impl VapixTransport for Canned {
        async fn get(&self, _endpoint: &str) -> Result<String, VapixError> {
            Ok(self.0.to_string())
        }

        async fn post_json(&self, _endpoint: &str, _body: &Value) -> Result<String, VapixError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_parse_credentials() {
        assert_eq!(
            parse_credentials("user:secret").unwrap(),
            ("user".to_string(), "secret".to_string())
        );
        assert!(parse_credentials("user").is_err());
        assert!(parse_credentials("a:b:c").is_err());
    }

    #[test]
    fn test_credential_error_hides_the_secret() {
        let err = parse_credentials("admin:hunter2:x").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("got 3"));
        assert!(!message.contains("hunter2"));
        assert!(!ua_core::Error::from(err).to_string().contains("admin"));
    }

    #[tokio::test]
    async fn test_json_method_returns_data() {
        let transport = Canned(r#"{"apiVersion":"1.1","data":{"numberOfPorts":2}}"#);
        let data = json_method(&transport, "io/portmanagement.cgi", "getPorts", &json!({}))
            .await
            .unwrap();
        assert_eq!(data["numberOfPorts"], 2);
    }

    #[tokio::test]
    async fn test_json_method_reports_api_error() {
        let transport = Canned(r#"{"error":{"code":2002,"message":"Unsupported version"}}"#);
        let err = json_method(&transport, "io/portmanagement.cgi", "getPorts", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "'getPorts' error: Unsupported version");
    }

    #[test]
    fn test_status_error_message() {
        let err = VapixError::Status {
            code: 401,
            endpoint: "thermometry.cgi".to_string(),
            body: "Unauthorized".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Got response code 401 from request to thermometry.cgi with response 'Unauthorized'"
        );
    }
}
