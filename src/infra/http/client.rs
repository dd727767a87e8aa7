//! reqwest client posting single statements to a SQL-over-HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::app::HttpQueryClient;
use crate::app::HttpQueryResult;
use crate::app::normalize::to_array_literal;
use crate::domain::{ColumnType, DriverError, Query, RawServerError};
use crate::infra::database::bind::{to_bytes, to_json};

const ARRAY_MODE_HEADER: &str = "Neon-Array-Mode";
const RAW_TEXT_HEADER: &str = "Neon-Raw-Text-Output";
const CONNECTION_STRING_HEADER: &str = "Neon-Connection-String";

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    /// Sent along with every request when the endpoint serves several databases.
    pub connection_string: Option<SecretString>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connection_string: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct SqlRequest<'a> {
    query: &'a str,
    params: Vec<Option<String>>,
}

/// Posts `{query, params}` to `<endpoint>/sql`, asking for positional rows
/// of raw wire text.
pub struct SqlOverHttpClient {
    http_client: Client,
    url: SecretString,
    config: HttpClientConfig,
}

impl SqlOverHttpClient {
    pub fn new(endpoint: &SecretString, config: HttpClientConfig) -> Result<Self, DriverError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        let url = format!("{}/sql", endpoint.expose_secret().trim_end_matches('/'));
        info!("Created SQL-over-HTTP client");
        Ok(Self {
            http_client,
            url: SecretString::from(url),
            config,
        })
    }

    pub fn with_defaults(endpoint: &SecretString) -> Result<Self, DriverError> {
        Self::new(endpoint, HttpClientConfig::default())
    }
}

#[async_trait]
impl HttpQueryClient for SqlOverHttpClient {
    #[instrument(skip_all)]
    async fn query(&self, query: &Query) -> Result<HttpQueryResult, DriverError> {
        let params = query
            .args
            .iter()
            .enumerate()
            .map(|(index, value)| {
                to_param(value, query.arg_type(index)).map_err(|message| {
                    DriverError::Decode(format!("argument ${}: {message}", index + 1))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let body = SqlRequest {
            query: &query.sql,
            params,
        };

        let mut request = self
            .http_client
            .post(self.url.expose_secret())
            .header(ARRAY_MODE_HEADER, "true")
            .header(RAW_TEXT_HEADER, "true")
            .json(&body);
        if let Some(connection_string) = &self.config.connection_string {
            request = request.header(CONNECTION_STRING_HEADER, connection_string.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;

        if !status.is_success() {
            debug!(status = %status, "SQL-over-HTTP request failed");
            return Err(error_from_body(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| DriverError::Decode(e.to_string()))
    }
}

/// Text form of one argument, `None` for SQL `NULL`.
///
/// Byte arguments are base64 or byte arrays in the query and travel as
/// `bytea` hex text; JSON arguments travel serialized.
fn to_param(value: &Value, hint: Option<ColumnType>) -> Result<Option<String>, String> {
    if value.is_null() {
        return Ok(None);
    }
    let text = match (hint, value) {
        (Some(ColumnType::Bytes), _) => bytea_hex(value)?,
        (Some(ColumnType::BytesArray), Value::Array(items)) => {
            let items = items
                .iter()
                .map(|item| match item {
                    Value::Null => Ok(Value::Null),
                    other => bytea_hex(other).map(Value::String),
                })
                .collect::<Result<Vec<_>, String>>()?;
            to_array_literal(&items)
        }
        (Some(ColumnType::Json), _) => to_json(value)?.0.to_string(),
        (_, Value::String(text)) => text.clone(),
        (_, Value::Bool(flag)) => flag.to_string(),
        (_, Value::Number(number)) => number.to_string(),
        (_, Value::Array(items)) => to_array_literal(items),
        (_, object) => object.to_string(),
    };
    Ok(Some(text))
}

fn bytea_hex(value: &Value) -> Result<String, String> {
    let bytes = to_bytes(value)?;
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}

/// Server errors keep their fields so they can be classified; anything
/// else is a transport failure.
fn error_from_body(status: u16, body: &str) -> DriverError {
    match serde_json::from_str::<RawServerError>(body) {
        Ok(raw) if raw.code.is_some() || raw.message.is_some() => DriverError::Database(raw),
        _ => DriverError::Io(format!("HTTP {status}: {body}")),
    }
}
