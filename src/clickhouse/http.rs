//! The production driver, speaking ClickHouse's HTTP interface.
//!
//! Structured results travel as JSONCompact (`default_format`, so statements
//! without a result set stay valid); formatted queries return the body
//! verbatim; bulk inserts stream rows as JSONCompactEachRow. Named
//! parameters use server-side binding: `{name:Type}` placeholders in the
//! query, `param_name=value` on the wire.
//!
//! Every call here is a blocking round trip; sessions are only ever driven
//! from the runtime's blocking worker pool (see
//! [`crate::clickhouse::connection`]).

use crate::clickhouse::driver::{
    ColumnSpec, Driver, DriverSession, Params, Query, QueryOutput, Row,
};
use crate::config::ClickHouseConfig;
use crate::error::{from_clickhouse_code, ServerError};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::{Certificate, Identity, Url};
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, BufReader};

/// Driver over the ClickHouse HTTP interface.
#[derive(Debug, Default)]
pub struct HttpDriver;

impl HttpDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for HttpDriver {
    fn open(&self, options: &ClickHouseConfig) -> Result<Box<dyn DriverSession>, ServerError> {
        let mut builder = HttpClient::builder()
            .connect_timeout(options.connect_timeout)
            // Query deadlines are enforced server-side via max_execution_time.
            .timeout(None);

        if options.secure {
            if !options.verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(ca_cert) = &options.ca_cert {
                let pem = std::fs::read(ca_cert)?;
                let cert = Certificate::from_pem(&pem).map_err(|e| {
                    ServerError::config(format!("Invalid CA certificate: {}", e))
                })?;
                builder = builder.add_root_certificate(cert);
            }
            if let (Some(cert), Some(key)) = (&options.client_cert, &options.client_key) {
                let mut pem = std::fs::read(cert)?;
                pem.extend(std::fs::read(key)?);
                let identity = Identity::from_pem(&pem).map_err(|e| {
                    ServerError::config(format!("Invalid client certificate: {}", e))
                })?;
                builder = builder.identity(identity);
            }
        }

        let http = builder
            .build()
            .map_err(|e| ServerError::connection_with_source("Failed to build HTTP client", e))?;

        let scheme = if options.secure { "https" } else { "http" };
        let base = Url::parse(&format!("{}://{}:{}/", scheme, options.host, options.port))
            .map_err(|e| ServerError::config(format!("Invalid server address: {}", e)))?;

        Ok(Box::new(HttpSession {
            http,
            base,
            options: options.clone(),
        }))
    }
}

/// One HTTP session. ClickHouse HTTP is stateless per request; the session
/// holds the configured client and credentials.
struct HttpSession {
    http: HttpClient,
    base: Url,
    options: ClickHouseConfig,
}

/// Shape of a JSONCompact response body.
#[derive(Deserialize)]
struct JsonCompactBody {
    meta: Vec<ColumnSpec>,
    data: Vec<Row>,
}

impl DriverSession for HttpSession {
    fn execute(&mut self, query: &Query) -> Result<QueryOutput, ServerError> {
        let response = self.dispatch(query, Some("JSONCompact"))?;
        let text = response
            .text()
            .map_err(|e| ServerError::connection_with_source("Failed to read response", e))?;

        if text.trim().is_empty() {
            // Statements without a result set (DDL, INSERT) return no body.
            return Ok(QueryOutput::default());
        }

        let body: JsonCompactBody = serde_json::from_str(&text).map_err(|e| {
            ServerError::query_error(format!("Unexpected response from server: {}", e))
        })?;

        Ok(QueryOutput {
            rows: body.data,
            columns: query.with_column_types.then_some(body.meta),
        })
    }

    fn execute_text(&mut self, query: &Query) -> Result<String, ServerError> {
        let response = self.dispatch(query, None)?;
        response
            .text()
            .map_err(|e| ServerError::connection_with_source("Failed to read response", e))
    }

    fn execute_iter<'a>(
        &'a mut self,
        query: &Query,
    ) -> Result<Box<dyn Iterator<Item = Result<Row, ServerError>> + Send + 'a>, ServerError> {
        let response = self.dispatch(query, Some("JSONCompactEachRow"))?;
        let reader = BufReader::new(response);

        let rows = reader.lines().filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(serde_json::from_str::<Row>(&line).map_err(|e| {
                ServerError::query_error(format!("Unexpected row in response stream: {}", e))
            })),
            Err(e) => Some(Err(ServerError::from(e))),
        });

        Ok(Box::new(rows))
    }
}

impl HttpSession {
    /// Send a query and return the raw response, with backend errors mapped
    /// into the [`ServerError`] taxonomy.
    fn dispatch(
        &self,
        query: &Query,
        default_format: Option<&str>,
    ) -> Result<Response, ServerError> {
        let mut url = self.base.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &self.options.database);
            if let Some(format) = default_format {
                pairs.append_pair("default_format", format);
            }
            if let Some(query_id) = &query.query_id {
                pairs.append_pair("query_id", query_id);
            }
            for (key, value) in &query.settings {
                pairs.append_pair(key, &scalar_string(value));
            }
            if let Some(Params::Named(params)) = &query.params {
                for (name, value) in params {
                    pairs.append_pair(&format!("param_{}", name), &scalar_string(value));
                }
            }
            if self.options.compression {
                pairs.append_pair("enable_http_compression", "1");
            }
        }

        let body = match &query.params {
            Some(Params::Rows(rows)) => render_insert_body(&query.text, rows)?,
            _ => query.text.clone(),
        };

        let mut request = self
            .http
            .post(url)
            .header("X-ClickHouse-User", &self.options.user)
            .body(body);
        if !self.options.password.is_empty() {
            request = request.header("X-ClickHouse-Key", &self.options.password);
        }

        let response = request.send().map_err(classify_transport_error)?;
        let status = response.status();
        let exception_code = response
            .headers()
            .get("x-clickhouse-exception-code")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());

        if !status.is_success() || exception_code.is_some() {
            let text = response.text().unwrap_or_default();
            let message = text.trim();
            let code = exception_code.or_else(|| parse_exception_code(message));
            return Err(match code {
                Some(code) => from_clickhouse_code(code, message),
                None => ServerError::query_error(format!(
                    "Server returned {}: {}",
                    status, message
                )),
            });
        }

        Ok(response)
    }
}

/// Rewrite a `... VALUES` insert head for the HTTP interface and serialize
/// the rows as JSONCompactEachRow lines after it.
fn render_insert_body(text: &str, rows: &[Row]) -> Result<String, ServerError> {
    let head = text.trim_end();
    let upper = head.to_uppercase();
    let statement = if upper.ends_with("VALUES") {
        let stripped = head[..head.len() - "VALUES".len()].trim_end();
        format!("{} FORMAT JSONCompactEachRow", stripped)
    } else if upper.contains("FORMAT") {
        head.to_string()
    } else {
        format!("{} FORMAT JSONCompactEachRow", head)
    };

    let mut body = statement;
    body.push('\n');
    for row in rows {
        let line = serde_json::to_string(row)
            .map_err(|e| ServerError::internal(format!("Failed to serialize row: {}", e)))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

/// Render a settings/params value the way ClickHouse expects it on the URL.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pull the `Code: N.` prefix out of a ClickHouse exception body.
fn parse_exception_code(message: &str) -> Option<i64> {
    let rest = message.split("Code: ").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn classify_transport_error(e: reqwest::Error) -> ServerError {
    if e.is_timeout() {
        ServerError::timeout(0)
    } else if e.is_connect() {
        ServerError::connection(format!("Failed to reach server: {}", e))
    } else {
        ServerError::connection_with_source("HTTP transport error", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_insert_body_rewrites_values() {
        let body = render_insert_body(
            "INSERT INTO `db`.`t` (`a`, `b`) VALUES",
            &[vec![json!(1), json!("x")], vec![json!(2), Value::Null]],
        )
        .unwrap();

        let mut lines = body.lines();
        assert_eq!(
            lines.next(),
            Some("INSERT INTO `db`.`t` (`a`, `b`) FORMAT JSONCompactEachRow")
        );
        assert_eq!(lines.next(), Some("[1,\"x\"]"));
        assert_eq!(lines.next(), Some("[2,null]"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_render_insert_body_keeps_existing_format() {
        let body =
            render_insert_body("INSERT INTO t (a) FORMAT JSONEachRow", &[vec![json!(1)]]).unwrap();
        assert!(body.starts_with("INSERT INTO t (a) FORMAT JSONEachRow\n"));
    }

    #[test]
    fn test_parse_exception_code() {
        assert_eq!(
            parse_exception_code("Code: 60. DB::Exception: Table default.x does not exist."),
            Some(60)
        );
        assert_eq!(parse_exception_code("no code here"), None);
    }

    #[test]
    fn test_scalar_string() {
        assert_eq!(scalar_string(&json!("plain")), "plain");
        assert_eq!(scalar_string(&json!(30)), "30");
        assert_eq!(scalar_string(&json!(true)), "true");
    }

    #[test]
    fn test_json_compact_body_parsing() {
        let text = r#"{
            "meta": [{"name": "n", "type": "UInt8"}],
            "data": [[1], [2]],
            "rows": 2
        }"#;
        let body: JsonCompactBody = serde_json::from_str(text).unwrap();
        assert_eq!(body.meta[0].name, "n");
        assert_eq!(body.data.len(), 2);
    }
}
