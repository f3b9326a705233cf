//! Query primitive: one authenticated request with bounded retries
//!
//! Every attempt can fail on its own (transport error, non-200 status,
//! undecodable body). Failed attempts are retried until the budget runs
//! out; the final error is classified from the last response received.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use super::transport::Transport;
use crate::errors::IotaWattError;

/// One step of a query transaction, as seen by a [`TransactionLog`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryEvent<'a> {
    Request { url: &'a str },
    TransportFailure { attempt: u32, reason: &'a str },
    Status { code: u16 },
    Response { body: &'a str },
    ParseSuccess,
    ParseError,
}

impl std::fmt::Display for QueryEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryEvent::Request { url } => write!(f, "REQUEST\n{}", url),
            QueryEvent::TransportFailure { attempt, reason } => {
                write!(f, "TRANSPORT FAILURE (attempt {})\n{}", attempt, reason)
            }
            QueryEvent::Status { code } => write!(f, "STATUS CODE: {}", code),
            QueryEvent::Response { body } => write!(f, "RESPONSE\n{}", body),
            QueryEvent::ParseSuccess => f.write_str("JSON PARSE SUCCESS"),
            QueryEvent::ParseError => f.write_str("JSON PARSE ERROR"),
        }
    }
}

/// Sink for request/response transaction records
pub trait TransactionLog {
    fn record(&mut self, event: &QueryEvent<'_>);
}

/// Transaction log appended to a file that stays open for the session
pub struct FileTransactionLog {
    writer: BufWriter<File>,
}

impl FileTransactionLog {
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl TransactionLog for FileTransactionLog {
    fn record(&mut self, event: &QueryEvent<'_>) {
        let written = writeln!(self.writer, "{}", event).and_then(|_| self.writer.flush());
        if let Err(e) = written {
            warn!("Failed to write transaction log: {}", e);
        }
    }
}

/// Outcome of the last attempt that actually produced a response
enum Failure {
    Status(u16),
    Parse(usize),
}

/// Query API access over a [`Transport`]
pub struct QueryApi<T: Transport> {
    base_url: String,
    transport: T,
    log: Option<Box<dyn TransactionLog>>,
}

impl<T: Transport> QueryApi<T> {
    pub fn new(url: &str, transport: T) -> Self {
        let mut base_url = url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            transport,
            log: None,
        }
    }

    /// Install a transaction log for the rest of the session
    pub fn with_log(mut self, log: Box<dyn TransactionLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record(&mut self, event: QueryEvent<'_>) {
        if let Some(log) = self.log.as_mut() {
            log.record(&event);
        }
    }

    /// Send `query` (relative to the device URL) and decode the JSON body.
    ///
    /// # Errors
    /// - `ExhaustedRetries` if no attempt received any response
    /// - `ConnectionFailure` if the last response had a non-200 status
    /// - `ParseFailure` if the last response could not be decoded
    pub fn query(&mut self, query: &str, retry: u32) -> Result<Value, IotaWattError> {
        let url = format!("{}{}", self.base_url, query);
        debug!("Query: {}", url);
        self.record(QueryEvent::Request { url: &url });

        let mut last_failure = None;
        for attempt in 1..=retry {
            let response = match self.transport.get(&url) {
                Ok(response) => response,
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Attempt {}/{} failed: {}", attempt, retry, reason);
                    self.record(QueryEvent::TransportFailure {
                        attempt,
                        reason: &reason,
                    });
                    continue;
                }
            };

            self.record(QueryEvent::Status {
                code: response.status,
            });
            if !response.is_success() {
                warn!(
                    "Attempt {}/{}: connection error code {}",
                    attempt, retry, response.status
                );
                last_failure = Some(Failure::Status(response.status));
                continue;
            }

            self.record(QueryEvent::Response {
                body: &response.body,
            });
            match serde_json::from_str::<Value>(&response.body) {
                Ok(json) => {
                    self.record(QueryEvent::ParseSuccess);
                    return Ok(json);
                }
                Err(e) => {
                    warn!("Attempt {}/{}: JSON parse error: {}", attempt, retry, e);
                    self.record(QueryEvent::ParseError);
                    last_failure = Some(Failure::Parse(response.body.len()));
                }
            }
        }

        Err(match last_failure {
            None => IotaWattError::ExhaustedRetries {
                query: query.to_string(),
                attempts: retry,
            },
            Some(Failure::Status(status)) => IotaWattError::ConnectionFailure {
                query: query.to_string(),
                status,
            },
            Some(Failure::Parse(length)) => IotaWattError::ParseFailure {
                query: query.to_string(),
                length,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::HttpResponse;
    use crate::errors::TransportError;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct Scripted(RefCell<VecDeque<Result<HttpResponse, TransportError>>>);

    impl Scripted {
        fn new(steps: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self(RefCell::new(steps.into()))
        }
    }

    impl Transport for Scripted {
        fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
            self.0.borrow_mut().pop_front().unwrap_or_else(|| {
                Err(TransportError::Request {
                    url: url.to_string(),
                    reason: "script exhausted".to_string(),
                })
            })
        }
    }

    fn timeout() -> Result<HttpResponse, TransportError> {
        Err(TransportError::Request {
            url: "http://iotawatt.local/".to_string(),
            reason: "timed out".to_string(),
        })
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            body: String::new(),
        })
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<String>>>);

    impl TransactionLog for Recorder {
        fn record(&mut self, event: &QueryEvent<'_>) {
            self.0.borrow_mut().push(event.to_string());
        }
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let api = QueryApi::new("http://iotawatt.local", Scripted::new(vec![]));
        assert_eq!(api.base_url(), "http://iotawatt.local/");
    }

    #[test]
    fn test_retries_until_success() {
        let transport = Scripted::new(vec![
            timeout(),
            status(500),
            Ok(HttpResponse::ok("{not json")),
            Ok(HttpResponse::ok(r#"{"series":[]}"#)),
        ]);
        let mut api = QueryApi::new("http://iotawatt.local", transport);
        let json = api.query("query?show=series", 4).unwrap();
        assert_eq!(json["series"], serde_json::json!([]));
    }

    #[test]
    fn test_all_transport_failures_exhaust_retries() {
        let transport = Scripted::new(vec![timeout(), timeout(), timeout()]);
        let mut api = QueryApi::new("http://iotawatt.local", transport);
        let err = api.query("status?inputs", 3).unwrap_err();
        assert!(matches!(
            err,
            IotaWattError::ExhaustedRetries { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_last_status_is_reported() {
        let transport = Scripted::new(vec![status(503), timeout(), status(401)]);
        let mut api = QueryApi::new("http://iotawatt.local", transport);
        let err = api.query("status?inputs", 3).unwrap_err();
        assert!(matches!(
            err,
            IotaWattError::ConnectionFailure { status: 401, .. }
        ));
    }

    #[test]
    fn test_parse_failure_after_budget() {
        let transport = Scripted::new(vec![status(500), Ok(HttpResponse::ok("[1,2"))]);
        let mut api = QueryApi::new("http://iotawatt.local", transport);
        let err = api.query("query?show=series", 2).unwrap_err();
        assert!(matches!(err, IotaWattError::ParseFailure { length: 4, .. }));
    }

    #[test]
    fn test_success_stops_retrying() {
        let transport = Scripted::new(vec![Ok(HttpResponse::ok("[]")), status(500)]);
        let mut api = QueryApi::new("http://iotawatt.local", transport);
        assert_eq!(api.query("query?x", 3).unwrap(), serde_json::json!([]));
        assert_eq!(api.transport.0.borrow().len(), 1);
    }

    #[test]
    fn test_transaction_log_records_exchange() {
        let recorder = Recorder::default();
        let transport = Scripted::new(vec![status(500), Ok(HttpResponse::ok("[]"))]);
        let mut api = QueryApi::new("http://iotawatt.local", transport)
            .with_log(Box::new(recorder.clone()));
        api.query("status?outputs", 3).unwrap();

        let events = recorder.0.borrow();
        assert_eq!(
            *events,
            vec![
                "REQUEST\nhttp://iotawatt.local/status?outputs".to_string(),
                "STATUS CODE: 500".to_string(),
                "STATUS CODE: 200".to_string(),
                "RESPONSE\n[]".to_string(),
                "JSON PARSE SUCCESS".to_string(),
            ]
        );
    }

    #[test]
    fn test_file_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transactions.log");
        {
            let mut log = FileTransactionLog::open(&path).unwrap();
            log.record(&QueryEvent::Status { code: 200 });
        }
        {
            let mut log = FileTransactionLog::open(&path).unwrap();
            log.record(&QueryEvent::ParseError);
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "STATUS CODE: 200\nJSON PARSE ERROR\n");
    }
}
