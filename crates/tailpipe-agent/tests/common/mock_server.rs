//! Mock HTTP intake server for pipeline tests.
//!
//! Captures every request and answers with a scripted status sequence
//! (200 once the script runs out), so tests can stage rate-limit and
//! server-error behavior.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }
}

#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    received_requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    scripted_statuses: Arc<Mutex<VecDeque<u16>>>,
}

impl MockServer {
    /// Starts a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received_requests = Arc::new(Mutex::new(Vec::new()));
        let scripted_statuses = Arc::new(Mutex::new(VecDeque::new()));
        let requests_clone = Arc::clone(&received_requests);
        let statuses_clone = Arc::clone(&scripted_statuses);

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let requests = Arc::clone(&requests_clone);
                let statuses = Arc::clone(&statuses_clone);

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let requests = Arc::clone(&requests);
                        let statuses = Arc::clone(&statuses);
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let headers: Vec<(String, String)> = req
                                .headers()
                                .iter()
                                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                                .collect();

                            let body = req
                                .into_body()
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes().to_vec())
                                .unwrap_or_default();

                            requests.lock().unwrap().push(ReceivedRequest {
                                method,
                                path,
                                headers,
                                body,
                            });

                            let status =
                                statuses.lock().unwrap().pop_front().unwrap_or(200);
                            Ok::<_, hyper::http::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from(r#"{"ok":true}"#)))
                                    .unwrap(),
                            )
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockServer {
            addr,
            received_requests,
            scripted_statuses,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queues the statuses to answer with, in order. Further requests get
    /// 200.
    pub fn script_statuses(&self, statuses: &[u16]) {
        self.scripted_statuses.lock().unwrap().extend(statuses);
    }

    pub fn get_requests(&self) -> Vec<ReceivedRequest> {
        self.received_requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.received_requests.lock().unwrap().len()
    }
}
