#![allow(dead_code)]

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Minimal crawl service over HTTP, serving a fixed catalogue.
pub struct ServiceStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServiceStub {
    pub fn spawn(token: Option<&str>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start service stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/api");
        let expected_auth = token.map(|t| format!("Bearer {t}"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let method = request.method().to_string();
                let path = request.url().to_string();
                seen.lock().unwrap().push(format!("{method} {path}"));

                if let Some(expected) = &expected_auth {
                    let authorized = request.headers().iter().any(|h| {
                        h.field.equiv("Authorization") && h.value.as_str() == expected.as_str()
                    });
                    if !authorized {
                        let _ = request.respond(
                            tiny_http::Response::from_string("missing token").with_status_code(401),
                        );
                        continue;
                    }
                }

                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);

                let (status, payload) = route(&method, &path, &body);
                let text = match &payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let mut response =
                    tiny_http::Response::from_string(text).with_status_code(status);
                if payload.is_object() || payload.is_array() {
                    let header = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"application/json"[..],
                    )
                    .expect("build header");
                    response = response.with_header(header);
                }
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for ServiceStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn site_json(id: &str, status: &str, pages: u64) -> Value {
    json!({
        "id": id,
        "name": format!("Site {id}"),
        "url": format!("https://{id}.example.com/"),
        "config": { "depth": 3, "cadence": "weekly", "includePatterns": ["/docs/*"], "excludePatterns": [] },
        "status": status,
        "pagesCrawled": pages,
        "lastCrawledAt": "2026-01-01T00:00:00Z",
    })
}

fn route(method: &str, path: &str, body: &str) -> (u16, Value) {
    let path = path.strip_prefix("/api").unwrap_or(path);
    match (method, path) {
        ("GET", "/sites") => (
            200,
            json!([site_json("s1", "crawling", 12), site_json("s2", "active", 30)]),
        ),
        ("GET", "/sites/s1") => (200, site_json("s1", "active", 40)),
        ("GET", "/sites/s2") => (200, site_json("s2", "active", 31)),
        ("POST", "/sites") => {
            let draft: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            if draft.get("name").and_then(Value::as_str) == Some("dup") {
                return (422, Value::String("name taken".to_owned()));
            }
            let mut created = site_json("s3", "inactive", 0);
            created["name"] = draft.get("name").cloned().unwrap_or(Value::Null);
            created["lastCrawledAt"] = Value::Null;
            (201, created)
        }
        ("PUT", "/sites/s1") => (403, Value::String("read-only".to_owned())),
        ("DELETE", "/sites/s2") => (204, Value::String(String::new())),
        ("POST", "/sites/s1/jobs") => (202, json!({ "jobId": "J1" })),
        ("POST", "/sites/s2/jobs") => (202, json!({ "jobId": "J2" })),
        ("GET", "/jobs/J1") => (
            200,
            json!({ "status": "running", "progress": 42.5, "pagesCrawled": 7 }),
        ),
        ("GET", "/jobs/J2") => (
            200,
            json!({ "status": "completed", "progress": 100, "pagesCrawled": 31 }),
        ),
        ("GET", "/jobs/J500") => (500, Value::String("boom".to_owned())),
        _ => (404, Value::String("not found".to_owned())),
    }
}
