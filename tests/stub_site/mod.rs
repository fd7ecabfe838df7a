use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use dbd_harvest::config::Config;
use dbd_harvest::fetch::{Fetcher, Sleeper};

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[allow(dead_code)]
impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

type Routes = Arc<Mutex<HashMap<String, VecDeque<(u16, String)>>>>;

/// Minimal stand-in for the blogging platform. Each path serves a queue of responses; the
/// last one repeats.
pub struct StubSite {
    pub base_url: String,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl StubSite {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub site");
        let base_url = format!("http://{}", server.server_addr());

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_routes = Arc::clone(&routes);
        let thread_requests = Arc::clone(&requests);
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(20)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let (path, query) = match url.split_once('?') {
                    Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
                    None => (url.clone(), None),
                };
                let headers = request
                    .headers()
                    .iter()
                    .map(|h| (h.field.as_str().as_str().to_owned(), h.value.as_str().to_owned()))
                    .collect();
                thread_requests
                    .lock()
                    .expect("lock requests")
                    .push(RecordedRequest {
                        path: path.clone(),
                        query,
                        headers,
                    });

                let (status, body) = {
                    let mut routes = thread_routes.lock().expect("lock routes");
                    match routes.get_mut(&path) {
                        Some(queue) if queue.len() > 1 => {
                            queue.pop_front().expect("non-empty queue")
                        }
                        Some(queue) => queue
                            .front()
                            .cloned()
                            .unwrap_or((404, "not found".to_owned())),
                        None => (404, "not found".to_owned()),
                    }
                };

                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"text/html; charset=utf-8"[..],
                )
                .expect("build header");
                let _ = request.respond(
                    tiny_http::Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            routes,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn route(&self, path: &str, status: u16, body: impl Into<String>) {
        self.route_sequence(path, vec![(status, body.into())]);
    }

    pub fn route_sequence(&self, path: &str, responses: Vec<(u16, String)>) {
        self.routes
            .lock()
            .expect("lock routes")
            .insert(path.to_owned(), responses.into());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock requests").clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.path == path)
            .count()
    }

    pub fn config(&self, state_dir: &std::path::Path) -> Config {
        Config {
            base_url: self.base_url.clone(),
            state_dir: state_dir.to_path_buf(),
            http_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }
}

impl Drop for StubSite {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

#[allow(dead_code)]
impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().expect("lock sleeps").clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("lock sleeps").push(duration);
    }
}

#[allow(dead_code)]
pub fn fetcher_with(config: &Config, sleeper: &RecordingSleeper) -> Fetcher {
    Fetcher::new(config)
        .expect("build fetcher")
        .with_sleeper(Arc::new(sleeper.clone()))
}

/// Wraps a JSON value the way pages embed it: `JSON.parse("<escaped>")`.
#[allow(dead_code)]
pub fn embed_payload(value: &serde_json::Value, trailing: &str) -> String {
    embed_json(&value.to_string(), trailing)
}

#[allow(dead_code)]
pub fn embed_json(json: &str, trailing: &str) -> String {
    let escaped = json.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "<!doctype html><html><head><script>window._preloads = JSON.parse(\"{escaped}{trailing}\")</script></head><body></body></html>"
    )
}

#[allow(dead_code)]
pub fn post_page(title: &str, post_date: &str, comment_count: u64, poll_id: Option<u32>) -> String {
    let payload = serde_json::json!({
        "post": {
            "title": title,
            "post_date": post_date,
            "comment_count": comment_count,
            "cover_image": format!("https://img.example/{comment_count}.png"),
        }
    });
    let mut page = embed_payload(&payload, "");
    if let Some(poll_id) = poll_id {
        page.push_str(&format!("<div class=\"poll-{poll_id}\"></div>"));
    }
    page
}

#[allow(dead_code)]
pub fn comments_page(comments: serde_json::Value) -> String {
    embed_payload(&serde_json::json!({ "initialComments": comments }), "\\\\")
}

#[allow(dead_code)]
pub fn sitemap(base_url: &str, slugs: &[&str]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset>\n");
    for slug in slugs {
        xml.push_str(&format!("  <url><loc>{base_url}/p/{slug}</loc></url>\n"));
    }
    xml.push_str("</urlset>\n");
    xml
}

/// Comments page whose single thread is a reply chain `depth` levels deep.
#[allow(dead_code)]
pub fn reply_chain_page(depth: usize) -> String {
    let mut json = String::from(r#"{"initialComments":["#);
    for level in 0..depth {
        json.push_str(&format!(r#"{{"name":"user{}","children":["#, level % 2));
    }
    json.push_str(&"]}".repeat(depth));
    json.push_str("]}");
    embed_json(&json, "\\\\")
}
