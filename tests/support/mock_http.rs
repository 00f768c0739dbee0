use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One scripted reply. The last reply of a route repeats once the script is
/// exhausted.
#[derive(Clone, Debug)]
pub struct MockReply {
    status: u16,
    body: String,
    delay: Option<Duration>,
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn raw(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// What the server saw for one request.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path_and_query: String,
    pub accept: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Default)]
struct MockState {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    hits: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    fn next_reply(&self, key: &str) -> MockReply {
        let mut routes = self.routes.lock().expect("mock routes poisoned");
        match routes.get_mut(key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("queue is not empty"),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| MockReply::raw(500, "empty script")),
            None => MockReply::json(404, serde_json::json!({"error": "no scripted route"})),
        }
    }
}

pub struct MockHttpServer {
    url: String,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockHttpServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock HTTP listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let state = Arc::new(MockState::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let service_state = state.clone();
        let make_service = make_service_fn(move |_| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(state.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock HTTP server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Scripts replies for `key`: the lowercase `address` query parameter when
    /// the request has one, the request path otherwise.
    pub fn script(&self, key: impl Into<String>, replies: Vec<MockReply>) {
        self.state
            .routes
            .lock()
            .expect("mock routes poisoned")
            .insert(key.into().to_ascii_lowercase(), replies.into());
    }

    pub fn hits(&self, key: &str) -> usize {
        self.state
            .hits
            .lock()
            .expect("mock hits poisoned")
            .get(&key.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state
            .hits
            .lock()
            .expect("mock hits poisoned")
            .values()
            .sum()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .expect("mock requests poisoned")
            .clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn route_key(req: &Request<Body>) -> String {
    let address = req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == "address").then(|| value.to_owned())
        })
    });
    address
        .unwrap_or_else(|| req.uri().path().to_owned())
        .to_ascii_lowercase()
}

fn header(req: &Request<Body>, name: hyper::header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn serve_request(
    state: Arc<MockState>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let key = route_key(&req);
    state.requests.lock().expect("mock requests poisoned").push(RecordedRequest {
        path_and_query: req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_default(),
        accept: header(&req, hyper::header::ACCEPT),
        user_agent: header(&req, hyper::header::USER_AGENT),
    });
    *state
        .hits
        .lock()
        .expect("mock hits poisoned")
        .entry(key.clone())
        .or_default() += 1;

    let reply = state.next_reply(&key);
    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
