//! Helpers shared by tests.

use std::{
    convert::Infallible,
    future::Future,
    net::{SocketAddr, TcpListener},
};

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, header::CONTENT_TYPE};
use hyper::{
    Body, Server,
    service::{make_service_fn, service_fn},
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::sinks::util::multipart::Section;

/// Installs a test-writer subscriber filtered by `TEST_LOG`, defaulting to `error`.
pub fn trace_init() {
    let filter = EnvFilter::try_from_env("TEST_LOG").unwrap_or_else(|_| EnvFilter::new("error"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// An address nothing is listening on.
pub fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// A request as observed by a test server.
#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Decodes a multipart body with an independent parser, panicking when the request is not
    /// multipart.
    pub async fn sections(&self) -> Vec<Section> {
        let content_type = self.content_type().expect("request has no content type");
        let mime: mime::Mime = content_type.parse().expect("request has an invalid content type");
        assert_eq!(mime.type_(), mime::MULTIPART, "request is not multipart");
        let boundary = mime
            .get_param(mime::BOUNDARY)
            .expect("request is not multipart")
            .as_str()
            .to_owned();
        let body = self.body.clone();
        let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });

        let mut multipart = multer::Multipart::new(stream, boundary);
        let mut sections = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let headers: Vec<(String, String)> = field
                .headers()
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_str().unwrap().to_owned()))
                .collect();
            let section = headers
                .into_iter()
                .fold(Section::new(field.bytes().await.unwrap()), |section, (name, value)| {
                    section.with_header(name, value)
                });
            sections.push(section);
        }
        sections
    }
}

/// Starts a server on an ephemeral port that answers every request with `status`.
pub fn build_test_server(
    status: StatusCode,
) -> (mpsc::UnboundedReceiver<ReceivedRequest>, SocketAddr) {
    build_test_server_with(move |_| async move {
        Response::builder()
            .status(status)
            .body(Body::empty())
            .unwrap()
    })
}

/// Starts a server on an ephemeral port that answers through `handler`.
///
/// Every request is reported on the returned channel as soon as its body has been read, before
/// `handler` runs.
pub fn build_test_server_with<F, Fut>(
    handler: F,
) -> (mpsc::UnboundedReceiver<ReceivedRequest>, SocketAddr)
where
    F: Fn(ReceivedRequest) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let service = make_service_fn(move |_| {
        let tx = tx.clone();
        let handler = handler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let tx = tx.clone();
                let handler = handler.clone();
                async move {
                    let (parts, body) = request.into_parts();
                    let body = hyper::body::to_bytes(body).await.unwrap();
                    let received = ReceivedRequest {
                        method: parts.method,
                        uri: parts.uri,
                        headers: parts.headers,
                        body,
                    };
                    let _ = tx.send(received.clone());
                    Ok::<_, Infallible>(handler(received).await)
                }
            }))
        }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(service);
    let addr = server.local_addr();
    tokio::spawn(async move {
        if let Err(error) = server.await {
            panic!("Server error: {error}");
        }
    });

    (rx, addr)
}

/// Drains every request received so far.
pub fn collect_ready(rx: &mut mpsc::UnboundedReceiver<ReceivedRequest>) -> Vec<ReceivedRequest> {
    let mut requests = Vec::new();
    while let Ok(request) = rx.try_recv() {
        requests.push(request);
    }
    requests
}
