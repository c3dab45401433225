//! Read-only HTTP endpoint exposing detected applications.
//!
//! - `GET /detected` returns the snapshot, e.g. `{"Foo": ["93.184.216.34"]}`
//! - `GET /health` returns registry and directory sizes

use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::DetectError;
use crate::handler::QueryHandler;

/// Serve the snapshot endpoint on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    handler: QueryHandler,
    shutdown: CancellationToken,
) -> Result<(), DetectError> {
    let make_svc = make_service_fn(move |_conn| {
        let handler = handler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(route(&req, &handler)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    info!(%addr, "snapshot endpoint listening");

    server.await?;
    debug!("snapshot endpoint stopped");
    Ok(())
}

/// Route one request.
pub(crate) fn route(req: &Request<Body>, handler: &QueryHandler) -> Response<Body> {
    debug!(method = %req.method(), path = req.uri().path(), "snapshot endpoint request");

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/detected") => json_response(StatusCode::OK, &handler.snapshot()),
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            &Health {
                status: "ok",
                apps: handler.directory().len(),
                detected_ips: handler.registry().len(),
            },
        ),
        (_, "/detected") | (_, "/health") => {
            let mut response =
                text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET"));
            response
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    apps: usize,
    detected_ips: usize,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(json) => {
            let mut response = Response::new(Body::from(json));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!(error = %e, "failed to serialize response body");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
