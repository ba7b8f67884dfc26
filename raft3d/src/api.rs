//! HTTP API
//!
//! JSON over hyper. Every route below `/api/v1` maps onto one
//! [`InventoryService`] call; `/metrics` serves the Prometheus registry.
//! A write sent to a follower is redirected to the leader when its address
//! is known.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::entry::{Filament, PrintJob, PrintJobStatus, Printer};
use crate::engine::{ApplyError, EntityKind};
use crate::metrics;
use crate::service::{InventoryService, ServiceError};

/// Route prefix for all API endpoints.
const API_PREFIX: &str = "/api/v1";

pub struct ApiState {
    pub service: InventoryService,
    /// HTTP address of every node, by raft id
    pub peers: HashMap<u64, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusChangeBody {
    status: PrintJobStatus,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Failure of one API call, rendered by [`ApiError::into_response`].
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

type ApiResult = Result<Response<Body>, ApiError>;

impl ApiError {
    fn into_response(self, state: &ApiState, path: &str) -> Response<Body> {
        let e = match self {
            ApiError::BadRequest(message) => return error(StatusCode::BAD_REQUEST, message),
            ApiError::Service(e) => e,
        };
        let status = match &e {
            ServiceError::NotLeader { leader } => {
                return redirect_to_leader(state, *leader, path, e.to_string())
            }
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Rejected(ApplyError::AlreadyExists { .. }) => StatusCode::CONFLICT,
            ServiceError::Rejected(_) => StatusCode::BAD_REQUEST,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Dropped(_) | ServiceError::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Encode(_) | ServiceError::UnexpectedResult(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error(status, e.to_string())
    }
}

/// Route an incoming request to the appropriate handler.
pub async fn route(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    log::debug!("{} {}", method, path);

    if method == Method::GET && path == "/metrics" {
        return Ok(metrics_response());
    }
    let segments: Vec<&str> = match path.strip_prefix(API_PREFIX) {
        Some(rest) => rest.split('/').filter(|s| !s.is_empty()).collect(),
        None => return Ok(error(StatusCode::NOT_FOUND, "no such route")),
    };

    let service = &state.service;
    let result = match (&method, segments.as_slice()) {
        (&Method::GET, ["status"]) => {
            timed("get_status", || async { Ok(ok(&service.status())) }).await
        }

        (&Method::GET, ["printers"]) => {
            timed("list_printers", || async { Ok(ok(&service.list_printers())) }).await
        }
        (&Method::POST, ["printers"]) => {
            timed("create_printer", || async {
                let printer: Printer = read_json(req).await?;
                Ok(created(&service.create_printer(printer).await?))
            })
            .await
        }
        (&Method::GET, ["printers", id]) => {
            timed("get_printer", || async { Ok(ok(&service.get_printer(id)?)) }).await
        }
        (&Method::PUT, ["printers", id]) => {
            timed("update_printer", || async {
                let mut printer: Printer = read_json(req).await?;
                printer.id = id.to_string();
                Ok(ok(&service.update_printer(printer).await?))
            })
            .await
        }
        (&Method::DELETE, ["printers", id]) => {
            timed("delete_printer", || async {
                service.delete(EntityKind::Printer, id).await?;
                Ok(deleted(EntityKind::Printer, id))
            })
            .await
        }

        (&Method::GET, ["filaments"]) => {
            timed("list_filaments", || async { Ok(ok(&service.list_filaments())) })
                .await
        }
        (&Method::POST, ["filaments"]) => {
            timed("create_filament", || async {
                let filament: Filament = read_json(req).await?;
                Ok(created(&service.create_filament(filament).await?))
            })
            .await
        }
        (&Method::GET, ["filaments", id]) => {
            timed("get_filament", || async { Ok(ok(&service.get_filament(id)?)) }).await
        }
        (&Method::PUT, ["filaments", id]) => {
            timed("update_filament", || async {
                let mut filament: Filament = read_json(req).await?;
                filament.id = id.to_string();
                Ok(ok(&service.update_filament(filament).await?))
            })
            .await
        }
        (&Method::DELETE, ["filaments", id]) => {
            timed("delete_filament", || async {
                service.delete(EntityKind::Filament, id).await?;
                Ok(deleted(EntityKind::Filament, id))
            })
            .await
        }

        (&Method::GET, ["print_jobs"]) => {
            timed("list_print_jobs", || async { Ok(ok(&service.list_print_jobs())) })
                .await
        }
        (&Method::POST, ["print_jobs"]) => {
            timed("create_print_job", || async {
                let job: PrintJob = read_json(req).await?;
                Ok(created(&service.create_print_job(job).await?))
            })
            .await
        }
        (&Method::GET, ["print_jobs", id]) => {
            timed("get_print_job", || async { Ok(ok(&service.get_print_job(id)?)) })
                .await
        }
        (&Method::DELETE, ["print_jobs", id]) => {
            timed("delete_print_job", || async {
                service.delete(EntityKind::PrintJob, id).await?;
                Ok(deleted(EntityKind::PrintJob, id))
            })
            .await
        }
        (&Method::POST, ["print_jobs", id, "status"]) => {
            timed("update_print_job_status", || async {
                let change: StatusChangeBody = read_json(req).await?;
                Ok(ok(&service.update_print_job_status(id, change.status).await?))
            })
            .await
        }

        _ => Ok(error(StatusCode::NOT_FOUND, "no such route")),
    };

    Ok(result.unwrap_or_else(|e: ApiError| e.into_response(&state, &path)))
}

/// Runs one handler under the request metrics.
async fn timed<F, Fut>(method: &'static str, handler: F) -> ApiResult
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ApiResult> + Send,
{
    metrics::record_metrics(method, handler).await
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid body: {}", e)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, json) = match serde_json::to_vec(body) {
        Ok(json) => (status, json),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{{\"error\":\"serialization error: {}\"}}", e).into_bytes(),
        ),
    };
    let mut response = Response::new(Body::from(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn ok<T: Serialize>(body: &T) -> Response<Body> {
    json_response(StatusCode::OK, body)
}

fn created<T: Serialize>(body: &T) -> Response<Body> {
    json_response(StatusCode::CREATED, body)
}

fn deleted(kind: EntityKind, id: &str) -> Response<Body> {
    ok(&serde_json::json!({ "deleted": kind.as_str(), "id": id }))
}

fn error(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
        },
    )
}

/// 307 to the same path on the leader, or 503 when no leader is known.
fn redirect_to_leader(
    state: &ApiState,
    leader: Option<u64>,
    path: &str,
    message: String,
) -> Response<Body> {
    let location = leader
        .and_then(|id| state.peers.get(&id))
        .and_then(|addr| HeaderValue::from_str(&format!("http://{}{}", addr, path)).ok());
    match location {
        Some(location) => {
            let mut response = error(StatusCode::TEMPORARY_REDIRECT, message);
            response.headers_mut().insert(LOCATION, location);
            response
        }
        None => error(StatusCode::SERVICE_UNAVAILABLE, message),
    }
}

fn metrics_response() -> Response<Body> {
    match metrics::gather() {
        Ok(buffer) => Response::new(Body::from(buffer)),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
