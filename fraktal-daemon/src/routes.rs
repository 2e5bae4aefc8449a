//! HTTP surface.
//!
//! | Route                    | Auth | Success                 |
//! |--------------------------|------|-------------------------|
//! | `GET /health`            | no   | 200 counts              |
//! | `POST /fractal`          | yes  | 201 fractal             |
//! | `GET /fractal`           | yes  | 200 list                |
//! | `GET /fractal/{id}`      | yes  | 200 fractal             |
//! | `DELETE /fractal/{id}`   | yes  | 200 fractal / 202       |
//! | `GET /audit`             | yes  | 200 report              |

use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};

use fraktal_engine::{
    CreateRequest, DeleteOptions, DeleteOutcome, FractalError, HealthCounts, Orchestrator,
    RollbackReport,
};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug)]
struct MissingCredential;
impl warp::reject::Reject for MissingCredential {}

#[derive(Debug)]
struct BadCredential;
impl warp::reject::Reject for BadCredential {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback: Option<&'a RollbackReport>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(flatten)]
    counts: HealthCounts,
}

#[derive(Serialize)]
struct ScheduledBody<'a> {
    status: &'static str,
    id: &'a str,
}

/// Every route, with rejections rendered as JSON errors.
pub fn api(
    orchestrator: Orchestrator,
    token: Arc<str>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(health);

    let create = warp::path!("fractal")
        .and(warp::post())
        .and(authorized(token.clone()))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<CreateRequest>())
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(create);

    let list = warp::path!("fractal")
        .and(warp::get())
        .and(authorized(token.clone()))
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(list);

    let get = warp::path!("fractal" / String)
        .and(warp::get())
        .and(authorized(token.clone()))
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(get);

    let delete = warp::path!("fractal" / String)
        .and(warp::delete())
        .and(authorized(token.clone()))
        .and(warp::query::<DeleteOptions>())
        .and(with_orchestrator(orchestrator.clone()))
        .and_then(delete);

    let audit = warp::path!("audit")
        .and(warp::get())
        .and(authorized(token))
        .and(with_orchestrator(orchestrator))
        .and_then(audit);

    health
        .or(create)
        .or(list)
        .or(get)
        .or(delete)
        .or(audit)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

fn with_orchestrator(
    orchestrator: Orchestrator,
) -> impl Filter<Extract = (Orchestrator,), Error = Infallible> + Clone {
    warp::any().map(move || orchestrator.clone())
}

/// `Authorization: Bearer <token>`. Missing is 401, wrong is 403.
fn authorized(token: Arc<str>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let token = token.clone();
            async move {
                let Some(header) = header else {
                    return Err(warp::reject::custom(MissingCredential));
                };
                match header.strip_prefix("Bearer ") {
                    Some(presented) if tokens_match(presented.trim(), &token) => Ok(()),
                    _ => Err(warp::reject::custom(BadCredential)),
                }
            }
        })
        .untuple_one()
}

fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(orchestrator: Orchestrator) -> Result<Response, Infallible> {
    Ok(respond(StatusCode::OK, orchestrator.health().await.map(|counts| {
        HealthBody {
            status: "ok",
            counts,
        }
    })))
}

async fn create(request: CreateRequest, orchestrator: Orchestrator) -> Result<Response, Infallible> {
    let id = request.id.clone();
    let result = orchestrator.create(request).await;
    match &result {
        Ok(fractal) => tracing::info!(fractal_id = %fractal.id, "fractal created"),
        Err(err) => tracing::warn!(fractal_id = %id, kind = err.kind(), error = %err, "create failed"),
    }
    Ok(respond(StatusCode::CREATED, result))
}

async fn list(orchestrator: Orchestrator) -> Result<Response, Infallible> {
    Ok(respond(StatusCode::OK, orchestrator.list().await))
}

async fn get(id: String, orchestrator: Orchestrator) -> Result<Response, Infallible> {
    Ok(respond(StatusCode::OK, orchestrator.get(&id).await))
}

async fn delete(
    id: String,
    options: DeleteOptions,
    orchestrator: Orchestrator,
) -> Result<Response, Infallible> {
    let response = match orchestrator.delete(&id, options).await {
        Ok(DeleteOutcome::Deleted(fractal)) => json_reply(StatusCode::OK, &fractal),
        Ok(DeleteOutcome::Scheduled) => json_reply(
            StatusCode::ACCEPTED,
            &ScheduledBody {
                status: "scheduled",
                id: &id,
            },
        ),
        Err(err) => {
            tracing::warn!(fractal_id = %id, kind = err.kind(), error = %err, "delete failed");
            error_reply(&err)
        }
    };
    Ok(response)
}

async fn audit(orchestrator: Orchestrator) -> Result<Response, Infallible> {
    Ok(respond(StatusCode::OK, orchestrator.audit().await))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub fn status_for(err: &FractalError) -> StatusCode {
    match err {
        FractalError::Validation(_) => StatusCode::BAD_REQUEST,
        FractalError::NotFound { .. } => StatusCode::NOT_FOUND,
        FractalError::Conflict { .. } | FractalError::Cancelled { .. } => StatusCode::CONFLICT,
        FractalError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        FractalError::CorruptionSuspected(_) => StatusCode::SERVICE_UNAVAILABLE,
        FractalError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
        FractalError::QuorumFailure { .. }
        | FractalError::InvariantViolation(_)
        | FractalError::PostWriteMismatch(_)
        | FractalError::AggregateRollback(_)
        | FractalError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(ok: StatusCode, result: Result<T, FractalError>) -> Response {
    match result {
        Ok(body) => json_reply(ok, &body),
        Err(err) => error_reply(&err),
    }
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(err: &FractalError) -> Response {
    json_reply(
        status_for(err),
        &ErrorBody {
            error: err.kind(),
            message: err.to_string(),
            rollback: err.rollback(),
        },
    )
}

fn plain_error(status: StatusCode, kind: &str, message: String) -> Response {
    json_reply(
        status,
        &ErrorBody {
            error: kind,
            message,
            rollback: None,
        },
    )
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let response = if rejection.find::<MissingCredential>().is_some() {
        plain_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing bearer token".to_string(),
        )
    } else if rejection.find::<BadCredential>().is_some() {
        plain_error(StatusCode::FORBIDDEN, "forbidden", "invalid bearer token".to_string())
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        plain_error(StatusCode::BAD_REQUEST, "validation", err.to_string())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        plain_error(StatusCode::BAD_REQUEST, "validation", err.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        plain_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "validation",
            format!("request body exceeds {MAX_BODY_BYTES} bytes"),
        )
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        plain_error(
            StatusCode::LENGTH_REQUIRED,
            "validation",
            "content-length header is required".to_string(),
        )
    } else if rejection.is_not_found() {
        plain_error(StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        plain_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else {
        tracing::error!(?rejection, "unhandled rejection");
        plain_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_string(),
        )
    };
    Ok(response)
}
