//! HTTP front end of the submission pipeline.

use crate::error::Error;
use crate::submission::{ContactForm, Rejection, SubmissionPipeline};
use crate::utils::{FORWARDED_FOR, resolve_identity};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Body of a rejected submission.
#[derive(Debug, Serialize)]
struct Failure {
    message: String,
}

/// Body of an accepted submission.
#[derive(Debug, Serialize)]
struct Success {
    success: bool,
}

/// Builds the router serving the contact endpoint.
pub fn router(pipeline: Arc<SubmissionPipeline>) -> Router {
    Router::new()
        .route("/contact", post(handle_submission))
        .route("/health", get(|| async { "OK" }))
        .with_state(pipeline)
}

async fn handle_submission(
    State(pipeline): State<Arc<SubmissionPipeline>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<ContactForm>, axum::extract::rejection::FormRejection>,
) -> Response {
    let forwarded_for = headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok());
    let identity = resolve_identity(forwarded_for, peer);

    // An unreadable body counts as a form with every field missing.
    let form = match form {
        Ok(Form(form)) => form,
        Err(e) => {
            log::debug!("Unreadable form from {identity}: {e}");
            ContactForm::default()
        }
    };

    match pipeline.submit(&form, &identity).await {
        Ok(()) => (StatusCode::OK, Json(Success { success: true })).into_response(),
        Err(rejection) => reject(rejection, &pipeline),
    }
}

fn reject(rejection: Rejection, pipeline: &SubmissionPipeline) -> Response {
    let status =
        StatusCode::from_u16(rejection.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(Failure {
        message: rejection.to_string(),
    });
    if rejection == Rejection::RateLimited {
        let retry_after = pipeline.cooldown_window().as_secs().to_string();
        return (status, [(header::RETRY_AFTER, retry_after)], body).into_response();
    }
    (status, body).into_response()
}

/// Runs the HTTP server on the specified address until it fails.
pub async fn run_http_server(addr: &str, pipeline: Arc<SubmissionPipeline>) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("entering serving loop on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(pipeline).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
