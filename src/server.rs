// HTTP surface.
//
// Thin on purpose: the engine lives in `Session`, this file only turns
// requests into session calls.
//
//   GET  /stream           live audio (one listener per request)
//   POST /controller       {"command": "start" | "stop" | <effect name>}
//   GET  /api/v1/status    pipeline state, rate, listener count
//   GET  /health
//
// Pages (home, controller) and their assets come from the public dir.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, get_service},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::Error;
use crate::listeners::ListenerFrame;
use crate::session::{Session, SessionStatus};

pub fn build_router(session: Session) -> Router {
    let public = session.config().public_dir.clone();

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/home") }))
        .route("/home", get_service(ServeFile::new(page(&public, "home"))))
        .route(
            "/controller",
            get_service(ServeFile::new(page(&public, "controller"))).post(api_command),
        )
        .route("/stream", get(stream))
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/status", get(status))
        .fallback_service(ServeDir::new(public))
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

/// Pages live at `<public>/<name>/index.html`.
fn page(public: &Path, name: &str) -> PathBuf {
    public.join(name).join("index.html")
}

/// Operator command as sent by the controller page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Effect(String),
}

impl ControlCommand {
    /// Only the exact words start and stop are transport commands, so effects
    /// like "startup_jingle" stay reachable.
    pub fn parse(raw: &str) -> Self {
        let lc = raw.trim().to_lowercase();
        match lc.as_str() {
            "start" => ControlCommand::Start,
            "stop" => ControlCommand::Stop,
            _ => ControlCommand::Effect(lc),
        }
    }
}

#[derive(Deserialize)]
struct CommandReq {
    command: String,
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::SourceNotFound(_) | Error::EffectNotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyRunning | Error::NotRunning | Error::AlreadyMixing => StatusCode::CONFLICT,
        Error::Mix(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn api_command(
    State(session): State<Session>,
    Json(req): Json<CommandReq>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let cmd = ControlCommand::parse(&req.command);
    tracing::info!("command received: {cmd:?}");

    let res = match cmd {
        ControlCommand::Start => session.start().await.map(|_| ()),
        ControlCommand::Stop => {
            session.stop().await;
            Ok(())
        }
        ControlCommand::Effect(name) => session.inject(&name).await.map(|_| ()),
    };

    match res {
        Ok(()) => Ok(Json(json!({ "result": "ok" }))),
        Err(e) => {
            tracing::warn!("command {:?} failed: {e}", req.command);
            Err((status_for(&e), Json(json!({ "error": e.to_string() }))))
        }
    }
}

async fn status(State(session): State<Session>) -> Json<SessionStatus> {
    Json(session.status().await)
}

/// Unregisters the listener when the response body is dropped, which is how
/// hyper tells us the client went away.
struct ListenerGuard {
    session: Session,
    id: Uuid,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.session.unregister(&self.id);
    }
}

async fn stream(State(session): State<Session>) -> Response {
    let (id, rx) = session.register();
    let guard = ListenerGuard {
        session: session.clone(),
        id,
    };

    // End-of-stream frames are skipped: the connection stays open and picks
    // up again on the next start.
    let body = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        loop {
            match rx.recv().await? {
                ListenerFrame::Chunk(bytes) => return Some((Ok::<_, std::io::Error>(bytes), (rx, guard))),
                ListenerFrame::EndOfStream => tracing::debug!(id = %guard.id, "end of stream; holding connection"),
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
