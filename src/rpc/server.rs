//! HTTP server for remote plan, apply and health checks
//!
//! Runs are blocking, so each one gets a `spawn_blocking` worker. Frames
//! travel to the response body through a bounded channel; when the client
//! goes away a send fails and the run's context is cancelled.

use super::protocol::{self, Event, Frame, MachineRequest, Mode, Run, VersionInfo};
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use declarative::builtin::is_structural;
use declarative::{Context, Node, Notifier, Params, Pipeline, Registry, Stage, metadata};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// Frames buffered per response before the run waits for the client
const FRAME_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Parameters every request starts from
    pub defaults: Arc<Params>,
    /// Cancelling it stops the server and every run in flight
    pub shutdown: Context,
}

impl AppState {
    pub fn new(registry: Registry, defaults: Params) -> Self {
        Self {
            registry: Arc::new(registry),
            defaults: Arc::new(defaults),
            shutdown: Context::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Context) -> Self {
        self.shutdown = shutdown;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(protocol::PING, get(ping))
        .route(protocol::VERSION, get(version))
        .route(protocol::PLAN, post(plan))
        .route(protocol::APPLY, post(apply))
        .route(protocol::HEALTHCHECK, post(healthcheck))
        .with_state(state)
}

/// Serve until the state's shutdown context is cancelled
pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {bind}: {e}"))?;
    log::info!("listening on {}", listener.local_addr()?);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.token().cancelled().await })
        .await?;
    log::info!("server stopped");
    Ok(())
}

async fn ping() -> &'static str {
    "pong"
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo::current())
}

async fn plan(State(state): State<AppState>, Json(request): Json<MachineRequest>) -> Response {
    stream(state, Mode::Plan, request)
}

async fn apply(State(state): State<AppState>, Json(request): Json<MachineRequest>) -> Response {
    stream(state, Mode::Apply, request)
}

async fn healthcheck(State(state): State<AppState>, Json(request): Json<MachineRequest>) -> Response {
    stream(state, Mode::Healthcheck, request)
}

fn stream(state: AppState, mode: Mode, request: MachineRequest) -> Response {
    log::info!("{mode} {}", request.location);
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    tokio::task::spawn_blocking(move || run(&state, mode, &request, &tx));

    let body = ReceiverStream::new(rx).map(|frame: Frame| Ok::<_, Infallible>(frame.to_line()));
    ([(header::CONTENT_TYPE, protocol::NDJSON)], Body::from_stream(body)).into_response()
}

/// Sends frames, cancelling the run when the client has gone
struct Sender<'a> {
    tx: &'a mpsc::Sender<Frame>,
    ctx: &'a Context,
}

impl Sender<'_> {
    fn send(&self, frame: Frame) -> anyhow::Result<()> {
        if self.tx.blocking_send(frame).is_err() {
            log::warn!("client disconnected, cancelling run");
            self.ctx.cancel();
            anyhow::bail!("client disconnected");
        }
        Ok(())
    }
}

fn run(state: &AppState, mode: Mode, request: &MachineRequest, tx: &mpsc::Sender<Frame>) {
    let ctx = state.shutdown.child();
    let sender = Sender { tx, ctx: &ctx };

    let mut params = (*state.defaults).clone();
    params.extend(request.params.clone());
    let pipeline = Pipeline::new().registry(&state.registry).params(&params);

    let rendered = match pipeline.render(&ctx, &request.location) {
        Ok(rendered) => rendered,
        Err(err) => {
            log::warn!("{mode} {}: {err}", request.location);
            let _ = sender.send(Frame::Error(err.to_string()));
            return;
        }
    };
    if sender.send(Frame::Edges(rendered.edges())).is_err() {
        return;
    }

    let notifier = Events {
        sender: &sender,
        healthcheck: mode == Mode::Healthcheck,
    };
    let result = match mode {
        Mode::Plan | Mode::Healthcheck => declarative::plan(&ctx, &rendered, &notifier),
        Mode::Apply => declarative::apply(&ctx, &rendered, &notifier),
    };

    let last = match result {
        Ok(execution) => {
            let summary = execution.summary();
            log::info!("{mode} {}: {summary}", request.location);
            Frame::Summary(summary)
        }
        Err(err) => {
            log::warn!("{mode} {}: {err}", request.location);
            Frame::Error(err.to_string())
        }
    };
    let _ = sender.send(last);
}

/// Streams one event per node before and after it runs
struct Events<'a> {
    sender: &'a Sender<'a>,
    healthcheck: bool,
}

impl Events<'_> {
    fn event(&self, stage: Stage, run: Run, node: &Node) -> Option<Event> {
        let kind = node.metadata_str(metadata::KIND).map(str::to_string);
        if self.healthcheck && kind.as_deref().is_none_or(is_structural) {
            return None;
        }
        let status = match run {
            Run::Started => None,
            Run::Finished => node.value().status().cloned(),
        };
        Some(Event {
            stage,
            run,
            id: node.id().clone(),
            kind,
            group: node.group().map(str::to_string),
            health: status.as_ref().filter(|_| self.healthcheck).map(|s| s.health()),
            details: status.as_ref().map(|s| s.details()),
        })
    }
}

impl Notifier for Events<'_> {
    fn pre(&self, stage: Stage, node: &Node) -> anyhow::Result<()> {
        match self.event(stage, Run::Started, node) {
            Some(event) => self.sender.send(Frame::Event(event)),
            None => Ok(()),
        }
    }

    fn post(&self, stage: Stage, node: &Node) -> anyhow::Result<()> {
        match self.event(stage, Run::Finished, node) {
            Some(event) => self.sender.send(Frame::Event(event)),
            None => Ok(()),
        }
    }
}
