//! HTTP API server: axum router, request handlers and the show thread.
//!
//! The server runs on the tokio async runtime while the show thread runs
//! on a plain `std::thread` and owns the output bank. Handlers never touch
//! the hardware; they submit a [`ShowCommand`] through a `std::sync::mpsc`
//! channel and read the shared [`ShowStatus`].
//!
//! Submitting a command also preempts the playlist that is running. The
//! sender and the show thread share a small gate so that a preempt is only
//! ever cleared together with the commands queued before it.
//!
//! ## Rust concepts
//! - `async fn` and `.await` for non-blocking I/O
//! - axum extractors: `State`, `Json`
//! - `Arc` for sharing state across async tasks
//! - Serde `Deserialize` for parsing JSON request bodies
//! - `tower-http` middleware for CORS and request tracing

use crate::lifecycle::Lifecycle;
use crate::pattern::{Family, Pattern};
use crate::runner::{Outcome, Playlist, Runner, RunnerState, ShowStatus, StatusHandle};
use crate::{StopReason, StopSignal, Tempo};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;

// ── Commands ─────────────────────────────────────────────────────────

/// Commands sent from the HTTP handlers to the show thread.
pub enum ShowCommand {
    /// Replace whatever is playing with a new playlist
    Play { playlist: Playlist, looped: bool },
    /// Stop playing and leave every line off
    Stop,
}

/// Create the command queue between the handlers and the show thread.
pub fn command_channel(stop: StopSignal) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    let gate = Arc::new(Mutex::new(()));
    let sender = CommandSender {
        tx,
        stop: stop.clone(),
        gate: gate.clone(),
    };
    (sender, CommandReceiver { rx, stop, gate })
}

/// Handler side of the command queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<ShowCommand>,
    stop: StopSignal,
    gate: Arc<Mutex<()>>,
}

impl CommandSender {
    /// Queue `command` and preempt whatever is playing.
    pub fn submit(&self, command: ShowCommand) -> Result<(), SendError<ShowCommand>> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.tx.send(command)?;
        self.stop.request(StopReason::Preempt);
        Ok(())
    }
}

/// Show thread side of the command queue.
pub struct CommandReceiver {
    rx: Receiver<ShowCommand>,
    stop: StopSignal,
    gate: Arc<Mutex<()>>,
}

impl CommandReceiver {
    /// Block for a command, then take the newest one queued and clear the
    /// preempts that came with it. Older commands are dropped.
    ///
    /// Returns `None` once every sender is gone.
    pub fn take_latest(&self) -> Option<ShowCommand> {
        let first = self.rx.recv().ok()?;
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let command = self.rx.try_iter().last().unwrap_or(first);
        self.stop.clear();
        Some(command)
    }
}

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
///
/// Everything inside is cheap to clone: the command sender and an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Queue to the show thread
    pub commands: CommandSender,
    /// Shared show status (show thread writes, handlers read)
    pub status: StatusHandle,
}

impl AppState {
    fn status(&self) -> MutexGuard<'_, ShowStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, command: ShowCommand) -> Result<(), (StatusCode, String)> {
        self.commands.submit(command).map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Show thread gone".to_string(),
            )
        })
    }
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_patterns, post_show_play, post_show_stop),
    components(schemas(
        ShowStatus,
        RunnerState,
        crate::bank::LineMode,
        Family,
        PatternInfo,
        PlayRequest,
    )),
    tags(
        (name = "show", description = "Light show control endpoints"),
        (name = "patterns", description = "Pattern discovery endpoints"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "Pi Lightshow API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for running LED light show patterns"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct PatternInfo {
    /// Identifier accepted by POST /api/v1/show/play
    #[schema(example = "knight-rider")]
    id: String,
    /// Human-readable name
    #[schema(example = "Knight Rider")]
    name: String,
    family: Family,
    /// Repetitions (or time units for fire and spectrum) when none is given
    default_param: u32,
}

/// Every pattern in show order, as listed by GET /api/v1/patterns.
pub fn pattern_catalog() -> Vec<PatternInfo> {
    Pattern::ALL.into_iter().map(PatternInfo::from).collect()
}

impl From<Pattern> for PatternInfo {
    fn from(p: Pattern) -> Self {
        Self {
            id: p.id().to_string(),
            name: p.title().to_string(),
            family: p.family(),
            default_param: p.default_param(),
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct PlayRequest {
    /// Pattern ids, optionally with a parameter (`flash:4`). Empty plays the full show.
    #[serde(default)]
    #[schema(example = json!(["chase", "flash:4", "fire"]))]
    patterns: Vec<String>,
    /// Repeat until stopped. Set to false to play once and turn everything off.
    #[serde(default, rename = "loop")]
    #[schema(example = true, default = false)]
    looped: bool,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api-docs/openapi.json", get(get_openapi))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/patterns", get(get_patterns))
        .route("/api/v1/show/play", post(post_show_play))
        .route("/api/v1/show/stop", post(post_show_stop))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn get_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// GET /api/v1/status: return current show state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current show status", body = ShowStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<ShowStatus> {
    Json(state.status().clone())
}

/// GET /api/v1/patterns: list every pattern
#[utoipa::path(
    get,
    path = "/api/v1/patterns",
    tag = "patterns",
    responses(
        (status = 200, description = "Available patterns in show order", body = Vec<PatternInfo>)
    )
)]
async fn get_patterns() -> Json<Vec<PatternInfo>> {
    Json(pattern_catalog())
}

/// POST /api/v1/show/play: start a playlist, replacing the current one
#[utoipa::path(
    post,
    path = "/api/v1/show/play",
    tag = "show",
    request_body = PlayRequest,
    responses(
        (status = 200, description = "Playlist started"),
        (status = 400, description = "Unknown pattern id")
    )
)]
async fn post_show_play(
    State(state): State<AppState>,
    Json(req): Json<PlayRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let playlist = Playlist::from_specs(req.patterns.as_slice())
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    state.send(ShowCommand::Play {
        playlist,
        looped: req.looped,
    })?;

    Ok(StatusCode::OK)
}

/// POST /api/v1/show/stop: stop playback and turn every line off
#[utoipa::path(
    post,
    path = "/api/v1/show/stop",
    tag = "show",
    responses(
        (status = 200, description = "Playback stopped"),
    )
)]
async fn post_show_stop(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.send(ShowCommand::Stop)?;
    Ok(StatusCode::OK)
}

// ── Show thread ──────────────────────────────────────────────────────

/// Main loop of the show thread. Owns the lifecycle for the whole run.
///
/// Only the newest queued command is acted on. Returns, with the hardware
/// shut down, once a shutdown is requested, a fatal fault ends a run, or
/// every sender is gone.
pub fn show_loop(
    commands: CommandReceiver,
    mut lifecycle: Lifecycle,
    status: StatusHandle,
    stop: StopSignal,
    tempo: Tempo,
    seed: Option<u64>,
) {
    tracing::info!("Show thread started");

    while let Some(command) = commands.take_latest() {
        if stop.reason() == Some(StopReason::Shutdown) {
            break;
        }

        let (playlist, looped) = match command {
            ShowCommand::Stop => {
                tracing::info!("Stop requested, show is idle");
                continue;
            }
            ShowCommand::Play { playlist, looped } => (playlist, looped),
        };

        let mut runner =
            Runner::new(&mut lifecycle, stop.clone(), tempo).with_status(status.clone());
        if let Some(seed) = seed {
            runner = runner.with_seed(seed);
        }
        let outcome = if looped {
            runner.run_looped(&playlist)
        } else {
            runner.run_once(&playlist)
        };

        if matches!(
            outcome,
            Outcome::Stopped(StopReason::Shutdown) | Outcome::Failed(_)
        ) {
            break;
        }
    }

    lifecycle.shutdown();
    tracing::info!("Show thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::OutputBank;
    use crate::driver::MemoryDriver;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn app() -> (AppState, CommandReceiver, StopSignal) {
        let stop = StopSignal::new();
        let (commands, queue) = command_channel(stop.clone());
        let state = AppState {
            commands,
            status: Arc::new(Mutex::new(ShowStatus::new(3))),
        };
        (state, queue, stop)
    }

    fn play(patterns: &[&str], looped: bool) -> PlayRequest {
        PlayRequest {
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            looped,
        }
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let (state, _queue, _) = app();
        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.state, RunnerState::Idle);
        assert_eq!(status.lines, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_value(ShowStatus::new(2)).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["mode"], "binary");
        assert_eq!(json["pattern"], serde_json::Value::Null);
        assert_eq!(json["lines"], serde_json::json!([0.0, 0.0]));
    }

    #[tokio::test]
    async fn patterns_lists_everything() {
        let Json(patterns) = get_patterns().await;
        assert_eq!(patterns.len(), Pattern::ALL.len());
        assert_eq!(patterns[0].id, "chase");

        let json = serde_json::to_value(&patterns[14]).unwrap();
        assert_eq!(json["id"], "fire");
        assert_eq!(json["family"], "intensity");
        assert_eq!(json["default_param"], 8);
    }

    #[test]
    fn play_request_reads_the_loop_field() {
        let req: PlayRequest =
            serde_json::from_str(r#"{"patterns": ["chase", "flash:4"], "loop": true}"#).unwrap();
        assert_eq!(req.patterns, vec!["chase", "flash:4"]);
        assert!(req.looped);

        let req: PlayRequest = serde_json::from_str("{}").unwrap();
        assert!(req.patterns.is_empty());
        assert!(!req.looped);
    }

    #[tokio::test]
    async fn play_preempts_and_queues_the_playlist() {
        let (state, queue, stop) = app();
        let request = play(&["chase", "flash:2"], true);
        let result = post_show_play(State(state.clone()), Json(request)).await;
        assert_eq!(result, Ok(StatusCode::OK));
        assert_eq!(stop.reason(), Some(StopReason::Preempt));

        match queue.take_latest() {
            Some(ShowCommand::Play { playlist, looped }) => {
                assert!(looped);
                assert_eq!(playlist.len(), 2);
                assert_eq!(playlist.entries()[1].param, 2);
            }
            _ => panic!("expected a play command"),
        }
        assert_eq!(stop.reason(), None);
    }

    #[tokio::test]
    async fn unknown_pattern_is_a_bad_request() {
        let (state, queue, stop) = app();
        let result = post_show_play(State(state), Json(play(&["disco"], false))).await;
        assert!(matches!(result, Err((StatusCode::BAD_REQUEST, _))));
        assert!(queue.rx.try_recv().is_err());
        assert_eq!(stop.reason(), None);
    }

    #[tokio::test]
    async fn stop_with_no_show_thread_is_an_error() {
        let (state, queue, _) = app();
        drop(queue);
        let result = post_show_stop(State(state)).await;
        assert!(matches!(result, Err((StatusCode::INTERNAL_SERVER_ERROR, _))));
    }

    #[test]
    fn newest_command_wins() {
        let (state, queue, stop) = app();
        state.commands.submit(ShowCommand::Stop).unwrap();
        state
            .commands
            .submit(ShowCommand::Play {
                playlist: Playlist::repeat(Pattern::Chase),
                looped: true,
            })
            .unwrap();

        assert!(matches!(
            queue.take_latest(),
            Some(ShowCommand::Play { looped: true, .. })
        ));
        assert!(queue.rx.try_recv().is_err());
        assert_eq!(stop.reason(), None);
    }

    #[test]
    fn command_after_take_keeps_its_preempt() {
        let (state, queue, stop) = app();
        state.commands.submit(ShowCommand::Stop).unwrap();
        assert!(queue.take_latest().is_some());

        state.commands.submit(ShowCommand::Stop).unwrap();
        assert_eq!(stop.reason(), Some(StopReason::Preempt));
        assert!(queue.take_latest().is_some());
        assert_eq!(stop.reason(), None);
    }

    #[test]
    fn queued_command_always_has_a_preempt_set() {
        let (state, queue, stop) = app();
        for _ in 0..200 {
            let commands = state.commands.clone();
            let handle = thread::spawn(move || {
                commands.submit(ShowCommand::Stop).unwrap();
                commands.submit(ShowCommand::Stop).unwrap();
            });
            assert!(queue.take_latest().is_some());
            handle.join().unwrap();

            let pending = queue.rx.try_iter().count();
            assert_eq!(stop.reason().is_some(), pending > 0);
            stop.clear();
        }
    }

    #[test]
    fn shutdown_wins_over_a_queued_command() {
        let driver = MemoryDriver::new();
        let bank = OutputBank::new(Box::new(driver.clone()), &[4]).unwrap();
        let status: StatusHandle = Arc::new(Mutex::new(ShowStatus::new(1)));
        let (state, queue, stop) = app();

        state
            .commands
            .submit(ShowCommand::Play {
                playlist: Playlist::repeat(Pattern::Flash),
                looped: true,
            })
            .unwrap();
        stop.request(StopReason::Shutdown);

        show_loop(queue, Lifecycle::new(bank), status, stop, Tempo::instant(), None);
        assert!(!driver.is_claimed(4));
    }

    #[test]
    fn show_loop_plays_then_shuts_down_when_senders_go() {
        let driver = MemoryDriver::new();
        let bank = OutputBank::new(Box::new(driver.clone()), &[4, 17, 27]).unwrap();
        let status: StatusHandle = Arc::new(Mutex::new(ShowStatus::new(3)));
        let stop = StopSignal::new();
        let (commands, queue) = command_channel(stop.clone());

        commands
            .submit(ShowCommand::Play {
                playlist: Playlist::from_specs(["bounce", "breathing:1"].as_slice()).unwrap(),
                looped: false,
            })
            .unwrap();
        drop(commands);

        show_loop(
            queue,
            Lifecycle::new(bank),
            status.clone(),
            stop,
            Tempo::instant(),
            Some(1),
        );

        assert!(!driver.is_claimed(4));
        assert_eq!(driver.level(17), 0.0);
        let status = status.lock().unwrap();
        assert_eq!(status.state, RunnerState::Idle);
        assert_eq!(status.cycle, 1);
    }
}
