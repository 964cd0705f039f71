//! HTTP API server: axum router and request handlers.
//!
//! Handlers are thin: they pull numbers out of the path, hand the work to
//! [`Jumbotron`] on the blocking pool (matrix pushes, playback joins and file
//! writes all block) and map [`JumbotronError`] onto status codes.
//!
//! ## Routes
//! - `GET  /jumbotron` status
//! - `POST /jumbotron/{pixel,row,column,all}/...` region updates
//! - `POST /jumbotron/reset`, `POST /jumbotron/stop`
//! - `GET|POST /jumbotron/brightness`
//! - `POST /jumbotron/upload/{brightness}`, `POST /jumbotron/playvideo/{brightness}`
//! - `/jumbotron/saves/...` named snapshots
//! - `GET  /jumbotron/stream` WebSocket frame stream
//!
//! The older web frontend's paths are served too: GET for the region
//! updates and reset, and the `*_saved_matrix*` snapshot routes.

use crate::broadcast::ChannelObserver;
use crate::error::JumbotronError;
use crate::persistence::{SnapshotEntry, validate_name};
use crate::pixel::{Pixel, PixelGrid};
use crate::service::{DisplayState, Jumbotron, JumbotronStatus};
use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Uploaded images and videos can be a few megabytes.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Frames queued per stream client before it counts as too slow.
const STREAM_QUEUE: usize = 4;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub jumbotron: Arc<Jumbotron>,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_matrix,
        post_pixel,
        post_row,
        post_column,
        post_all,
        post_reset,
        post_stop,
        get_brightness,
        post_brightness,
        post_upload,
        post_play_video,
        get_saves,
        post_save,
        post_activate,
        delete_save,
        get_preview,
        legacy_save,
        legacy_list,
    ),
    components(schemas(
        JumbotronStatus,
        DisplayState,
        Pixel,
        SnapshotEntry,
        Success,
        BrightnessResponse,
        SavedFile,
        SavedMatrix,
    )),
    tags(
        (name = "display", description = "Display control endpoints"),
        (name = "media", description = "Image and video uploads"),
        (name = "saves", description = "Named snapshots"),
        (name = "system", description = "System status endpoints"),
        (name = "legacy", description = "Route names used by older frontends"),
    ),
    info(
        title = "Jumbotron API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for a WS281x LED matrix"
    )
)]
pub struct ApiDoc;

// ── Response types ───────────────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct Success {
    #[schema(example = true)]
    success: bool,
}

const OK: Json<Success> = Json(Success { success: true });

#[derive(Serialize, utoipa::ToSchema)]
pub struct BrightnessResponse {
    /// Current brightness (0-100)
    #[schema(example = 40)]
    brightness: u8,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn error_response(e: JumbotronError) -> (StatusCode, String) {
    let status = match &e {
        JumbotronError::SnapshotNotFound(_) | JumbotronError::VideoMissing(_) => {
            StatusCode::NOT_FOUND
        }
        JumbotronError::CorruptState(_) => StatusCode::BAD_REQUEST,
        e if e.is_caller_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    (status, e.to_string())
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Jumbotron) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let jumbotron = state.jumbotron.clone();
    tokio::task::spawn_blocking(move || f(&jumbotron))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Worker failed: {e}"),
            )
        })?
        .map_err(error_response)
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/jumbotron", get(get_status))
        .route("/jumbotron/matrix", get(get_matrix))
        .route(
            "/jumbotron/pixel/{row}/{column}/{r}/{g}/{b}/{brightness}",
            get(post_pixel).post(post_pixel),
        )
        .route(
            "/jumbotron/row/{row}/{r}/{g}/{b}/{brightness}",
            get(post_row).post(post_row),
        )
        .route(
            "/jumbotron/column/{column}/{r}/{g}/{b}/{brightness}",
            get(post_column).post(post_column),
        )
        .route(
            "/jumbotron/all/{r}/{g}/{b}/{brightness}",
            get(post_all).post(post_all),
        )
        .route("/jumbotron/reset", get(post_reset).post(post_reset))
        .route("/jumbotron/stop", post(post_stop))
        .route("/jumbotron/brightness", get(get_brightness))
        .route("/jumbotron/brightness/{brightness}", post(post_brightness))
        .route("/jumbotron/upload/{brightness}", post(post_upload))
        .route("/jumbotron/playvideo/{brightness}", post(post_play_video))
        .route("/jumbotron/saves", get(get_saves))
        .route("/jumbotron/saves/{name}", post(post_save).delete(delete_save))
        .route("/jumbotron/saves/{name}/activate", post(post_activate))
        .route("/jumbotron/saves/{name}/preview", get(get_preview))
        .route("/jumbotron/save_current_matrix/{name}", post(legacy_save))
        .route("/jumbotron/get_saved_matrices", get(legacy_list))
        .route("/jumbotron/play_saved_matrix/{name}", get(post_activate))
        .route("/jumbotron/activate_saved_matrix/{name}", post(post_activate))
        .route("/jumbotron/delete_saved_matrix/{name}", delete(delete_save))
        .route("/jumbotron/get_saved_matrix_image/{name}", get(get_preview))
        .route("/jumbotron/stream", get(ws_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Status ───────────────────────────────────────────────────────────

/// GET /jumbotron — liveness and current display state
#[utoipa::path(
    get,
    path = "/jumbotron",
    tag = "system",
    responses(
        (status = 200, description = "Current display status", body = JumbotronStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> ApiResult<Json<JumbotronStatus>> {
    blocking(&state, |j| Ok(j.status())).await.map(Json)
}

/// GET /jumbotron/matrix — the full pixel grid
#[utoipa::path(
    get,
    path = "/jumbotron/matrix",
    tag = "display",
    responses(
        (status = 200, description = "Row-major pixel grid", body = Vec<Vec<Pixel>>)
    )
)]
async fn get_matrix(State(state): State<AppState>) -> ApiResult<Json<PixelGrid>> {
    blocking(&state, |j| Ok(j.snapshot())).await.map(Json)
}

// ── Region updates ───────────────────────────────────────────────────

/// POST /jumbotron/pixel/{row}/{column}/{r}/{g}/{b}/{brightness} — set one pixel
#[utoipa::path(
    post,
    path = "/jumbotron/pixel/{row}/{column}/{r}/{g}/{b}/{brightness}",
    tag = "display",
    params(
        ("row" = usize, Path, description = "Row, 0 at the top"),
        ("column" = usize, Path, description = "Column, 0 at the left"),
        ("r" = u8, Path, description = "Red (0-255)"),
        ("g" = u8, Path, description = "Green (0-255)"),
        ("b" = u8, Path, description = "Blue (0-255)"),
        ("brightness" = u8, Path, description = "Brightness (0-100, higher values are clamped)"),
    ),
    responses(
        (status = 200, description = "Pixel updated", body = Success),
        (status = 400, description = "Coordinates out of range")
    )
)]
async fn post_pixel(
    State(state): State<AppState>,
    Path((row, column, r, g, b, brightness)): Path<(usize, usize, u8, u8, u8, u8)>,
) -> ApiResult<Json<Success>> {
    let pixel = Pixel::new(r, g, b, brightness);
    blocking(&state, move |j| j.update_pixel(row, column, pixel)).await?;
    Ok(OK)
}

/// POST /jumbotron/row/{row}/{r}/{g}/{b}/{brightness} — fill one row
#[utoipa::path(
    post,
    path = "/jumbotron/row/{row}/{r}/{g}/{b}/{brightness}",
    tag = "display",
    params(
        ("row" = usize, Path, description = "Row, 0 at the top"),
        ("r" = u8, Path), ("g" = u8, Path), ("b" = u8, Path),
        ("brightness" = u8, Path, description = "Brightness (0-100)"),
    ),
    responses(
        (status = 200, description = "Row updated", body = Success),
        (status = 400, description = "Row out of range")
    )
)]
async fn post_row(
    State(state): State<AppState>,
    Path((row, r, g, b, brightness)): Path<(usize, u8, u8, u8, u8)>,
) -> ApiResult<Json<Success>> {
    let pixel = Pixel::new(r, g, b, brightness);
    blocking(&state, move |j| j.update_row(row, pixel)).await?;
    Ok(OK)
}

/// POST /jumbotron/column/{column}/{r}/{g}/{b}/{brightness} — fill one column
#[utoipa::path(
    post,
    path = "/jumbotron/column/{column}/{r}/{g}/{b}/{brightness}",
    tag = "display",
    params(
        ("column" = usize, Path, description = "Column, 0 at the left"),
        ("r" = u8, Path), ("g" = u8, Path), ("b" = u8, Path),
        ("brightness" = u8, Path, description = "Brightness (0-100)"),
    ),
    responses(
        (status = 200, description = "Column updated", body = Success),
        (status = 400, description = "Column out of range")
    )
)]
async fn post_column(
    State(state): State<AppState>,
    Path((column, r, g, b, brightness)): Path<(usize, u8, u8, u8, u8)>,
) -> ApiResult<Json<Success>> {
    let pixel = Pixel::new(r, g, b, brightness);
    blocking(&state, move |j| j.update_column(column, pixel)).await?;
    Ok(OK)
}

/// POST /jumbotron/all/{r}/{g}/{b}/{brightness} — fill the whole matrix
#[utoipa::path(
    post,
    path = "/jumbotron/all/{r}/{g}/{b}/{brightness}",
    tag = "display",
    params(
        ("r" = u8, Path), ("g" = u8, Path), ("b" = u8, Path),
        ("brightness" = u8, Path, description = "Brightness (0-100)"),
    ),
    responses(
        (status = 200, description = "Matrix filled", body = Success)
    )
)]
async fn post_all(
    State(state): State<AppState>,
    Path((r, g, b, brightness)): Path<(u8, u8, u8, u8)>,
) -> ApiResult<Json<Success>> {
    let pixel = Pixel::new(r, g, b, brightness);
    blocking(&state, move |j| j.update_all(pixel)).await?;
    Ok(OK)
}

/// POST /jumbotron/reset — stop any video and blank the display
#[utoipa::path(
    post,
    path = "/jumbotron/reset",
    tag = "display",
    responses(
        (status = 200, description = "Display blanked", body = Success)
    )
)]
async fn post_reset(State(state): State<AppState>) -> ApiResult<Json<Success>> {
    blocking(&state, |j| j.reset()).await?;
    Ok(OK)
}

/// POST /jumbotron/stop — stop video playback, keeping the last frame
#[utoipa::path(
    post,
    path = "/jumbotron/stop",
    tag = "display",
    responses(
        (status = 200, description = "Playback stopped", body = Success)
    )
)]
async fn post_stop(State(state): State<AppState>) -> ApiResult<Json<Success>> {
    blocking(&state, |j| j.stop_video()).await?;
    Ok(OK)
}

// ── Brightness ───────────────────────────────────────────────────────

/// GET /jumbotron/brightness — current brightness
#[utoipa::path(
    get,
    path = "/jumbotron/brightness",
    tag = "display",
    responses(
        (status = 200, description = "Current brightness", body = BrightnessResponse)
    )
)]
async fn get_brightness(State(state): State<AppState>) -> ApiResult<Json<BrightnessResponse>> {
    let brightness = blocking(&state, |j| Ok(j.brightness())).await?;
    Ok(Json(BrightnessResponse { brightness }))
}

/// POST /jumbotron/brightness/{brightness} — set brightness everywhere, live
#[utoipa::path(
    post,
    path = "/jumbotron/brightness/{brightness}",
    tag = "display",
    params(("brightness" = u8, Path, description = "Brightness (0-100)")),
    responses(
        (status = 200, description = "Brightness updated", body = Success)
    )
)]
async fn post_brightness(
    State(state): State<AppState>,
    Path(brightness): Path<u8>,
) -> ApiResult<Json<Success>> {
    blocking(&state, move |j| j.update_brightness(brightness)).await?;
    Ok(OK)
}

// ── Uploads ──────────────────────────────────────────────────────────

/// Pull the `file` part out of a multipart upload.
async fn read_file_part(mut multipart: Multipart) -> ApiResult<(String, Bytes)> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        (StatusCode::BAD_REQUEST, e.to_string())
    };
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                "No file selected for uploading".to_string(),
            ));
        }
        let data = field.bytes().await.map_err(bad_request)?;
        return Ok((file_name, data));
    }
    Err((
        StatusCode::BAD_REQUEST,
        "No file part in the request".to_string(),
    ))
}

/// POST /jumbotron/upload/{brightness} — show an uploaded image
///
/// Multipart form with a `file` part (PNG, JPEG or GIF). The image is
/// resized to the panel and shown at the given brightness; the applied grid
/// is returned.
#[utoipa::path(
    post,
    path = "/jumbotron/upload/{brightness}",
    tag = "media",
    params(("brightness" = u8, Path, description = "Brightness (0-100)")),
    responses(
        (status = 200, description = "Image shown", body = Vec<Vec<Pixel>>),
        (status = 400, description = "Missing or undecodable file")
    )
)]
async fn post_upload(
    State(state): State<AppState>,
    Path(brightness): Path<u8>,
    multipart: Multipart,
) -> ApiResult<Json<PixelGrid>> {
    let (_, data) = read_file_part(multipart).await?;
    let grid = blocking(&state, move |j| j.show_image(&data, brightness)).await?;
    Ok(Json(grid))
}

/// POST /jumbotron/playvideo/{brightness} — store and play an uploaded video
///
/// Multipart form with a `file` part (animated GIF, or a container such as
/// mp4 when ffmpeg is installed). Any running video is
/// stopped first; playback loops until something else is shown.
#[utoipa::path(
    post,
    path = "/jumbotron/playvideo/{brightness}",
    tag = "media",
    params(("brightness" = u8, Path, description = "Brightness (0-100)")),
    responses(
        (status = 200, description = "Playback started", body = Success),
        (status = 400, description = "Missing or undecodable file")
    )
)]
async fn post_play_video(
    State(state): State<AppState>,
    Path(brightness): Path<u8>,
    multipart: Multipart,
) -> ApiResult<Json<Success>> {
    let (file_name, data) = read_file_part(multipart).await?;
    blocking(&state, move |j| {
        j.play_uploaded_video(&file_name, &data, brightness)
    })
    .await?;
    Ok(OK)
}

// ── Saves ────────────────────────────────────────────────────────────

/// GET /jumbotron/saves — list named snapshots
#[utoipa::path(
    get,
    path = "/jumbotron/saves",
    tag = "saves",
    responses(
        (status = 200, description = "Snapshots sorted by name", body = Vec<SnapshotEntry>)
    )
)]
async fn get_saves(State(state): State<AppState>) -> ApiResult<Json<Vec<SnapshotEntry>>> {
    blocking(&state, |j| j.list_snapshots()).await.map(Json)
}

/// POST /jumbotron/saves/{name} — save what is on screen under `name`
#[utoipa::path(
    post,
    path = "/jumbotron/saves/{name}",
    tag = "saves",
    params(("name" = String, Path, description = "Snapshot name")),
    responses(
        (status = 200, description = "Snapshot saved", body = Success),
        (status = 400, description = "Invalid name")
    )
)]
async fn post_save(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Success>> {
    blocking(&state, move |j| j.save_snapshot(&name)).await?;
    Ok(OK)
}

/// POST /jumbotron/saves/{name}/activate — put a snapshot back on screen
#[utoipa::path(
    post,
    path = "/jumbotron/saves/{name}/activate",
    tag = "saves",
    params(("name" = String, Path, description = "Snapshot name")),
    responses(
        (status = 200, description = "Snapshot shown", body = Success),
        (status = 400, description = "Snapshot does not fit the panel"),
        (status = 404, description = "No such snapshot, or its video is gone")
    )
)]
async fn post_activate(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Success>> {
    blocking(&state, move |j| j.activate_snapshot(&name)).await?;
    Ok(OK)
}

/// DELETE /jumbotron/saves/{name} — delete a snapshot and its uploaded video
#[utoipa::path(
    delete,
    path = "/jumbotron/saves/{name}",
    tag = "saves",
    params(("name" = String, Path, description = "Snapshot name")),
    responses(
        (status = 200, description = "Snapshot deleted", body = Success),
        (status = 404, description = "No such snapshot")
    )
)]
async fn delete_save(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Success>> {
    blocking(&state, move |j| j.delete_snapshot(&name)).await?;
    Ok(OK)
}

/// GET /jumbotron/saves/{name}/preview — PNG preview of a snapshot
#[utoipa::path(
    get,
    path = "/jumbotron/saves/{name}/preview",
    tag = "saves",
    params(("name" = String, Path, description = "Snapshot name")),
    responses(
        (status = 200, description = "PNG image", content_type = "image/png"),
        (status = 404, description = "No such snapshot")
    )
)]
async fn get_preview(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let png = blocking(&state, move |j| j.snapshot_preview(&name)).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

// ── Legacy snapshot routes ───────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct SavedFile {
    #[schema(example = true)]
    success: bool,
    /// Name of the written file
    #[schema(example = "sunset.json")]
    filename: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SavedMatrix {
    #[schema(example = "sunset.json")]
    filename: String,
    /// Preview URL
    #[schema(example = "/jumbotron/get_saved_matrix_image/sunset.json")]
    image: String,
}

/// POST /jumbotron/save_current_matrix/{name} — save under `name`, report the file name
#[utoipa::path(
    post,
    path = "/jumbotron/save_current_matrix/{name}",
    tag = "legacy",
    params(("name" = String, Path, description = "Snapshot name, `.json` optional")),
    responses(
        (status = 200, description = "Snapshot saved", body = SavedFile),
        (status = 400, description = "Invalid name")
    )
)]
async fn legacy_save(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SavedFile>> {
    let filename = blocking(&state, move |j| {
        let name = validate_name(&name)?;
        j.save_snapshot(name)?;
        Ok(format!("{name}.json"))
    })
    .await?;
    Ok(Json(SavedFile {
        success: true,
        filename,
    }))
}

/// GET /jumbotron/get_saved_matrices — snapshot files with their preview URLs
#[utoipa::path(
    get,
    path = "/jumbotron/get_saved_matrices",
    tag = "legacy",
    responses(
        (status = 200, description = "Snapshots sorted by name", body = Vec<SavedMatrix>)
    )
)]
async fn legacy_list(State(state): State<AppState>) -> ApiResult<Json<Vec<SavedMatrix>>> {
    let entries = blocking(&state, |j| j.list_snapshots()).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| SavedMatrix {
                image: format!("/jumbotron/get_saved_matrix_image/{}.json", entry.name),
                filename: format!("{}.json", entry.name),
            })
            .collect(),
    ))
}

// ── WebSocket streaming ─────────────────────────────────────────────

/// GET /jumbotron/stream — WebSocket stream of the matrix.
///
/// Each text message is `{"data": [[pixel, ...], ...], "timestamp": ns}`,
/// sent at the broadcaster's fixed rate. Clients that fall behind are
/// disconnected.
async fn ws_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(mut socket: WebSocket, state: AppState) {
    let broadcaster = state.jumbotron.broadcaster().clone();
    let (observer, mut frames) = ChannelObserver::channel(STREAM_QUEUE);
    let id = broadcaster.subscribe(Box::new(observer));
    tracing::info!("Stream client connected ({:?})", id);

    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            frame = frames.recv() => {
                // None: the broadcaster gave up on us
                let Some(payload) = frame else { break };
                if socket.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
                sent += 1;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {} // ping/pong handled by axum
            },
        }
    }

    broadcaster.unsubscribe(id);
    tracing::info!("Stream client disconnected ({} frames sent)", sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PanelConfig;
    use crate::broadcast::FrameBroadcaster;
    use crate::matrix::Matrix;
    use crate::persistence::{FileStateStore, SnapshotStore};
    use crate::playback::{PlaybackController, SystemClock};
    use crate::strip::MockStrip;
    use crate::test_support::SlowStrip;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn state(tmp: &TempDir) -> AppState {
        state_with_strip(tmp, Box::new(MockStrip))
    }

    fn state_with_strip(tmp: &TempDir, strip: Box<dyn crate::strip::StripSink>) -> AppState {
        let matrix = Arc::new(Matrix::new(PanelConfig::new(2, 3), strip).unwrap());
        let playback = PlaybackController::new(matrix.clone(), 30, Arc::new(SystemClock::new()));
        let broadcaster = Arc::new(FrameBroadcaster::new(matrix.clone(), 60));
        AppState {
            jumbotron: Arc::new(Jumbotron::new(
                matrix,
                playback,
                broadcaster,
                Box::new(FileStateStore::new(tmp.path().join("last_state.json"))),
                SnapshotStore::new(tmp.path().join("saves")),
                40,
            )),
        }
    }

    #[rstest]
    #[case(JumbotronError::IndexOutOfRange { axis: crate::error::Axis::Row, index: 9, limit: 2 }, StatusCode::BAD_REQUEST)]
    #[case(JumbotronError::SourceUnreadable("x".into()), StatusCode::BAD_REQUEST)]
    #[case(JumbotronError::InvalidName("..".into()), StatusCode::BAD_REQUEST)]
    #[case(JumbotronError::SnapshotNotFound("x".into()), StatusCode::NOT_FOUND)]
    #[case(JumbotronError::VideoMissing("x".into()), StatusCode::NOT_FOUND)]
    #[case(JumbotronError::DeviceWriteFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn error_status_codes(#[case] err: JumbotronError, #[case] expected: StatusCode) {
        assert_eq!(error_response(err).0, expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pixel_handler_updates_the_matrix() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        let reply = post_pixel(State(state.clone()), Path((1, 2, 9, 8, 7, 150))).await;

        assert!(reply.is_ok());
        assert_eq!(state.jumbotron.snapshot()[1][2], Pixel::new(9, 8, 7, 100));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn out_of_range_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        let Err((status, _)) = post_row(State(state), Path((5, 1, 1, 1, 1))).await else {
            panic!("expected an error");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_snapshot_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        let Err((status, _)) = post_activate(State(state), Path("ghost".to_string())).await else {
            panic!("expected an error");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn brightness_round_trip() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        post_brightness(State(state.clone()), Path(70)).await.unwrap();

        assert_eq!(get_brightness(State(state)).await.unwrap().0.brightness, 70);
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/jumbotron",
            "/jumbotron/pixel/{row}/{column}/{r}/{g}/{b}/{brightness}",
            "/jumbotron/upload/{brightness}",
            "/jumbotron/saves/{name}/activate",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    /// Serve `state` on a loopback port and send one bodiless request.
    async fn request(state: AppState, method: &str, path: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, create_router(state)).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let head = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn region_updates_also_answer_get() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        let response = request(state.clone(), "GET", "/jumbotron/all/1/2/3/50").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert_eq!(state.jumbotron.snapshot()[0][0], Pixel::new(1, 2, 3, 50));

        let response = request(state.clone(), "GET", "/jumbotron/reset").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert_eq!(state.jumbotron.snapshot()[0][0], Pixel::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saved_matrix_routes_work_with_file_names() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);
        state.jumbotron.update_all(Pixel::new(5, 5, 5, 100)).unwrap();

        let saved = legacy_save(State(state.clone()), Path("sunset".to_string()))
            .await
            .unwrap();
        assert_eq!(saved.0.filename, "sunset.json");

        let listed = legacy_list(State(state.clone())).await.unwrap().0;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "sunset.json");
        assert_eq!(listed[0].image, "/jumbotron/get_saved_matrix_image/sunset.json");

        state.jumbotron.reset().unwrap();
        let response = request(state.clone(), "GET", "/jumbotron/play_saved_matrix/sunset.json").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert_eq!(state.jumbotron.snapshot()[1][2], Pixel::new(5, 5, 5, 100));

        let response = request(state.clone(), "GET", "/jumbotron/get_saved_matrix_image/sunset.json").await;
        assert!(response.contains("image/png"), "{response}");

        let response = request(state.clone(), "DELETE", "/jumbotron/delete_saved_matrix/sunset.json").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(state.jumbotron.list_snapshots().unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reads_do_not_wait_on_the_runtime_thread() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_strip(&tmp, Box::new(SlowStrip::new(Duration::from_millis(150))));

        let writer = {
            let jumbotron = state.jumbotron.clone();
            std::thread::spawn(move || {
                for shade in 0..4 {
                    jumbotron.update_all(Pixel::new(shade, 0, 0, 100)).unwrap();
                }
            })
        };

        let mut worst = Duration::ZERO;
        for _ in 0..10 {
            let started = Instant::now();
            get_status(State(state.clone())).await.unwrap();
            get_matrix(State(state.clone())).await.unwrap();
            get_brightness(State(state.clone())).await.unwrap();
            worst = worst.max(started.elapsed());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        writer.join().unwrap();

        assert!(worst < Duration::from_millis(100), "slowest read took {:?}", worst);
    }
}
