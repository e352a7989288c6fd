//! HTTP routes.

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::error;
use watchpost_archive::PictureStore;
use watchpost_network::LiveBroadcaster;
use watchpost_types::{
    camera::CameraStatus,
    frame::Frame,
    picture::{bytes_to_gb, ArchiveStats, FilterOptions},
    WatchpostError,
};

use crate::{
    live,
    query::{detections_header, FrameParams, PictureParams, DETECTIONS_HEADER},
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    let images = Router::new()
        .route_service("/{*name}", ServeDir::new(state.archive.directory()))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            archived_images_only,
        ));
    let images_route = state.config.server.images_route.clone();
    Router::new()
        .route("/api/cameras", get(camera_statuses))
        .route("/api/cameras/events", get(live::status_events))
        .route("/api/cameras/{camera}/frames", post(submit_frame))
        .route("/api/cameras/{camera}/socket", get(live::camera_socket))
        .route("/api/view", get(live::viewer_socket))
        .route("/api/pictures", get(list_pictures))
        .route("/api/pictures/filters", get(picture_filters))
        .route("/api/pictures/stats", get(picture_stats))
        .route("/api/pictures/clear", post(clear_pictures))
        .route("/api/pictures/{filename}", delete(delete_picture))
        .route("/api/stats/frames", get(frame_stats))
        .nest(&images_route, images)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Only archived pictures are served from the archive directory. The index
/// file and anything else sharing the directory answer 404.
async fn archived_images_only(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_archived_image(&state, request.uri().path()).await {
        next.run(request).await
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn is_archived_image(state: &AppState, path: &str) -> bool {
    state
        .archive
        .path_of(path.trim_start_matches('/'))
        .await
        .is_some()
}

/// Maps domain errors onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(WatchpostError);

impl From<WatchpostError> for ApiError {
    fn from(err: WatchpostError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WatchpostError::InvalidFrame(_) => StatusCode::BAD_REQUEST,
            WatchpostError::NotFound(_) => StatusCode::NOT_FOUND,
            WatchpostError::ArchiveFull { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn camera_statuses(State(state): State<AppState>) -> Json<Vec<CameraStatus>> {
    Json(state.monitor.statuses())
}

async fn submit_frame(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Query(params): Query<FrameParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let detections = detections_header(headers.get(DETECTIONS_HEADER))?;
    let frame = Frame::new(camera.clone(), body).with_detections(detections);
    let accepted = state
        .intake
        .submit_with(frame, params.archive.unwrap_or_default())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "camera": camera,
            "sequence": accepted.sequence,
            "viewers": accepted.viewers,
            "archived": accepted.archived,
        })),
    ))
}

async fn list_pictures(
    State(state): State<AppState>,
    Query(params): Query<PictureParams>,
) -> Json<Value> {
    let page = state
        .archive
        .list(
            &params.filter(),
            params.page(),
            params.limit(state.config.archive.default_page_size),
        )
        .await;
    Json(json!({
        "pictures": page.items,
        "currentPage": page.current_page,
        "totalPages": page.total_pages,
        "length": page.total_count,
        "totalCount": page.total_count,
        "pageSize": page.page_size,
        "size": page.current_size,
        "maxSize": bytes_to_gb(page.max_size),
        "maxSizeBytes": page.max_size,
        "imagesDir": state.config.server.images_route,
    }))
}

async fn delete_picture(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.archive.delete(&filename).await?;
    Ok(Json(json!({ "status": "deleted", "filename": filename })))
}

async fn clear_pictures(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.archive.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn picture_filters(State(state): State<AppState>) -> Json<FilterOptions> {
    Json(state.archive.filters().await)
}

async fn picture_stats(State(state): State<AppState>) -> Json<ArchiveStats> {
    Json(state.archive.stats().await)
}

async fn frame_stats(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.counters.snapshot().await;
    Json(json!({
        "total": snapshot.total,
        "cameras": snapshot.cameras,
        "viewers": state.hub.viewer_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchpost_intake::ArchiveMode;
    use watchpost_types::config::WatchpostConfig;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

    async fn state(dir: &tempfile::TempDir) -> AppState {
        let mut config = WatchpostConfig::default();
        config.archive.directory = dir.path().to_string_lossy().into_owned();
        AppState::build(config).await.expect("state builds")
    }

    #[tokio::test]
    async fn uploaded_frame_is_relayed_and_listed() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let mut headers = HeaderMap::new();
        headers.insert(
            DETECTIONS_HEADER,
            r#"[{"label":"person","confidence":0.8}]"#.parse().unwrap(),
        );

        let (status, Json(body)) = submit_frame(
            State(state.clone()),
            Path("balkon".to_string()),
            Query(FrameParams::default()),
            headers,
            Bytes::from_static(JPEG),
        )
        .await
        .expect("frame accepted");
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["sequence"], 1);
        assert_eq!(body["archived"], true);

        state.intake.close().await;
        let Json(listing) = list_pictures(State(state.clone()), Query(PictureParams::default())).await;
        assert_eq!(listing["length"], 1);
        assert_eq!(listing["pictures"][0]["camera"], "balkon");
        assert_eq!(listing["pictures"][0]["objects"][0], "person");
        assert_eq!(listing["size"], 4);
        assert_eq!(listing["imagesDir"], "/images");
        assert_eq!(listing["maxSizeBytes"], 2u64 * 1024 * 1024 * 1024);

        let Json(stats) = frame_stats(State(state)).await;
        assert_eq!(stats["cameras"]["balkon"]["received"], 1);
    }

    #[tokio::test]
    async fn skip_query_keeps_frame_out_of_archive() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let (_, Json(body)) = submit_frame(
            State(state.clone()),
            Path("drzwi".to_string()),
            Query(FrameParams {
                archive: Some(ArchiveMode::Skip),
            }),
            HeaderMap::new(),
            Bytes::from_static(JPEG),
        )
        .await
        .unwrap();
        assert_eq!(body["archived"], false);
        assert!(state.monitor.registry().last_frame_at("drzwi").is_some());
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        let err = submit_frame(
            State(state.clone()),
            Path("balkon".to_string()),
            Query(FrameParams::default()),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = delete_picture(State(state.clone()), Path("missing.jpg".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let status = clear_pictures(State(state)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn delete_reports_removed_filename() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let (status, Json(body)) = submit_frame(
            State(state.clone()),
            Path("brama".to_string()),
            Query(FrameParams {
                archive: Some(ArchiveMode::Force),
            }),
            HeaderMap::new(),
            Bytes::from_static(JPEG),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["archived"], true);
        state.intake.close().await;

        let Json(filters) = picture_filters(State(state.clone())).await;
        assert_eq!(filters.cameras, vec!["brama"]);

        let Json(listing) = list_pictures(State(state.clone()), Query(PictureParams::default())).await;
        let name = listing["pictures"][0]["name"].as_str().unwrap().to_string();
        let Json(body) = delete_picture(State(state.clone()), Path(name.clone()))
            .await
            .unwrap();
        assert_eq!(body["status"], "deleted");
        assert_eq!(body["filename"], name);
        assert_eq!(state.archive.current_size().await, 0);
    }

    #[tokio::test]
    async fn images_route_serves_only_archived_pictures() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let (_, Json(body)) = submit_frame(
            State(state.clone()),
            Path("drzwi".to_string()),
            Query(FrameParams {
                archive: Some(ArchiveMode::Force),
            }),
            HeaderMap::new(),
            Bytes::from_static(JPEG),
        )
        .await
        .unwrap();
        assert_eq!(body["archived"], true);
        state.intake.close().await;
        assert!(dir.path().join("index.json").exists());

        let Json(listing) = list_pictures(State(state.clone()), Query(PictureParams::default())).await;
        let name = listing["pictures"][0]["name"].as_str().unwrap().to_string();
        assert!(is_archived_image(&state, &format!("/{name}")).await);

        let refused = [
            "/index.json",
            "/index.json.tmp",
            "/index%2Ejson",
            "/",
            "/missing.jpg",
            "/../index.json",
        ];
        for path in refused {
            assert!(!is_archived_image(&state, path).await, "{path} must not be served");
        }
    }

    #[tokio::test]
    async fn router_builds_with_configured_images_route() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let _router = router(state);
    }
}
