//! REST API for the bucket service.
//!
//! Hosts one shared bucket session and exposes its operations over HTTP.
//! Uses Axum as the web framework and supports CORS. Engine events are streamed
//! to clients as Server-Sent Events.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use futures::Stream;
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::bucket::{BucketError, BucketEvent, SphereBucket};
use crate::config::{ApiConfig, BucketSettings};
use crate::geometry::SlotIndex;
use crate::model::{Sphere, SphereId};
use crate::types::Point2;

const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
struct ApiState {
    bucket: Arc<Mutex<SphereBucket>>,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<String>,
    animate_by_default: bool,
}

impl ApiState {
    fn new(settings: &BucketSettings) -> Result<Self, BucketError> {
        let bucket = SphereBucket::new(settings.spec().clone(), settings.stacking())?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            bucket: Arc::new(Mutex::new(bucket)),
            next_id: Arc::new(AtomicU64::new(1)),
            events,
            animate_by_default: settings.animate_by_default(),
        })
    }

    fn allocate_id(&self) -> SphereId {
        SphereId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `operation` on the locked bucket and forwards the events it produced.
    fn with_bucket<T>(
        &self,
        operation: impl FnOnce(&mut SphereBucket) -> T,
    ) -> Result<T, Response> {
        let mut bucket = self.bucket.lock().map_err(|_| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Bucket unavailable",
                "The bucket state was poisoned by an earlier failure",
            )
        })?;
        let value = operation(&mut *bucket);
        let events = bucket.drain_events();
        drop(bucket);

        self.publish(events);
        Ok(value)
    }

    fn publish(&self, events: Vec<BucketEvent>) {
        for event in events {
            if let Ok(json) = serde_json::to_string(&event) {
                // Sending only fails while nobody listens.
                let _ = self.events.send(json);
            }
        }
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>sphere-bucket API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Request to drop a new sphere into the bucket.
///
/// With `near` set the sphere goes to the supported slot closest to that point,
/// otherwise to the first open slot.
#[derive(Deserialize, Clone, Default, ToSchema)]
#[schema(example = json!({ "position": { "x": 12.0, "y": 80.0 }, "near": { "x": 12.0, "y": 80.0 }, "animate": true }))]
pub struct AddSphereRequest {
    #[serde(default)]
    #[schema(nullable = true)]
    pub position: Option<Point2>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub near: Option<Point2>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub animate: Option<bool>,
}

/// Request carrying a single point.
#[derive(Deserialize, Clone, ToSchema)]
#[schema(example = json!({ "point": { "x": 0.0, "y": 0.0 } }))]
pub struct PointRequest {
    pub point: Point2,
}

/// Request toggling the held-by-user flag of a sphere.
#[derive(Deserialize, Clone, ToSchema)]
pub struct HeldRequest {
    pub held: bool,
}

#[derive(Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RemoveQuery {
    /// Leave the remaining spheres where they are.
    #[serde(default)]
    pub skip_relayout: Option<bool>,
}

/// A sphere currently held by the bucket.
#[derive(Serialize, ToSchema)]
pub struct MemberView {
    pub id: SphereId,
    pub slot: SlotIndex,
    pub position: Point2,
    pub destination: Point2,
    pub user_controlled: bool,
}

impl MemberView {
    fn new(sphere: &Sphere, slot: SlotIndex) -> Self {
        Self {
            id: sphere.id,
            slot,
            position: sphere.position,
            destination: sphere.destination,
            user_controlled: sphere.user_controlled,
        }
    }
}

/// Full state of the bucket.
#[derive(Serialize, ToSchema)]
pub struct BucketSnapshot {
    pub caption: Option<String>,
    pub origin: Point2,
    pub width: f64,
    pub sphere_radius: f64,
    pub pyramid_capacity: usize,
    /// Slot count per layer, bottom first, up to the first overflow layer
    pub layer_slots: Vec<usize>,
    pub members: Vec<MemberView>,
    pub dangling: Vec<SphereId>,
}

impl BucketSnapshot {
    fn capture(bucket: &SphereBucket) -> Self {
        let lattice = bucket.lattice();
        Self {
            caption: bucket.spec().caption.clone(),
            origin: bucket.spec().origin,
            width: bucket.spec().width,
            sphere_radius: bucket.config().sphere_radius,
            pyramid_capacity: lattice.pyramid_capacity(),
            layer_slots: (0..=lattice.pyramid_layers())
                .map(|layer| lattice.slots_in_layer(layer))
                .collect(),
            members: bucket
                .iter()
                .map(|(sphere, slot)| MemberView::new(sphere, slot))
                .collect(),
            dangling: bucket.dangling_members(),
        }
    }
}

/// A sphere that left the bucket and now belongs to the caller.
#[derive(Serialize, ToSchema)]
pub struct ReleasedSphere {
    pub sphere: Sphere,
}

#[derive(Serialize, ToSchema)]
pub struct RelayoutResponse {
    pub moves: usize,
    pub dangling: Vec<SphereId>,
}

#[derive(Serialize, ToSchema)]
pub struct ResetResponse {
    pub released: Vec<Sphere>,
}

/// Result of a slot query.
///
/// `slot` is null when no supported slot exists; `location` then holds the
/// bucket origin.
#[derive(Serialize, ToSchema)]
pub struct SlotResponse {
    #[schema(nullable = true)]
    pub slot: Option<SlotIndex>,
    pub location: Point2,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn bucket_error(err: BucketError) -> Response {
    match err {
        BucketError::NotAMember(_) => {
            error_response(StatusCode::NOT_FOUND, "Unknown sphere", err.to_string())
        }
        BucketError::AlreadyMember(_) => {
            error_response(StatusCode::CONFLICT, "Sphere already in bucket", err.to_string())
        }
        BucketError::Invalid(inner) => validation_error(inner.to_string()),
    }
}

fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(value)| value)
        .map_err(json_deserialize_error)
}

fn ensure_finite(point: Option<Point2>, name: &str) -> Result<(), Response> {
    match point {
        Some(point) if !point.is_finite() => Err(validation_error(format!(
            "{} must have finite coordinates",
            name
        ))),
        _ => Ok(()),
    }
}

fn into_response<T: Serialize>(result: Result<T, Response>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(response) => response,
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_snapshot,
        handle_add_sphere,
        handle_remove_sphere,
        handle_set_held,
        handle_extract,
        handle_relayout,
        handle_reset,
        handle_first_open,
        handle_nearest_open,
        handle_events
    ),
    components(
        schemas(
            AddSphereRequest,
            PointRequest,
            HeldRequest,
            MemberView,
            BucketSnapshot,
            ReleasedSphere,
            RelayoutResponse,
            ResetResponse,
            SlotResponse,
            ErrorResponse,
            BucketEvent,
            Sphere,
            SphereId,
            SlotIndex,
            Point2
        )
    ),
    tags((name = "bucket", description = "Endpoints for the sphere bucket"))
)]
struct ApiDoc;

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        // API endpoints
        .route("/bucket", get(handle_snapshot))
        .route("/bucket/spheres", post(handle_add_sphere))
        .route("/bucket/spheres/{id}", delete(handle_remove_sphere))
        .route("/bucket/spheres/{id}/held", post(handle_set_held))
        .route("/bucket/extract", post(handle_extract))
        .route("/bucket/relayout", post(handle_relayout))
        .route("/bucket/reset", post(handle_reset))
        .route("/bucket/slots/first_open", get(handle_first_open))
        .route("/bucket/slots/nearest", post(handle_nearest_open))
        .route("/bucket/events", get(handle_events))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server.
///
/// Blocks until the server is terminated.
pub async fn start_api_server(config: ApiConfig, settings: BucketSettings) {
    let state = match ApiState::new(&settings) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("❌ Could not set up the bucket: {err}");
            return;
        }
    };
    let app = router(state);

    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("❌ Could not bind API server to {}: {}", addr, err);
            return;
        }
    };

    let display_host = config.display_host().to_string();
    println!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        println!("💡 Local access: http://localhost:{}", config.port());
    }
    println!("🪣 API Endpoints:");
    println!("   - GET    /bucket");
    println!("   - POST   /bucket/spheres");
    println!("   - DELETE /bucket/spheres/{{id}}");
    println!("   - POST   /bucket/spheres/{{id}}/held");
    println!("   - POST   /bucket/extract");
    println!("   - POST   /bucket/relayout");
    println!("   - POST   /bucket/reset");
    println!("   - GET    /bucket/slots/first_open");
    println!("   - POST   /bucket/slots/nearest");
    println!("   - GET    /bucket/events");
    println!("📑 Documentation:");
    println!("   - GET /docs");
    println!("   - GET /docs/openapi.json");

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("❌ API server terminated with an error: {err}");
    }
}

/// Handler for GET /bucket.
#[utoipa::path(
    get,
    path = "/bucket",
    responses((status = 200, description = "Current bucket state", body = BucketSnapshot)),
    tag = "bucket"
)]
async fn handle_snapshot(State(state): State<ApiState>) -> Response {
    into_response(state.with_bucket(|bucket| BucketSnapshot::capture(bucket)))
}

/// Handler for POST /bucket/spheres.
///
/// Creates a sphere with a fresh id and places it.
#[utoipa::path(
    post,
    path = "/bucket/spheres",
    request_body = AddSphereRequest,
    responses(
        (status = 200, description = "Sphere placed", body = MemberView),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "bucket"
)]
async fn handle_add_sphere(
    State(state): State<ApiState>,
    payload: Result<Json<AddSphereRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = ensure_finite(request.near, "near") {
        return response;
    }

    let id = state.allocate_id();
    let start = request
        .position
        .or(request.near)
        .unwrap_or_else(|| state.with_bucket(|b| b.spec().origin).unwrap_or(Point2::zero()));
    let sphere = match Sphere::validated(id, start) {
        Ok(sphere) => sphere,
        Err(err) => return validation_error(err.to_string()),
    };
    let animate = request.animate.unwrap_or(state.animate_by_default);

    let placed = state.with_bucket(|bucket| {
        let slot = match request.near {
            Some(near) => bucket.add_nearest_open(sphere, near, animate),
            None => bucket.add_first_open(sphere, animate),
        }?;
        let view = bucket
            .get(id)
            .map(|sphere| MemberView::new(sphere, slot))
            .ok_or(BucketError::NotAMember(id))?;
        Ok::<_, BucketError>(view)
    });

    match placed {
        Ok(Ok(view)) => {
            println!("📥 Sphere {} placed at {}", view.id, view.slot);
            (StatusCode::OK, Json(view)).into_response()
        }
        Ok(Err(err)) => bucket_error(err),
        Err(response) => response,
    }
}

/// Handler for DELETE /bucket/spheres/{id}.
#[utoipa::path(
    delete,
    path = "/bucket/spheres/{id}",
    params(("id" = u64, Path, description = "Sphere id"), RemoveQuery),
    responses(
        (status = 200, description = "Sphere removed", body = ReleasedSphere),
        (status = NOT_FOUND, description = "Sphere is not in the bucket", body = ErrorResponse)
    ),
    tag = "bucket"
)]
async fn handle_remove_sphere(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Query(query): Query<RemoveQuery>,
) -> Response {
    let skip_relayout = query.skip_relayout.unwrap_or(false);
    match state.with_bucket(|bucket| bucket.remove(SphereId(id), skip_relayout)) {
        Ok(Ok(sphere)) => into_response(Ok(ReleasedSphere { sphere })),
        Ok(Err(err)) => bucket_error(err),
        Err(response) => response,
    }
}

/// Handler for POST /bucket/spheres/{id}/held.
///
/// Picking a sphere up removes it from the bucket; the response then carries it.
#[utoipa::path(
    post,
    path = "/bucket/spheres/{id}/held",
    params(("id" = u64, Path, description = "Sphere id")),
    request_body = HeldRequest,
    responses(
        (status = 200, description = "Sphere released to the user", body = ReleasedSphere),
        (status = 204, description = "Flag updated, sphere stays in the bucket"),
        (status = NOT_FOUND, description = "Sphere is not in the bucket", body = ErrorResponse)
    ),
    tag = "bucket"
)]
async fn handle_set_held(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    payload: Result<Json<HeldRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.with_bucket(|bucket| bucket.set_user_controlled(SphereId(id), request.held)) {
        Ok(Ok(Some(sphere))) => into_response(Ok(ReleasedSphere { sphere })),
        Ok(Ok(None)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(err)) => bucket_error(err),
        Err(response) => response,
    }
}

/// Handler for POST /bucket/extract.
#[utoipa::path(
    post,
    path = "/bucket/extract",
    request_body = PointRequest,
    responses(
        (status = 200, description = "Closest sphere picked up", body = ReleasedSphere),
        (status = NOT_FOUND, description = "The bucket is empty", body = ErrorResponse)
    ),
    tag = "bucket"
)]
async fn handle_extract(
    State(state): State<ApiState>,
    payload: Result<Json<PointRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = ensure_finite(Some(request.point), "point") {
        return response;
    }

    match state.with_bucket(|bucket| bucket.extract_closest(request.point)) {
        Ok(Some(sphere)) => {
            println!("📤 Sphere {} picked up", sphere.id);
            into_response(Ok(ReleasedSphere { sphere }))
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "Bucket is empty",
            "There is no sphere to pick up",
        ),
        Err(response) => response,
    }
}

/// Handler for POST /bucket/relayout.
#[utoipa::path(
    post,
    path = "/bucket/relayout",
    responses((status = 200, description = "Relayout finished", body = RelayoutResponse)),
    tag = "bucket"
)]
async fn handle_relayout(State(state): State<ApiState>) -> Response {
    into_response(state.with_bucket(|bucket| RelayoutResponse {
        moves: bucket.relayout(),
        dangling: bucket.dangling_members(),
    }))
}

/// Handler for POST /bucket/reset.
#[utoipa::path(
    post,
    path = "/bucket/reset",
    responses((status = 200, description = "Bucket emptied", body = ResetResponse)),
    tag = "bucket"
)]
async fn handle_reset(State(state): State<ApiState>) -> Response {
    let result = state.with_bucket(|bucket| ResetResponse {
        released: bucket.reset_all(),
    });
    if let Ok(reset) = &result {
        println!("🧹 Bucket reset, {} spheres released", reset.released.len());
    }
    into_response(result)
}

/// Handler for GET /bucket/slots/first_open.
#[utoipa::path(
    get,
    path = "/bucket/slots/first_open",
    responses((status = 200, description = "First open slot", body = SlotResponse)),
    tag = "bucket"
)]
async fn handle_first_open(State(state): State<ApiState>) -> Response {
    into_response(state.with_bucket(|bucket| {
        let slot = bucket.first_open_slot();
        SlotResponse {
            slot: Some(slot),
            location: bucket.lattice().slot_point(slot),
        }
    }))
}

/// Handler for POST /bucket/slots/nearest.
#[utoipa::path(
    post,
    path = "/bucket/slots/nearest",
    request_body = PointRequest,
    responses(
        (status = 200, description = "Nearest supported open slot", body = SlotResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "bucket"
)]
async fn handle_nearest_open(
    State(state): State<ApiState>,
    payload: Result<Json<PointRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = ensure_finite(Some(request.point), "point") {
        return response;
    }

    into_response(state.with_bucket(|bucket| SlotResponse {
        slot: bucket.nearest_open_slot(request.point),
        location: bucket.nearest_open_location(request.point),
    }))
}

/// Handler for GET /bucket/events (SSE).
///
/// Streams every engine event as JSON. Clients that fall behind skip the events
/// they missed.
#[utoipa::path(
    get,
    path = "/bucket/events",
    responses(
        (
            status = 200,
            description = "Streams bucket events in real-time",
            content_type = "text/event-stream",
            body = String
        )
    ),
    tag = "bucket"
)]
async fn handle_events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(|msg| msg.ok().map(|json| Ok(Event::default().data(json))));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keep-alive"),
    )
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    fn test_state() -> ApiState {
        let settings = BucketSettings::default();
        ApiState::new(&settings).expect("default settings are valid")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body is readable");
        serde_json::from_slice(&bytes).expect("body is JSON")
    }

    async fn add(state: &ApiState, request: AddSphereRequest) -> Response {
        handle_add_sphere(State(state.clone()), Ok(Json(request))).await
    }

    #[test]
    fn openapi_doc_lists_expected_paths() {
        let doc = openapi_doc();
        let paths = &doc.paths.paths;
        for path in [
            "/bucket",
            "/bucket/spheres",
            "/bucket/spheres/{id}",
            "/bucket/extract",
            "/bucket/events",
        ] {
            assert!(
                paths.contains_key(path),
                "OpenAPI documentation is missing the {} path",
                path
            );
        }
    }

    #[test]
    fn openapi_doc_contains_key_schemas() {
        let doc = openapi_doc();
        let components = doc
            .components
            .as_ref()
            .expect("OpenAPI documentation contains no components");
        for name in ["AddSphereRequest", "BucketSnapshot", "ErrorResponse", "BucketEvent"] {
            assert!(
                components.schemas.contains_key(name),
                "Expected schema '{}' is missing from OpenAPI spec",
                name
            );
        }
    }

    #[test]
    fn add_request_fields_are_optional() {
        let request: AddSphereRequest = serde_json::from_str("{}").expect("Should parse");
        assert!(request.position.is_none());
        assert!(request.near.is_none());
        assert!(request.animate.is_none());

        let request: AddSphereRequest =
            serde_json::from_str(r#"{"near": {"x": 3.0, "y": 4.0}, "animate": false}"#)
                .expect("Should parse");
        assert_eq!(request.near, Some(Point2::new(3.0, 4.0)));
        assert_eq!(request.animate, Some(false));
    }

    #[tokio::test]
    async fn add_sphere_assigns_ids_and_slots() {
        let state = test_state();

        let first = body_json(add(&state, AddSphereRequest::default()).await).await;
        let second = body_json(add(&state, AddSphereRequest::default()).await).await;

        assert_eq!(first["id"], 1);
        assert_eq!(first["slot"]["layer"], 0);
        assert_eq!(first["slot"]["column"], 0);
        assert_eq!(second["id"], 2);
        assert_eq!(second["slot"]["column"], 1);
    }

    #[tokio::test]
    async fn add_sphere_rejects_non_finite_reference() {
        let state = test_state();
        let response = add(
            &state,
            AddSphereRequest {
                near: Some(Point2::new(f64::NAN, 0.0)),
                ..AddSphereRequest::default()
            },
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn removing_unknown_sphere_is_not_found() {
        let state = test_state();
        let response = handle_remove_sphere(
            State(state.clone()),
            Path(42),
            Query(RemoveQuery::default()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Unknown sphere");
    }

    #[tokio::test]
    async fn extract_on_empty_bucket_is_not_found() {
        let state = test_state();
        let response = handle_extract(
            State(state.clone()),
            Ok(Json(PointRequest {
                point: Point2::zero(),
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn held_flag_releases_the_sphere() {
        let state = test_state();
        add(&state, AddSphereRequest::default()).await;

        let stay = handle_set_held(
            State(state.clone()),
            Path(1),
            Ok(Json(HeldRequest { held: false })),
        )
        .await;
        assert_eq!(stay.status(), StatusCode::NO_CONTENT);

        let grabbed = handle_set_held(
            State(state.clone()),
            Path(1),
            Ok(Json(HeldRequest { held: true })),
        )
        .await;
        assert_eq!(grabbed.status(), StatusCode::OK);
        let body = body_json(grabbed).await;
        assert_eq!(body["sphere"]["user_controlled"], true);

        let snapshot = body_json(handle_snapshot(State(state.clone())).await).await;
        assert_eq!(snapshot["members"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn events_are_broadcast_after_mutations() {
        let state = test_state();
        let mut receiver = state.events.subscribe();

        add(&state, AddSphereRequest::default()).await;

        let json = receiver.try_recv().expect("add event was published");
        let event: Value = serde_json::from_str(&json).expect("event is JSON");
        assert_eq!(event["type"], "SphereAdded");
        assert_eq!(event["id"], 1);
    }

    #[tokio::test]
    async fn snapshot_reports_layer_slots() {
        let state = test_state();
        let snapshot = body_json(handle_snapshot(State(state.clone())).await).await;

        // Width 120, radius 10: 100 usable -> 5 base slots.
        let layer_slots: Vec<u64> = snapshot["layer_slots"]
            .as_array()
            .expect("layer_slots is an array")
            .iter()
            .filter_map(Value::as_u64)
            .collect();
        assert_eq!(layer_slots, vec![5, 4, 3, 2, 1, 1]);
        assert_eq!(snapshot["pyramid_capacity"], 15);
    }
}
