//! HTTP route handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        DefaultBodyLimit, FromRequestParts, Multipart, State, multipart::MultipartError,
        rejection::JsonRejection,
    },
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, SERVICE_KEY_HEADER};
use crate::dispatch::DispatchError;
use crate::fingerprint::Fingerprint;
use crate::ingest::PredictionCallback;
use crate::registry::{RegisterOutcome, RegistryError};
use crate::search::{SearchError, SearchRequest};
use crate::service::{HealthSnapshot, PredictionService};
use crate::staging::StagingError;
use crate::status::StatusError;
use crate::store::{SearchFilter, StoreError};
use crate::version::VersionInfo;

/// Upper bound on one multipart predict request. Bodies are streamed to
/// disk, so this caps disk use per request, not memory.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Failure response: `{"status": "failure", "detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn unavailable(error: &dyn std::error::Error) -> Self {
        tracing::error!(error = %error, "Request failed on an unavailable dependency");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "status": "failure",
                "detail": self.detail,
            })),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            e if e.is_validation() => Self::bad_request(e.to_string()),
            DispatchError::Staging(e) => e.into(),
            e => Self::unavailable(&e),
        }
    }
}

impl From<StatusError> for ApiError {
    fn from(e: StatusError) -> Self {
        Self::unavailable(&e)
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::MissingCriteria => Self::bad_request(e.to_string()),
            SearchError::Store(e) => Self::unavailable(&e),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::unavailable(&e)
    }
}

impl From<StagingError> for ApiError {
    fn from(e: StagingError) -> Self {
        tracing::error!(error = %e, "Failed to receive upload");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

/// Username behind the request's bearer token.
pub struct User(pub String);

impl FromRequestParts<Arc<PredictionService>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<PredictionService>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Ok(User(service.credentials().authenticate_user(header)?))
    }
}

/// Proof that the request carried a valid service key.
pub struct ServiceKey;

impl FromRequestParts<Arc<PredictionService>> for ServiceKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<PredictionService>,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(SERVICE_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        service.credentials().authorize_service(key)?;
        Ok(ServiceKey)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub models: usize,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: if snapshot.draining { "draining" } else { "ready" },
            models: snapshot.registered_models,
            version: snapshot.version,
        }
    }
}

async fn health_check(State(service): State<Arc<PredictionService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn list_models(
    State(service): State<Arc<PredictionService>>,
    _user: User,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "models": service.list_models() }))
}

async fn all_models(
    State(service): State<Arc<PredictionService>>,
    _user: User,
) -> Result<Json<serde_json::Value>, ApiError> {
    let models = service.all_models().await?;
    Ok(Json(serde_json::json!({ "models": models })))
}

/// Multipart body: any number of `images` file parts and `models` text parts.
///
/// Each image is streamed chunk by chunk into the staging directory. Uploads
/// received before a failure are dropped with the request, which removes
/// their temporary files.
async fn predict(
    State(service): State<Arc<PredictionService>>,
    User(username): User,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut uploads = Vec::new();
    let mut models = BTreeSet::new();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("images") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let mut incoming = service.staging().receive(filename).await?;
                while let Some(chunk) = field.chunk().await? {
                    incoming.write(&chunk).await?;
                }
                uploads.push(incoming.finish().await?);
            }
            Some("models") => {
                let model = field.text().await?;
                if !model.is_empty() {
                    models.insert(model);
                }
            }
            _ => {}
        }
    }

    if uploads.is_empty() {
        return Err(ApiError::bad_request("You must upload images to process"));
    }

    let fingerprints = service.predict(uploads, &models, &username).await?;
    Ok(Json(serde_json::json!({ "images": fingerprints })))
}

async fn results(
    State(service): State<Arc<PredictionService>>,
    _user: User,
    body: Result<Json<Vec<Fingerprint>>, JsonRejection>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let Json(fingerprints) = body?;
    let statuses = service.results(&fingerprints).await?;
    Ok(Json(statuses.iter().map(|s| s.to_response()).collect()))
}

async fn search(
    State(service): State<Arc<PredictionService>>,
    User(username): User,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    Ok(Json(service.search(&username, &request).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchDownloadRequest {
    #[serde(default)]
    pub search_string: String,
    #[serde(default)]
    pub search_filter: SearchFilter,
}

async fn search_download(
    State(service): State<Arc<PredictionService>>,
    User(username): User,
    body: Result<Json<SearchDownloadRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = body?;
    let hashes = service
        .search_download(&username, &request.search_string, &request.search_filter)
        .await?;
    Ok(Json(serde_json::json!({ "hashes": hashes })))
}

#[derive(Debug, Deserialize)]
pub struct ModelRegistration {
    pub name: String,
    pub socket: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse<'a> {
    status: &'static str,
    model: &'a str,
    detail: &'static str,
}

async fn register_model(
    State(service): State<Arc<PredictionService>>,
    _key: ServiceKey,
    body: Result<Json<ModelRegistration>, JsonRejection>,
) -> Response {
    let Json(registration) = match body {
        Ok(body) => body,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    let model = registration.name.as_str();
    let (status, detail) = match service.register_model(model, &registration.socket).await {
        Ok(RegisterOutcome::Registered) => {
            ("success", "Model has been successfully registered to server.")
        }
        Ok(RegisterOutcome::AlreadyPresent) => ("success", "Model has already been registered."),
        Err(e @ RegistryError::Draining) => {
            return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
        Err(e @ RegistryError::Unreachable { .. }) => {
            tracing::warn!(model, error = %e, "Rejected registration of unreachable model");
            ("failure", "Unable to establish successful connection to model.")
        }
    };

    Json(RegisterResponse {
        status,
        model,
        detail,
    })
    .into_response()
}

async fn predict_result(
    State(service): State<Arc<PredictionService>>,
    _key: ServiceKey,
    body: Result<Json<PredictionCallback>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(callback) = body?;
    service.ingest(callback).await?;
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn shutdown(
    State(service): State<Arc<PredictionService>>,
    _key: ServiceKey,
) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<PredictionService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/models/list", get(list_models))
        .route("/models/all", get(all_models))
        .route(
            "/models/predict",
            post(predict).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/models/results", post(results))
        .route("/models/search", post(search))
        .route("/models/search/download", post(search_download))
        .route("/models/register", post(register_model))
        .route("/models/predict_result", post(predict_result))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::health::MonitorConfig;
    use crate::queue::{JobKey, MemoryJobQueue};
    use crate::store::MemoryRecordStore;
    use crate::testing::FakeModelClient;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const TOKEN: &str = "tok-alice";
    const SERVICE_KEY: &str = "svc-key";
    const BOUNDARY: &str = "prism-test-boundary";

    struct Harness {
        service: Arc<PredictionService>,
        client: Arc<FakeModelClient>,
        queue: Arc<MemoryJobQueue>,
        store: Arc<MemoryRecordStore>,
        staging: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let staging = tempfile::tempdir().unwrap();
            let client = Arc::new(FakeModelClient::new());
            let queue = Arc::new(MemoryJobQueue::new());
            let store = Arc::new(MemoryRecordStore::new());
            let hub = HubConfig {
                staging_dir: staging.path().to_path_buf(),
                page_size: 2,
                queue_url: None,
                service_keys: vec![SERVICE_KEY.to_string()],
                user_tokens: vec![(TOKEN.to_string(), "alice".to_string())],
            };
            let service = Arc::new(PredictionService::new(
                client.clone(),
                store.clone(),
                queue.clone(),
                MonitorConfig {
                    probe_interval: Duration::from_secs(3600),
                },
                &hub,
            ));
            Self {
                service,
                client,
                queue,
                store,
                staging,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = routes(Arc::clone(&self.service))
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            (status, response_json(response).await)
        }

        fn staged_files(&self) -> Vec<String> {
            let mut names: Vec<_> = std::fs::read_dir(self.staging.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        async fn register(&self, name: &str, socket: &str) -> (StatusCode, serde_json::Value) {
            self.send(service_post(
                "/models/register",
                serde_json::json!({"name": name, "socket": socket}),
            ))
            .await
        }

        async fn upload(&self, images: &[(&str, &str)], models: &[&str]) -> (StatusCode, serde_json::Value) {
            self.send(
                Request::post("/models/predict")
                    .header("authorization", format!("Bearer {TOKEN}"))
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(multipart_body(images, models)))
                    .unwrap(),
            )
            .await
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn user_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn service_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("API_KEY", SERVICE_KEY)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_body(images: &[(&str, &str)], models: &[&str]) -> Vec<u8> {
        let mut body = Vec::new();
        for (filename, bytes) in images {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        for model in models {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"models\"\r\n\r\n{model}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    #[tokio::test]
    async fn health_check_returns_status_and_version() {
        let h = Harness::new();

        let (status, json) = h
            .send(Request::get("/health-check").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ready");
        assert_eq!(json["models"], 0);
        assert!(json["version"]["prism"].is_string());
    }

    #[tokio::test]
    async fn user_routes_require_a_token() {
        let h = Harness::new();

        let (status, json) = h
            .send(Request::get("/models/list").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["status"], "failure");

        let (status, _) = h
            .send(
                Request::post("/models/results")
                    .header("authorization", "Bearer wrong")
                    .header("content-type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn registration_requires_a_service_key() {
        let h = Harness::new();

        let (status, _) = h
            .send(user_post(
                "/models/register",
                serde_json::json!({"name": "resnet", "socket": "http://resnet"}),
            ))
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(h.service.registry().is_empty());
        assert_eq!(h.client.probe_count(), 0);
    }

    #[tokio::test]
    async fn registration_outcomes() {
        let h = Harness::new();
        h.client.set_healthy("http://dead", false);

        let (status, json) = h.register("resnet", "http://resnet").await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(json, @r#"
        {
          "detail": "Model has been successfully registered to server.",
          "model": "resnet",
          "status": "success"
        }
        "#);

        let (_, json) = h.register("resnet", "http://elsewhere").await;
        assert_eq!(json["detail"], "Model has already been registered.");

        let (status, json) = h.register("vgg", "http://dead").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "failure");
        assert_eq!(
            h.service.list_models(),
            BTreeSet::from(["resnet".to_string()])
        );

        h.service.shutdown().await;
        let (status, json) = h.register("yolo", "http://yolo").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json["detail"],
            "Server is shutting down. Unable to complete new model registration."
        );
    }

    #[tokio::test]
    async fn predict_fans_out_and_returns_fingerprints() {
        let h = Harness::new();
        h.register("resnet", "http://resnet").await;
        h.register("vgg", "http://vgg").await;

        let (status, json) = h
            .upload(&[("cat.png", "cat"), ("dog.jpg", "dog")], &["resnet", "vgg"])
            .await;

        assert_eq!(status, StatusCode::OK);
        let cat = Fingerprint::of_bytes(b"cat");
        let dog = Fingerprint::of_bytes(b"dog");
        assert_eq!(
            json,
            serde_json::json!({"images": [cat.as_str(), dog.as_str()]})
        );
        assert_eq!(h.client.predictions().len(), 4);
        assert_eq!(h.store.len(), 2);
        assert_eq!(
            h.staged_files(),
            vec![format!("{cat}.png"), format!("{dog}.jpg")]
        );

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn large_upload_is_streamed_to_its_staged_name() {
        let h = Harness::new();
        h.register("resnet", "http://resnet").await;
        let payload = "0123456789abcdef".repeat(20_000);

        let (status, json) = h.upload(&[("big.tif", payload.as_str())], &["resnet"]).await;

        assert_eq!(status, StatusCode::OK);
        let fp = Fingerprint::of_bytes(payload.as_bytes());
        assert_eq!(json["images"][0], fp.as_str());
        assert_eq!(h.staged_files(), vec![format!("{fp}.tif")]);
        let staged = std::fs::read(h.staging.path().join(format!("{fp}.tif"))).unwrap();
        assert_eq!(staged, payload.as_bytes());

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn predict_rejects_unknown_models_before_side_effects() {
        let h = Harness::new();
        h.register("resnet", "http://resnet").await;

        let (status, json) = h
            .upload(&[("cat.png", "cat")], &["resnet", "unknown_model"])
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Invalid Models Specified: unknown_model");
        assert!(h.store.is_empty());
        assert!(h.client.predictions().is_empty());
        assert!(h.staged_files().is_empty());

        let (status, json) = h.upload(&[("cat.png", "cat")], &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "You must specify models to process images with");

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn results_report_pending_success_and_unknown() {
        let h = Harness::new();
        h.register("resnet", "http://resnet").await;
        h.register("vgg", "http://vgg").await;
        h.upload(&[("cat.png", "cat"), ("dog.png", "dog")], &["resnet", "vgg"])
            .await;

        let cat = Fingerprint::of_bytes(b"cat");
        let dog = Fingerprint::of_bytes(b"dog");
        h.queue.enqueue(JobKey::new(cat.clone(), "vgg"));

        let (status, _) = h
            .send(service_post(
                "/models/predict_result",
                serde_json::json!({
                    "image_hash": cat,
                    "model_name": "resnet",
                    "results": {"result": {"cat": 0.9}, "classes": ["cat", "dog"]}
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = h
            .send(user_post(
                "/models/results",
                serde_json::json!([cat, dog, "ffffffffffffffffffffffffffffffff"]),
            ))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["status"], "pending");
        assert_eq!(json[0]["models"]["resnet"]["cat"], 0.9);
        assert_eq!(json[1]["status"], "success");
        assert_eq!(json[2]["status"], "failure");
        assert_eq!(json[2]["detail"], "Unknown md5 hash specified.");

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn callbacks_feed_the_model_catalog() {
        let h = Harness::new();
        h.register("resnet", "http://resnet").await;
        h.upload(&[("cat.png", "cat")], &["resnet"]).await;

        h.send(service_post(
            "/models/predict_result",
            serde_json::json!({
                "image_hash": Fingerprint::of_bytes(b"cat"),
                "model_name": "resnet",
                "results": {"result": "cat", "classes": ["cat", "dog"]}
            }),
        ))
        .await;

        let (status, json) = h
            .send(
                Request::get("/models/all")
                    .header("authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["models"]["resnet"], serde_json::json!(["cat", "dog"]));

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn stale_callback_is_accepted() {
        let h = Harness::new();

        let (status, json) = h
            .send(service_post(
                "/models/predict_result",
                serde_json::json!({
                    "image_hash": "00000000000000000000000000000000",
                    "model_name": "resnet",
                    "results": {"result": "cat", "classes": []}
                }),
            ))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn search_pages_and_download() {
        let h = Harness::new();
        h.register("resnet", "http://resnet").await;
        h.upload(
            &[("a.png", "a"), ("b.png", "b"), ("c.png", "c")],
            &["resnet"],
        )
        .await;

        let (_, json) = h
            .send(user_post("/models/search", serde_json::json!({"page_id": 0})))
            .await;
        assert_eq!(json["num_pages"], 2);
        assert_eq!(json["num_images"], 3);
        assert!(json.get("hashes").is_none());

        let (_, json) = h
            .send(user_post("/models/search", serde_json::json!({"page_id": 2})))
            .await;
        assert_eq!(json["current_page"], 2);
        assert_eq!(json["hashes"].as_array().unwrap().len(), 1);

        let (status, json) = h
            .send(user_post("/models/search", serde_json::json!({"page_id": 3})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "failure");
        assert_eq!(json["detail"], "Page does not exist.");

        let (status, json) = h
            .send(user_post("/models/search/download", serde_json::json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "You must specify a search string or search filter");

        let (status, json) = h
            .send(user_post(
                "/models/search/download",
                serde_json::json!({"search_string": "b.PNG"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["hashes"],
            serde_json::json!([Fingerprint::of_bytes(b"b")])
        );

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_endpoint_triggers_shutdown() {
        let h = Harness::new();
        let rx = h.service.shutdown_rx();

        let (status, json) = h
            .send(Request::post("/shutdown").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["status"], "failure");
        assert!(!*rx.borrow());

        let (status, _) = h
            .send(
                Request::post("/shutdown")
                    .header("authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!*rx.borrow());

        let (status, _) = h
            .send(
                Request::post("/shutdown")
                    .header("API_KEY", SERVICE_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn malformed_json_gets_the_failure_shape() {
        let h = Harness::new();

        let user_raw = |uri: &str, body: &'static str| {
            Request::post(uri)
                .header("authorization", format!("Bearer {TOKEN}"))
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };
        let service_raw = |uri: &str, body: &'static str| {
            Request::post(uri)
                .header("API_KEY", SERVICE_KEY)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let cases = [
            user_raw("/models/results", "[\"abc\""),
            user_raw("/models/search", "{\"page_id\": \"two\"}"),
            user_raw("/models/search/download", "not json"),
            service_raw("/models/register", "{\"name\": \"resnet\"}"),
            service_raw("/models/predict_result", "{}"),
        ];

        for request in cases {
            let uri = request.uri().to_string();
            let (status, json) = h.send(request).await;
            assert!(status.is_client_error(), "{uri} returned {status}");
            assert_eq!(json["status"], "failure", "{uri}");
            assert!(json["detail"].as_str().is_some_and(|d| !d.is_empty()), "{uri}");
        }

        let (status, json) = h
            .send(
                Request::post("/models/results")
                    .header("authorization", format!("Bearer {TOKEN}"))
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json["status"], "failure");

        assert!(h.service.registry().is_empty());
        assert!(h.store.is_empty());
    }
}
