mod accounts;
mod billing;
mod config;
mod http;
mod metrics;
mod models;
mod pncp;
mod search;
mod security;
mod supabase;

use accounts::{
    AccountError, Backends, Identity, NewSavedFilter, SavedFilter, SavedFilterStore,
    admin::{AdminError, AdminService, PromoteOutcome, UserSummary},
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use billing::{BillingError, BillingProvider, Entitlement, StripeClient, UnconfiguredBilling};
use config::{env_bool, env_parse, env_string};
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, DetailRequest, DetailResponse, SearchCriteria, SearchResponse};
use pncp::{PncpClient, PncpConfig};
use search::{SearchError, SearchErrorKind, SearchService};
use security::{AuthState, require_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "licita.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pncp_config = Arc::new(PncpConfig::from_env());
    let search = SearchService::new(
        Arc::new(PncpClient::new(pncp_config.clone())),
        pncp_config,
    );
    let backends = Backends::from_env();
    let billing: Arc<dyn BillingProvider> = match StripeClient::from_env() {
        Some(stripe) => Arc::new(stripe),
        None => {
            warn!(
                target = "licita.billing",
                "STRIPE_SECRET_KEY missing; billing endpoints are disabled"
            );
            Arc::new(UnconfiguredBilling)
        }
    };
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let auth_state = AuthState::from_env(backends.identities.clone());
    let state = AppState::new(
        search,
        &backends,
        billing,
        prometheus_handle,
        env_bool("REQUIRE_SUBSCRIPTION"),
    );
    let app = build_router(state, auth_state)
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = env_parse("PORT").unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "licita.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    search: SearchService,
    filters: Arc<dyn SavedFilterStore>,
    admin: AdminService,
    billing: Arc<dyn BillingProvider>,
    require_subscription: bool,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

impl AppState {
    fn new(
        search: SearchService,
        backends: &Backends,
        billing: Arc<dyn BillingProvider>,
        prometheus_handle: PrometheusHandle,
        require_subscription: bool,
    ) -> Self {
        let openapi: serde_json::Value =
            serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
                .unwrap_or_else(|_| json!({ "openapi": "3.0.3" }));
        Self {
            search,
            filters: backends.filters.clone(),
            admin: AdminService::new(backends.roles.clone(), backends.profiles.clone()),
            billing,
            require_subscription,
            openapi: Arc::new(openapi),
            prometheus_handle,
        }
    }

    async fn ensure_entitled(&self, identity: &Identity) -> Result<(), GateDenial> {
        if !self.require_subscription {
            return Ok(());
        }
        let entitlement = self
            .billing
            .entitlement(identity)
            .await
            .map_err(GateDenial::Billing)?;
        if !entitlement.subscribed {
            return Err(GateDenial::NotSubscribed);
        }
        Ok(())
    }
}

/// Why the subscription gate refused a search or detail request.
#[derive(Debug)]
enum GateDenial {
    NotSubscribed,
    Billing(BillingError),
}

impl GateDenial {
    fn status(&self) -> StatusCode {
        match self {
            GateDenial::NotSubscribed => StatusCode::PAYMENT_REQUIRED,
            GateDenial::Billing(err) => billing_status(err).0,
        }
    }

    fn message(&self) -> String {
        match self {
            GateDenial::NotSubscribed => "An active subscription is required".to_string(),
            GateDenial::Billing(err) => err.to_string(),
        }
    }
}

fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/search", post(search_handler))
        .route("/search/detail", post(detail_handler))
        .route("/filters", get(list_filters).post(create_filter))
        .route("/filters/{id}", delete(delete_filter))
        .nest(
            "/admin",
            Router::new()
                .route("/promote", post(promote_admin))
                .route("/users", get(list_users)),
        )
        .nest(
            "/billing",
            Router::new()
                .route("/subscription", get(subscription_status))
                .route("/checkout", post(create_checkout))
                .route("/portal", post(create_portal)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "licita-api",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(key) = env_string("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized("docs"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Licita API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

fn body_limit_from_env() -> usize {
    env_parse::<usize>("REQUEST_MAX_BYTES")
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = env_string("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Search published procurement notices.
///
/// - Method: `POST`
/// - Path: `/search`
/// - Auth: `Authorization: Bearer <token>` or `X-Licita-Key: <token>`
/// - Body: `SearchCriteria` (every field optional)
/// - Response: `SearchResponse` (`results`, per-category `sources`, `partial`)
async fn search_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<SearchCriteria>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    crate::metrics::inc_requests("/search");
    let Json(criteria) = payload.map_err(|rejection| {
        AppError::Search(SearchError::invalid_input("request", rejection.body_text()))
    })?;
    state
        .ensure_entitled(&identity)
        .await
        .map_err(AppError::SearchGate)?;
    info!(
        target = "licita.api",
        user_id = %identity.user_id,
        "search invoked"
    );
    let response = state.search.search(criteria).await.map_err(AppError::Search)?;
    Ok(Json(response))
}

/// Fetch one notice by its natural key.
///
/// - Method: `POST`
/// - Path: `/search/detail`
/// - Body: `{ taxId, year, sequenceNumber }` (`cnpj`, `ano`, `sequencial` accepted)
/// - Response: `{ detail }`
async fn detail_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<DetailRequest>, JsonRejection>,
) -> Result<Json<DetailResponse>, AppError> {
    crate::metrics::inc_requests("/search/detail");
    let Json(request) = payload.map_err(|rejection| {
        AppError::Detail(SearchError::invalid_input("request", rejection.body_text()))
    })?;
    state
        .ensure_entitled(&identity)
        .await
        .map_err(AppError::DetailGate)?;
    let detail = state.search.detail(request).await.map_err(AppError::Detail)?;
    Ok(Json(DetailResponse { detail }))
}

async fn list_filters(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<SavedFilter>>, AppError> {
    crate::metrics::inc_requests("/filters");
    Ok(Json(state.filters.list(identity.user_id).await?))
}

async fn create_filter(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<NewSavedFilter>,
) -> Result<(StatusCode, Json<SavedFilter>), AppError> {
    crate::metrics::inc_requests("/filters");
    let saved = state.filters.create(identity.user_id, payload).await?;
    info!(
        target = "licita.api",
        user_id = %identity.user_id,
        filter_id = %saved.id,
        "saved filter created"
    );
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn delete_filter(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    crate::metrics::inc_requests("/filters/{id}");
    state.filters.delete(identity.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteRequest {
    #[serde(default, alias = "targetUserId")]
    user_id: Option<Uuid>,
}

/// First-admin bootstrap, or promotion of `userId` by an existing admin.
async fn promote_admin(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Option<Json<PromoteRequest>>,
) -> Result<Json<PromoteOutcome>, AppError> {
    crate::metrics::inc_requests("/admin/promote");
    let Json(request) = payload.unwrap_or_default();
    Ok(Json(state.admin.promote(&identity, request.user_id).await?))
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    users: Vec<UserSummary>,
}

async fn list_users(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<UsersResponse>, AppError> {
    crate::metrics::inc_requests("/admin/users");
    let users = state.admin.list_users(&identity).await?;
    Ok(Json(UsersResponse { users }))
}

async fn subscription_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Entitlement>, AppError> {
    crate::metrics::inc_requests("/billing/subscription");
    Ok(Json(state.billing.entitlement(&identity).await?))
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    url: String,
}

async fn create_checkout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<SessionResponse>, AppError> {
    crate::metrics::inc_requests("/billing/checkout");
    let url = state.billing.checkout_url(&identity).await?;
    Ok(Json(SessionResponse { url }))
}

async fn create_portal(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<SessionResponse>, AppError> {
    crate::metrics::inc_requests("/billing/portal");
    let url = state.billing.portal_url(&identity).await?;
    Ok(Json(SessionResponse { url }))
}

#[derive(Debug)]
enum AppError {
    Search(SearchError),
    Detail(SearchError),
    Account(AccountError),
    Admin(AdminError),
    Billing(BillingError),
    SearchGate(GateDenial),
    DetailGate(GateDenial),
    Unauthorized(&'static str),
}

impl From<AccountError> for AppError {
    fn from(value: AccountError) -> Self {
        Self::Account(value)
    }
}

impl From<AdminError> for AppError {
    fn from(value: AdminError) -> Self {
        Self::Admin(value)
    }
}

impl From<BillingError> for AppError {
    fn from(value: BillingError) -> Self {
        Self::Billing(value)
    }
}

fn api_error(status: StatusCode, error: &str, detail: Option<String>) -> Response {
    let payload = ApiError {
        error: error.to_string(),
        detail,
    };
    (status, Json(payload)).into_response()
}

fn search_failure(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error, "results": [] }))).into_response()
}

fn detail_failure(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error, "detail": null }))).into_response()
}

fn billing_status(err: &BillingError) -> (StatusCode, &'static str) {
    match err {
        BillingError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, "billing_unavailable"),
        BillingError::MissingEmail => (StatusCode::BAD_REQUEST, "missing_email"),
        BillingError::NoCustomer => (StatusCode::NOT_FOUND, "no_customer"),
        BillingError::Request(_) => (StatusCode::BAD_GATEWAY, "billing_error"),
    }
}

fn account_error_response(err: AccountError) -> Response {
    match err {
        AccountError::NotFound => api_error(StatusCode::NOT_FOUND, "not_found", None),
        AccountError::InvalidInput(message) => {
            api_error(StatusCode::BAD_REQUEST, "invalid_input", Some(message))
        }
        AccountError::AlreadyAdmin => api_error(
            StatusCode::BAD_REQUEST,
            "already_admin",
            Some(AdminError::AlreadyAdmin.to_string()),
        ),
        AccountError::Backend(message) => {
            error!(target = "licita.api", "account backend failed: {message}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "backend_error", None)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Search(err) => {
                let status = match err.kind() {
                    SearchErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                search_failure(status, err.detail())
            }
            AppError::Detail(err) => {
                let status = match err.kind() {
                    SearchErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    SearchErrorKind::NotFound => StatusCode::NOT_FOUND,
                    SearchErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                };
                detail_failure(status, err.detail())
            }
            AppError::Account(err) => account_error_response(err),
            AppError::Admin(err) => {
                let message = err.to_string();
                match err {
                    AdminError::Forbidden => {
                        api_error(StatusCode::FORBIDDEN, "forbidden", Some(message))
                    }
                    AdminError::MissingTarget | AdminError::AlreadyAdmin => {
                        api_error(StatusCode::BAD_REQUEST, "invalid_input", Some(message))
                    }
                    AdminError::Store(inner) => account_error_response(inner),
                }
            }
            AppError::Billing(err) => {
                let (status, code) = billing_status(&err);
                api_error(status, code, Some(err.to_string()))
            }
            AppError::SearchGate(denial) => search_failure(denial.status(), &denial.message()),
            AppError::DetailGate(denial) => detail_failure(denial.status(), &denial.message()),
            AppError::Unauthorized(scope) => {
                api_error(StatusCode::UNAUTHORIZED, "unauthorized", Some(scope.to_string()))
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::memory::StaticIdentities;
    use crate::pncp::RawProcurement;
    use crate::search::tests::{ScriptedSource, page_of};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const TOKEN: &str = "token-1";

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::from_u128(1),
            email: Some("ana@example.com".into()),
        }
    }

    /// Billing backend whose every call fails as if Stripe were unreachable.
    struct UnreachableBilling;

    #[async_trait::async_trait]
    impl BillingProvider for UnreachableBilling {
        async fn entitlement(&self, _identity: &Identity) -> Result<Entitlement, BillingError> {
            Err(BillingError::Request("connection refused".into()))
        }

        async fn checkout_url(&self, _identity: &Identity) -> Result<String, BillingError> {
            Err(BillingError::Request("connection refused".into()))
        }

        async fn portal_url(&self, _identity: &Identity) -> Result<String, BillingError> {
            Err(BillingError::Request("connection refused".into()))
        }
    }

    fn app_with_billing(
        source: ScriptedSource,
        billing: Arc<dyn BillingProvider>,
        require_subscription: bool,
    ) -> Router {
        let backends =
            Backends::in_memory(StaticIdentities::from_pairs([(TOKEN.to_string(), identity())]));
        let search = SearchService::new(Arc::new(source), Arc::new(PncpConfig::default()));
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = AppState::new(search, &backends, billing, handle, require_subscription);
        build_router(state, AuthState::from_env(backends.identities.clone()))
    }

    fn app_with(source: ScriptedSource, require_subscription: bool) -> Router {
        app_with_billing(source, Arc::new(UnconfiguredBilling), require_subscription)
    }

    fn app() -> Router {
        app_with(ScriptedSource::default(), false)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Authorization", format!("Bearer {TOKEN}"))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "licita-api");
    }

    #[tokio::test]
    async fn search_requires_a_token() {
        let response = app()
            .oneshot(
                Request::post("/search")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn search_returns_filtered_results_with_source_reports() {
        let source = ScriptedSource::default()
            .with_pages(6, vec![Ok(page_of(6, 3, 5_000.0))])
            .with_pages(8, vec![Ok(page_of(8, 2, 50.0))]);
        let response = app_with(source, false)
            .oneshot(post_json("/search", r#"{"valueMin": 1000}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["results"].as_array().unwrap().len(), 3);
        assert_eq!(body["sources"].as_array().unwrap().len(), 3);
        assert_eq!(body["partial"], false);
    }

    #[tokio::test]
    async fn malformed_search_body_uses_search_failure_shape() {
        let response = app()
            .oneshot(post_json("/search", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
        assert_eq!(body["results"], json!([]));
    }

    #[tokio::test]
    async fn inverted_window_is_a_bad_request() {
        let response = app()
            .oneshot(post_json(
                "/search",
                r#"{"dateFrom": "2024-06-10", "dateTo": "2024-06-01"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["results"], json!([]));
    }

    #[tokio::test]
    async fn detail_maps_upstream_faults() {
        let body = r#"{"cnpj": "12.345.678/0001-99", "ano": 2024, "sequencial": "7"}"#;

        let missing = app_with(ScriptedSource::default().with_detail(Err(404)), false)
            .oneshot(post_json("/search/detail", body))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(missing).await["detail"], serde_json::Value::Null);

        let broken = app_with(ScriptedSource::default().with_detail(Err(500)), false)
            .oneshot(post_json("/search/detail", body))
            .await
            .unwrap();
        assert_eq!(broken.status(), StatusCode::BAD_GATEWAY);

        let invalid = app()
            .oneshot(post_json(
                "/search/detail",
                r#"{"taxId": "123", "year": 2024, "sequenceNumber": 1}"#,
            ))
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn detail_returns_normalized_record() {
        let raw = RawProcurement {
            objeto_compra: Some("Aquisição de medicamentos".into()),
            ..RawProcurement::default()
        };
        let response = app_with(ScriptedSource::default().with_detail(Ok(raw)), false)
            .oneshot(post_json(
                "/search/detail",
                r#"{"taxId": "12345678000199", "year": 2024, "sequenceNumber": 7}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["detail"]["title"], "Aquisição de medicamentos");
        assert_eq!(body["detail"]["sequenceNumber"], 7);
    }

    #[tokio::test]
    async fn window_before_the_calendar_start_is_a_bad_request() {
        let response = app()
            .oneshot(post_json("/search", r#"{"dateTo": "-262143-01-10"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
        assert_eq!(body["results"], json!([]));
    }

    #[tokio::test]
    async fn subscription_gate_keeps_search_failure_shape() {
        let response = app_with(ScriptedSource::default(), true)
            .oneshot(post_json("/search", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = json_body(response).await;
        assert_eq!(body["error"], "An active subscription is required");
        assert_eq!(body["results"], json!([]));
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn subscription_gate_keeps_detail_failure_shape() {
        let response = app_with(ScriptedSource::default(), true)
            .oneshot(post_json(
                "/search/detail",
                r#"{"taxId": "12345678000199", "year": 2024, "sequenceNumber": 7}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = json_body(response).await;
        assert_eq!(body["error"], "An active subscription is required");
        assert_eq!(body["detail"], serde_json::Value::Null);
        assert!(body.as_object().unwrap().contains_key("detail"));
    }

    #[tokio::test]
    async fn billing_outage_during_gate_keeps_operation_shapes() {
        let billing: Arc<dyn BillingProvider> = Arc::new(UnreachableBilling);

        let search = app_with_billing(ScriptedSource::default(), billing.clone(), true)
            .oneshot(post_json("/search", "{}"))
            .await
            .unwrap();
        assert_eq!(search.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(search).await["results"], json!([]));

        let detail = app_with_billing(ScriptedSource::default(), billing, true)
            .oneshot(post_json(
                "/search/detail",
                r#"{"taxId": "12345678000199", "year": 2024, "sequenceNumber": 7}"#,
            ))
            .await
            .unwrap();
        assert_eq!(detail.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(detail).await;
        assert!(body["error"].is_string());
        assert_eq!(body["detail"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn saved_filters_lifecycle() {
        let app = app();
        let created = app
            .clone()
            .oneshot(post_json(
                "/filters",
                r#"{"name": "Saúde", "criteria": {"searchTerm": "hospitalar"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let id = json_body(created).await["id"].as_str().unwrap().to_string();

        let listed = app
            .clone()
            .oneshot(
                Request::get("/filters")
                    .header("Authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = json_body(listed).await;
        assert_eq!(listed[0]["criteria"]["keyword"], "hospitalar");

        let delete = |id: String| {
            Request::delete(format!("/filters/{id}"))
                .header("Authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap()
        };
        let removed = app.clone().oneshot(delete(id.clone())).await.unwrap();
        assert_eq!(removed.status(), StatusCode::NO_CONTENT);
        let again = app.oneshot(delete(id)).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn first_promote_bootstraps_admin() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post_json("/admin/promote", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["success"], true);

        let users = app
            .oneshot(
                Request::get("/admin/users")
                    .header("Authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(users.status(), StatusCode::OK);
        assert_eq!(json_body(users).await["users"][0]["isAdmin"], true);
    }

    #[tokio::test]
    async fn unconfigured_billing_is_unavailable() {
        let response = app()
            .oneshot(post_json("/billing/checkout", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
