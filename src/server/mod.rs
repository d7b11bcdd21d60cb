//! Server initialization and routing

use crate::api;
use crate::config::{Config, ServiceKind};
use crate::email::LogEmailProvider;
use crate::error::AppError;
use crate::jwt::TokenCodec;
use crate::middleware::{
    admission_middleware, cors_layer, normalize_error_response, AdmissionPipeline,
    ObservabilityLayer, RateLimiter,
};
use crate::repository::{InMemoryTaskRepository, InMemoryUserRepository};
use crate::service::{CredentialLimiters, TaskService, UserService};
use crate::state::{HasConfig, HasTasks, HasTokenCodec, HasUpstreams, HasUsers};
use crate::upstream::UpstreamClient;
use anyhow::Result;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State of the task service
#[derive(Clone)]
pub struct TaskState {
    pub config: Arc<Config>,
    pub codec: TokenCodec,
    pub task_service: Arc<TaskService<InMemoryTaskRepository>>,
    pub metrics: Option<PrometheusHandle>,
}

impl TaskState {
    pub fn new(config: Config, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            codec: TokenCodec::new(config.jwt.clone()),
            task_service: Arc::new(TaskService::new(Arc::new(InMemoryTaskRepository::new()))),
            config: Arc::new(config),
            metrics,
        }
    }
}

/// State of the user service
#[derive(Clone)]
pub struct UserState {
    pub config: Arc<Config>,
    pub codec: TokenCodec,
    pub user_service: Arc<UserService<InMemoryUserRepository>>,
    pub metrics: Option<PrometheusHandle>,
}

impl UserState {
    pub fn new(config: Config, metrics: Option<PrometheusHandle>) -> Self {
        let codec = TokenCodec::new(config.jwt.clone());
        let limiters = CredentialLimiters {
            register: Arc::new(RateLimiter::from_rule("register", config.rate_limit.register)),
            login: Arc::new(RateLimiter::from_rule("login", config.rate_limit.login)),
        };
        let user_service = UserService::new(
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(LogEmailProvider),
            codec.clone(),
            limiters,
            config.jwt.secret.clone().unwrap_or_default(),
            config.public_url.clone(),
        );

        Self {
            config: Arc::new(config),
            codec,
            user_service: Arc::new(user_service),
            metrics,
        }
    }
}

/// State of the edge gateway
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub codec: TokenCodec,
    pub upstream_client: UpstreamClient,
    pub metrics: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(config: Config, metrics: Option<PrometheusHandle>) -> Result<Self> {
        Ok(Self {
            codec: TokenCodec::new(config.jwt.clone()),
            upstream_client: UpstreamClient::new(&config.gateway)?,
            config: Arc::new(config),
            metrics,
        })
    }
}

macro_rules! impl_has_config {
    ($($state:ty),+) => {
        $(
            impl HasTokenCodec for $state {
                fn token_codec(&self) -> &TokenCodec {
                    &self.codec
                }
            }

            impl HasConfig for $state {
                fn config(&self) -> &Config {
                    &self.config
                }

                fn metrics_handle(&self) -> Option<&PrometheusHandle> {
                    self.metrics.as_ref()
                }
            }
        )+
    };
}

impl_has_config!(TaskState, UserState, GatewayState);

impl HasTasks for TaskState {
    type TaskRepo = InMemoryTaskRepository;

    fn task_service(&self) -> &TaskService<Self::TaskRepo> {
        &self.task_service
    }
}

impl HasUsers for UserState {
    type UserRepo = InMemoryUserRepository;

    fn user_service(&self) -> &UserService<Self::UserRepo> {
        &self.user_service
    }
}

impl HasUpstreams for GatewayState {
    fn upstream_client(&self) -> &UpstreamClient {
        &self.upstream_client
    }
}

/// Start the HTTP server for the configured service
pub async fn run(config: Config, metrics: Option<PrometheusHandle>) -> Result<()> {
    let http_addr = config.http_addr();
    let service = config.service;

    let app = match service {
        ServiceKind::Gateway => build_gateway_router(GatewayState::new(config, metrics)?),
        ServiceKind::Tasks => build_task_router(TaskState::new(config, metrics)),
        ServiceKind::Users => build_user_router(UserState::new(config, metrics)),
    };

    let listener = TcpListener::bind(&http_addr).await?;
    info!("{} started on {}", service.name(), http_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn route_not_found() -> AppError {
    AppError::NotFound("route not found".to_string())
}

/// Wrap service routes in the admission pipeline.
///
/// CORS sits in front of the pipeline. `/health` and `/metrics` stay outside
/// it so health checks and scrapes are never throttled.
fn with_admission<S: HasConfig>(routes: Router<S>, state: S) -> Router {
    let pipeline = Arc::new(AdmissionPipeline::from_config(
        state.config(),
        state.token_codec().clone(),
    ));
    let service_name = state.config().service.name();

    let admitted = routes
        .with_state(state.clone())
        .layer(from_fn(normalize_error_response))
        .layer(from_fn_with_state(pipeline, admission_middleware))
        .layer(cors_layer());

    Router::new()
        .route("/health", get(move || api::health::health(service_name)))
        .route("/metrics", get(api::metrics::metrics_handler::<S>))
        .with_state(state)
        .merge(admitted)
        .layer(ObservabilityLayer)
        .layer(TraceLayer::new_for_http())
}

pub fn build_task_router<S: HasTasks>(state: S) -> Router {
    let routes = Router::new()
        .route(
            "/api/v1/tasks",
            get(api::task::list::<S>).post(api::task::create::<S>),
        )
        .route(
            "/api/v1/tasks/{id}",
            get(api::task::get::<S>)
                .put(api::task::update::<S>)
                .delete(api::task::delete::<S>),
        )
        .route(
            "/api/v1/tasks/{id}/status",
            patch(api::task::change_status::<S>),
        )
        .fallback(route_not_found);

    with_admission(routes, state)
}

pub fn build_user_router<S: HasUsers>(state: S) -> Router {
    let routes = Router::new()
        // Credential endpoints
        .route("/api/v1/auth/register", post(api::user::register::<S>))
        .route("/api/v1/auth/login", post(api::user::login::<S>))
        .route(
            "/api/v1/auth/confirm-email",
            post(api::user::confirm_email::<S>),
        )
        .route(
            "/api/v1/auth/password-reset",
            post(api::user::request_password_reset::<S>),
        )
        .route(
            "/api/v1/auth/password-reset/confirm",
            post(api::user::reset_password::<S>),
        )
        // User endpoints
        .route("/api/v1/users", get(api::user::list::<S>))
        .route(
            "/api/v1/users/{id}",
            get(api::user::get::<S>)
                .put(api::user::update::<S>)
                .delete(api::user::delete::<S>),
        )
        .fallback(route_not_found);

    with_admission(routes, state)
}

/// Every path outside `/health` and `/metrics` is relayed or answered 404
pub fn build_gateway_router<S: HasUpstreams>(state: S) -> Router {
    let routes = Router::new().fallback(api::proxy::forward::<S>);
    with_admission(routes, state)
}
