use crate::{
    auth::{
        AuthConfig, AuthState, RateLimitConfig, RateLimiter,
        middleware::{authenticate, rate_limit, require_permission},
    },
    background::{self, BackgroundTasks},
    data::Models,
    mailer::{LogMailer, Mailer},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    handler::Handler,
    http::{HeaderName, HeaderValue, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, info, info_span, warn};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub(crate) mod handlers;
mod openapi;

pub use error::ApiError;
pub use openapi::openapi;

use handlers::movies;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs from the command line.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: SecretString,
    pub db_max_connections: u32,
    pub db_max_idle_time: Duration,
    pub limiter: RateLimitConfig,
    pub auth: AuthConfig,
    pub shutdown_grace: Duration,
}

/// Assemble the full application around already-built state.
#[must_use]
pub fn app(state: Arc<AuthState>, background: BackgroundTasks, mailer: Arc<dyn Mailer>) -> Router {
    let (router, openapi) = router().split_for_parts();

    router
        .route(
            "/v1/movies",
            get(movies::list_movies
                .layer(from_fn_with_state(movies::READ_PERMISSION, require_permission)))
            .post(
                movies::create_movie
                    .layer(from_fn_with_state(movies::WRITE_PERMISSION, require_permission)),
            ),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state))
                .layer(Extension(background))
                .layer(Extension(mailer))
                .layer(from_fn(rate_limit))
                .layer(from_fn(authenticate)),
        )
}

/// Start the server and run until a shutdown signal, then drain.
/// # Errors
/// Return error if the database is unreachable or the listener fails
pub async fn new(config: ServerConfig) -> Result<()> {
    // One pool for the whole process, handed to every store.
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.db_max_connections)
        .idle_timeout(config.db_max_idle_time)
        .acquire_timeout(Duration::from_secs(5))
        .test_before_acquire(true)
        .connect(config.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    info!("database connection pool established");

    let shutdown = background::shutdown_signal();

    let limiter = Arc::new(RateLimiter::new(config.limiter));
    let sweeper = limiter.spawn_sweeper(shutdown.clone());

    let state = Arc::new(AuthState::new(
        config.auth,
        Models::postgres(pool.clone()),
        limiter,
    ));
    let background = BackgroundTasks::new();
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);

    let app = app(state, background.clone(), mailer);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    let result = serve(
        listener,
        app,
        shutdown.clone(),
        background,
        config.shutdown_grace,
    )
    .await;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    pool.close().await;
    info!("Gracefully shutdown");

    result
}

/// Serve `app` until `shutdown` fires, then give in-flight requests `grace`
/// to finish and drain background tasks with the same budget.
///
/// Background tasks are drained whether the server stopped cleanly or not.
///
/// # Errors
/// Returns the server error, if any, after draining.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    background: BackgroundTasks,
    grace: Duration,
) -> Result<()> {
    let signal = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal.cancelled_owned())
        .await
    });

    let result = tokio::select! {
        joined = &mut server => server_result(joined),
        () = shutdown.cancelled() => {
            info!(?grace, "waiting for in-flight requests");
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => server_result(joined),
                Err(_) => {
                    warn!("grace period elapsed with requests still in flight");
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    if let Err(err) = &result {
        error!("server stopped with an error: {err:#}");
    }

    if !background.drain(grace).await {
        warn!("exiting with unfinished background tasks");
    }

    result
}

fn server_result(joined: Result<std::io::Result<()>, JoinError>) -> Result<()> {
    joined.context("server task failed")?.context("server failed")
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn local_listener() -> Result<TcpListener> {
        Ok(TcpListener::bind("127.0.0.1:0").await?)
    }

    #[tokio::test]
    async fn shutdown_drains_pending_background_tasks() -> Result<()> {
        let background = BackgroundTasks::new();
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let finished = finished.clone();
            background.run_in_background("slow", async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        serve(
            local_listener().await?,
            Router::new(),
            shutdown,
            background.clone(),
            Duration::from_secs(5),
        )
        .await?;

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(background.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_gives_up_on_background_tasks_after_grace() -> Result<()> {
        let background = BackgroundTasks::new();
        background.run_in_background("stuck", std::future::pending::<()>());

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let started = tokio::time::Instant::now();
        serve(
            local_listener().await?,
            Router::new(),
            shutdown,
            background.clone(),
            Duration::from_millis(50),
        )
        .await?;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(background.in_flight(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn in_flight_request_completes_before_exit() -> Result<()> {
        let listener = local_listener().await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                "done"
            }),
        );

        let server = tokio::spawn(serve(
            listener,
            app,
            shutdown.clone(),
            BackgroundTasks::new(),
            Duration::from_secs(5),
        ));

        let mut stream = tokio::net::TcpStream::connect(addr).await?;
        stream
            .write_all(b"GET /slow HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("done"), "{response}");

        server.await??;
        Ok(())
    }
}
