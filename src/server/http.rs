//! HTTP server implementation
//!
//! Hand-rolled router over `(Method, path)` on top of hyper's HTTP/1.1
//! connection driver. Every connection is watched by a graceful shutdown
//! handle so the lifecycle can stop accepting and drain.

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::ORIGIN;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{CredentialHasher, TokenService};
use crate::config::Args;
use crate::db::{EventSink, SharedMovies, SharedUsers};
use crate::lifecycle::{ShutdownHandle, ShutdownTrigger};
use crate::routes::{self, auth_routes, favorites, movies, response::collect_body, BoxBody};
use crate::server::cors::{self, CorsDecision, CorsPolicy};
use crate::services::MovieSearch;
use crate::types::{MarqueeError, Result};

/// Shared state, immutable after construction
pub struct AppState {
    pub args: Args,
    pub users: SharedUsers,
    pub movies: SharedMovies,
    pub search: Arc<dyn MovieSearch>,
    pub tokens: TokenService,
    pub hasher: CredentialHasher,
    pub cors: CorsPolicy,
    /// Store connection state, for readiness
    pub connection: EventSink,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        users: SharedUsers,
        movies: SharedMovies,
        search: Arc<dyn MovieSearch>,
        connection: EventSink,
    ) -> Result<Self> {
        let secret = args.jwt_secret.clone().unwrap_or_default();
        let tokens = TokenService::new(secret, args.jwt_expires_in)?;
        let hasher = CredentialHasher::new(args.hash_work_factor)?;
        let cors = CorsPolicy::new(args.cors_origin_list());

        Ok(Self {
            args,
            users,
            movies,
            search,
            tokens,
            hasher,
            cors,
            connection,
            started_at: Instant::now(),
        })
    }
}

/// Accept connections until `stop` fires, then drain
///
/// An accept failure raises a fatal shutdown trigger; the loop then waits
/// for the coordinator's stop like any other shutdown. Returns whether all
/// connections finished within `drain_timeout`.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: ShutdownHandle,
    mut stop: oneshot::Receiver<()>,
    drain_timeout: Duration,
) -> bool {
    let graceful = GracefulShutdown::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            biased;

            _ = &mut stop => break,

            accepted = listener.accept(), if accepting => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(route(state, req).await) }
                    });

                    let conn = http1::Builder::new().serve_connection(io, service);
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                    accepting = false;
                    shutdown.trigger(ShutdownTrigger::Fatal(format!("accept failed: {}", e)));
                }
            },
        }
    }

    drop(listener);
    info!("Stopped accepting connections, draining in-flight requests");

    match tokio::time::timeout(drain_timeout, graceful.shutdown()).await {
        Ok(()) => {
            info!("All connections drained");
            true
        }
        Err(_) => {
            warn!(
                timeout_secs = drain_timeout.as_secs(),
                "Drain deadline exceeded, abandoning open connections"
            );
            false
        }
    }
}

/// Route one request, converting errors into JSON responses
pub async fn route<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let started = Instant::now();

        let decision = state.cors.check(req.headers().get(ORIGIN));
        if decision == CorsDecision::Forbidden {
            warn!("Rejected cross-origin request");
            return cors::forbidden();
        }
        if req.method() == Method::OPTIONS {
            return cors::preflight(&decision);
        }

        let result = match collect_body(req).await {
            Ok(req) => dispatch(&state, req).await,
            Err(e) => Err(e),
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.status_code().is_server_error() {
                    error!(error = %e, "Request failed");
                } else {
                    debug!(error = %e, "Request rejected");
                }
                routes::error_response(&e)
            }
        };
        cors::apply(&mut response, &decision);

        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await
}

async fn dispatch(state: &AppState, req: Request<Bytes>) -> Result<Response<BoxBody>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Ok(routes::health_check(state)),
        (&Method::GET, ["ready"]) => Ok(routes::readiness_check(state)),

        (&Method::POST, ["api", "auth", "register"]) => {
            auth_routes::handle_register(state, req).await
        }
        (&Method::POST, ["api", "auth", "login"]) => auth_routes::handle_login(state, req).await,

        // Matched before /:id so "search" is never taken for an id
        (&Method::GET, ["api", "movies", "search"]) => movies::handle_search(state, req).await,
        (&Method::GET, ["api", "movies"]) => movies::handle_list(state).await,
        (&Method::POST, ["api", "movies"]) => movies::handle_create(state, req).await,
        (&Method::GET, ["api", "movies", id]) => movies::handle_get(state, id).await,
        (&Method::PUT, ["api", "movies", id]) => movies::handle_update(state, id, req).await,
        (&Method::DELETE, ["api", "movies", id]) => movies::handle_delete(state, id).await,

        (&Method::GET, ["api", "users", "me", "favorites"]) => {
            favorites::handle_list(state, req).await
        }
        (&Method::POST, ["api", "users", "me", "favorites"]) => {
            favorites::handle_add(state, req).await
        }
        (&Method::DELETE, ["api", "users", "me", "favorites", movie_id]) => {
            favorites::handle_remove(state, movie_id, req).await
        }

        _ => Err(MarqueeError::NotFound(format!(
            "Route {} {} not found",
            method, path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryMovieRepository, MemoryUserRepository};
    use crate::db::ConnectionState;
    use async_trait::async_trait;
    use clap::Parser;
    use http_body_util::{BodyExt, Full};
    use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_TYPE};
    use hyper::StatusCode;
    use serde_json::{json, Value};

    const SECRET: &str = "test-secret-that-is-at-least-32-characters-long";

    struct FakeSearch;

    #[async_trait]
    impl MovieSearch for FakeSearch {
        async fn search(&self, query: &str) -> Result<Vec<Value>> {
            Ok(vec![json!({ "id": 27205, "title": query })])
        }
    }

    struct Harness {
        state: Arc<AppState>,
        users: Arc<MemoryUserRepository>,
    }

    fn harness() -> Harness {
        let args = Args::try_parse_from([
            "marquee",
            "--mongo-uri",
            "mongodb://localhost:27017",
            "--jwt-secret",
            SECRET,
            "--hash-work-factor",
            "1",
            "--cors-origins",
            "https://app.example",
            "--app-env",
            "test",
        ])
        .unwrap();

        let users = Arc::new(MemoryUserRepository::default());
        let events = EventSink::new();
        events.set_state(ConnectionState::Connected);

        let state = AppState::new(
            args,
            users.clone(),
            Arc::new(MemoryMovieRepository::default()),
            Arc::new(FakeSearch),
            events,
        )
        .unwrap();

        Harness {
            state: Arc::new(state),
            users,
        }
    }

    async fn call(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(v.to_string())
            }
            None => Bytes::new(),
        };
        let req = builder.body(Full::new(body)).unwrap();

        let response = route(Arc::clone(state), req).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(state: &Arc<AppState>, name: &str, email: &str, password: &str) -> (StatusCode, Value) {
        call(
            state,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": name, "email": email, "password": password })),
        )
        .await
    }

    #[tokio::test]
    async fn test_register_login_search_flow() {
        let h = harness();

        let (status, body) = register(&h.state, "Bob", "bob@example.com", "secret1").await;
        assert_eq!(status, StatusCode::CREATED);
        let claims = h.state.tokens.verify(body["token"].as_str().unwrap()).unwrap();

        let (status, body) = call(
            &h.state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "bob@example.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(h.state.tokens.verify(&token).unwrap().sub, claims.sub);

        let (status, body) = call(&h.state, Method::GET, "/api/movies/search?query=Inception", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, body) = call(
            &h.state,
            Method::GET,
            "/api/movies/search?query=Inception",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["title"], "Inception");
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let h = harness();

        let (status, _) = register(&h.state, "Ann", "ann@example.com", "first-pass").await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = register(&h.state, "Imposter", " ANN@example.com ", "other-pass").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Email already in use");

        assert_eq!(h.users.len().await, 1);
        let stored = h.state.users.find_by_email("ann@example.com").await.unwrap().unwrap();
        assert_eq!(stored.name, "Ann");
        assert!(h.state.hasher.verify("first-pass", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let h = harness();
        register(&h.state, "Cy", "cy@example.com", "right-pass").await;

        let (status, body) = call(
            &h.state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "cy@example.com", "password": "wrong-pass" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("token").is_none());
        assert_eq!(body["error"], "Invalid credentials");

        let (status, _) = call(
            &h.state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "whatever" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_validation_errors() {
        let h = harness();
        let (status, body) = register(&h.state, "", "not-an-email", "123").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 3);
        assert_eq!(h.users.len().await, 0);
    }

    #[tokio::test]
    async fn test_movie_crud() {
        let h = harness();

        let (status, created) = call(
            &h.state,
            Method::POST,
            "/api/movies",
            None,
            Some(json!({ "title": "Inception", "year": 2010, "rating": 8.8 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["_id"].as_str().unwrap().to_string();
        assert_eq!(created["description"], "");

        let (status, _) = call(&h.state, Method::POST, "/api/movies", None, Some(json!({ "year": 1999 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, updated) = call(
            &h.state,
            Method::PUT,
            &format!("/api/movies/{}", id),
            None,
            Some(json!({ "rating": 9.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["rating"], 9.0);
        assert_eq!(updated["title"], "Inception");

        let (status, list) = call(&h.state, Method::GET, "/api/movies", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = call(&h.state, Method::DELETE, &format!("/api/movies/{}", id), None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&h.state, Method::GET, &format!("/api/movies/{}", id), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Movie not found");

        let (status, _) = call(&h.state, Method::GET, "/api/movies/not-an-object-id", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let h = harness();
        let token = h.state.tokens.issue("64b7f0c2a1b2c3d4e5f60718").unwrap().token;
        let (status, _) = call(&h.state, Method::GET, "/api/movies/search?query=%20", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_favorites() {
        let h = harness();
        let (_, body) = register(&h.state, "Dee", "dee@example.com", "secret1").await;
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = call(&h.state, Method::GET, "/api/users/me/favorites", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        for _ in 0..2 {
            let (status, body) = call(
                &h.state,
                Method::POST,
                "/api/users/me/favorites",
                Some(&token),
                Some(json!({ "movieId": 27205 })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["favorites"], json!(["27205"]));
        }

        let (status, body) = call(
            &h.state,
            Method::DELETE,
            "/api/users/me/favorites/27205",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["favorites"], json!([]));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let h = harness();
        let token = h
            .state
            .tokens
            .issue_with_ttl("64b7f0c2a1b2c3d4e5f60718", Duration::ZERO)
            .unwrap()
            .token;
        let (status, body) = call(&h.state, Method::GET, "/api/users/me/favorites", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_cors() {
        let h = harness();

        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .header(ORIGIN, "https://app.example")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = route(Arc::clone(&h.state), req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");

        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .header(ORIGIN, "https://evil.example")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = route(Arc::clone(&h.state), req).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/movies")
            .header(ORIGIN, "https://app.example")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = route(Arc::clone(&h.state), req).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let h = harness();
        let (status, body) = call(&h.state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "connected");

        let (status, _) = call(&h.state, Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);

        h.state.connection.emit(crate::db::ConnectionEvent::Disconnected);
        let (status, body) = call(&h.state, Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let h = harness();
        let (status, body) = call(&h.state, Method::GET, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }
}
