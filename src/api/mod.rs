pub mod auth;
pub mod events;
pub mod requests;
pub mod stats;
pub mod store;
pub mod users;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sqlx::SqlitePool;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::Config;
use crate::responses::meta_middleware;

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The database pool.
    pub pool: SqlitePool,
    /// The application configuration.
    pub config: Config,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/register", post(auth::register))
        .route(
            "/admin/registration-requests",
            get(auth::list_registration_requests).post(auth::process_registration_request),
        )
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/role", put(users::change_role))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{id}/password", put(users::change_password))
        .route("/users/{id}/points", post(users::update_points))
        .route("/store", get(store::list_items).post(store::create_item))
        .route(
            "/store/{id}",
            put(store::update_item).delete(store::delete_item),
        )
        .route(
            "/requests",
            get(requests::list_requests).post(requests::submit_request),
        )
        .route(
            "/requests/{id}",
            get(requests::get_request).put(requests::process_request),
        )
        .route(
            "/events",
            get(events::list_events).post(events::create_event),
        )
        .route(
            "/events/{id}",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/events/{id}/join", post(events::join_event))
        .route(
            "/events/{id}/participants",
            get(events::list_participants)
                .post(events::add_participant)
                .patch(events::set_attendance),
        )
        .route("/leaderboard", get(stats::leaderboard))
        .route("/student/stats", get(stats::student_stats))
        .route("/student/classroom", get(stats::student_classroom))
        .route("/tutor/profile", get(stats::tutor_profile))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}
