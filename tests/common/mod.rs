#![allow(dead_code)]

use std::str::FromStr;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use tutorhub::auth::Claims;
use tutorhub::db;
use tutorhub::models::{
    Event, EventScope, EventStatus, EventType, Role, StoreItem, User,
};

/// One in-memory database per test. A single connection keeps every handler
/// on the same memory store.
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("parse sqlite url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("open in-memory sqlite");
    db::migrate(&pool).await.expect("migrate");
    pool
}

pub async fn insert_user(
    pool: &SqlitePool,
    username: &str,
    role: Role,
    tutor_id: Option<&str>,
    points: i64,
) -> User {
    insert_user_with_password(pool, username, role, tutor_id, points, "").await
}

pub async fn insert_user_with_password(
    pool: &SqlitePool,
    username: &str,
    role: Role,
    tutor_id: Option<&str>,
    points: i64,
    password_hash: &str,
) -> User {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO users
           (id, username, email, password_hash, role, tutor_id, points, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(password_hash)
    .bind(role)
    .bind(tutor_id)
    .bind(points)
    .bind(Utc::now())
    .execute(pool)
    .await
    .expect("insert user");

    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .expect("fetch user")
}

pub async fn insert_item(
    pool: &SqlitePool,
    tutor_id: &str,
    name: &str,
    points_required: i64,
    available_quantity: i64,
) -> StoreItem {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO store_items
           (id, tutor_id, name, description, points_required, available_quantity, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(tutor_id)
    .bind(name)
    .bind(format!("{name} description"))
    .bind(points_required)
    .bind(available_quantity)
    .bind(Utc::now())
    .execute(pool)
    .await
    .expect("insert item");

    sqlx::query_as::<_, StoreItem>("SELECT * FROM store_items WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .expect("fetch item")
}

pub async fn insert_event(
    pool: &SqlitePool,
    created_by: &str,
    scope: EventScope,
    status: EventStatus,
    capacity: i64,
) -> Event {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO events
           (id, title, description, start_at, end_at, location, kind, capacity, points,
            status, scope, created_by, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind("Study session")
    .bind("Weekly study session")
    .bind(now)
    .bind(now)
    .bind("Online")
    .bind(EventType::Online)
    .bind(capacity)
    .bind(status)
    .bind(scope)
    .bind(created_by)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert event");

    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .expect("fetch event")
}

pub fn claims_for(user: &User) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role,
        tutor_id: user.tutor_id.clone(),
        iat: now,
        exp: now + 3600,
    }
}

pub async fn user_points(pool: &SqlitePool, id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("fetch points")
}

pub async fn item_quantity(pool: &SqlitePool, id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT available_quantity FROM store_items WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("fetch quantity")
}

pub async fn ledger_rows(pool: &SqlitePool, student_id: &str) -> Vec<(i64, String)> {
    sqlx::query_as::<_, (i64, String)>(
        "SELECT points, kind FROM points_transactions WHERE student_id = ? ORDER BY created_at",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await
    .expect("fetch ledger")
}
