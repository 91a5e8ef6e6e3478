mod common;

use common::*;
use tutorhub::error::ApiError;
use tutorhub::models::{RequestStatus, Role};
use tutorhub::points::{self, PointsAction};

/// The full happy path: award 100, request a 50-point item with one unit in
/// stock, approve, then watch a second request bounce off the empty shelf.
#[tokio::test]
async fn full_redemption_scenario() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.ayse", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.mehmet", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Chess set", 50, 1).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 100, PointsAction::Add)
        .await
        .expect("award points");
    assert_eq!(user_points(&pool, &student.id).await, 100);

    let request = points::submit_request(&pool, &student.id, &item.id, Some("please".into()))
        .await
        .expect("submit request");
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.points_spent, 50);
    assert_eq!(request.tutor_id, tutor.id);

    let approved = points::process_request(
        &pool,
        &tutor_claims,
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .expect("approve request");
    assert_eq!(approved.status, RequestStatus::Approved);

    assert_eq!(item_quantity(&pool, &item.id).await, 0);
    assert_eq!(user_points(&pool, &student.id).await, 50);

    let ledger = ledger_rows(&pool, &student.id).await;
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0], (100, "AWARD".to_string()));
    assert_eq!(ledger[1], (50, "REDEEM".to_string()));

    // The cached balance agrees with the ledger-derived one.
    let derived = points::ledger_balance(&pool, &student.id).await.unwrap();
    assert_eq!(derived, user_points(&pool, &student.id).await);

    // Shelf is empty now.
    let err = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("out of stock")));
}

#[tokio::test]
async fn points_spent_snapshots_price_at_submission() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Sticker pack", 50, 5).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 100, PointsAction::Add)
        .await
        .unwrap();
    let request = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap();

    // Tutor raises the price while the request is pending.
    sqlx::query("UPDATE store_items SET points_required = 80 WHERE id = ?")
        .bind(&item.id)
        .execute(&pool)
        .await
        .unwrap();

    let approved = points::process_request(
        &pool,
        &tutor_claims,
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .unwrap();

    // Charged the price at submission time, not the new one.
    assert_eq!(approved.points_spent, 50);
    assert_eq!(user_points(&pool, &student.id).await, 50);
}

#[tokio::test]
async fn reprocessing_is_a_conflict_and_mutates_nothing() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Notebook", 30, 3).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 90, PointsAction::Add)
        .await
        .unwrap();
    let request = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap();
    points::process_request(
        &pool,
        &tutor_claims,
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .unwrap();

    let quantity_after = item_quantity(&pool, &item.id).await;
    let points_after = user_points(&pool, &student.id).await;

    for target in [RequestStatus::Approved, RequestStatus::Rejected] {
        let err =
            points::process_request(&pool, &tutor_claims, &request.id, target, None)
                .await
                .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    assert_eq!(item_quantity(&pool, &item.id).await, quantity_after);
    assert_eq!(user_points(&pool, &student.id).await, points_after);
    assert_eq!(ledger_rows(&pool, &student.id).await.len(), 2);
}

#[tokio::test]
async fn rejection_changes_neither_stock_nor_balance() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Puzzle", 40, 2).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 60, PointsAction::Add)
        .await
        .unwrap();
    let request = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap();

    let rejected = points::process_request(
        &pool,
        &tutor_claims,
        &request.id,
        RequestStatus::Rejected,
        Some("not this week".into()),
    )
    .await
    .unwrap();

    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.note, "not this week");
    assert_eq!(item_quantity(&pool, &item.id).await, 2);
    assert_eq!(user_points(&pool, &student.id).await, 60);
    // Only the original award is on the ledger.
    assert_eq!(ledger_rows(&pool, &student.id).await.len(), 1);
}

/// Balance is re-validated at approval time; a failed re-check rolls the
/// whole transaction back, leaving the request PENDING.
#[tokio::test]
async fn approval_rechecks_balance_and_rolls_back() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Headphones", 50, 1).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 50, PointsAction::Add)
        .await
        .unwrap();
    let request = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap();

    // Balance drops below the snapshot before the tutor gets to it.
    points::adjust_points(&pool, &tutor_claims, &student.id, 20, PointsAction::Subtract)
        .await
        .unwrap();

    let err = points::process_request(
        &pool,
        &tutor_claims,
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("no longer has enough")));

    // Rollback: still pending, stock untouched, no REDEEM row.
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM item_requests WHERE id = ?")
        .bind(&request.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "PENDING");
    assert_eq!(item_quantity(&pool, &item.id).await, 1);

    // Top the student back up and the same request approves cleanly.
    points::adjust_points(&pool, &tutor_claims, &student.id, 20, PointsAction::Add)
        .await
        .unwrap();
    points::process_request(
        &pool,
        &tutor_claims,
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .expect("approve after top-up");
    assert_eq!(item_quantity(&pool, &item.id).await, 0);
}

#[tokio::test]
async fn approval_rechecks_stock_across_competing_requests() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let first = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let second = insert_user(&pool, "student.c", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Board game", 50, 1).await;
    let tutor_claims = claims_for(&tutor);

    for student in [&first, &second] {
        points::adjust_points(&pool, &tutor_claims, &student.id, 100, PointsAction::Add)
            .await
            .unwrap();
    }

    // Both requests pass the submission-time stock check.
    let req_a = points::submit_request(&pool, &first.id, &item.id, None)
        .await
        .unwrap();
    let req_b = points::submit_request(&pool, &second.id, &item.id, None)
        .await
        .unwrap();

    points::process_request(&pool, &tutor_claims, &req_a.id, RequestStatus::Approved, None)
        .await
        .expect("first approval wins the unit");

    let err =
        points::process_request(&pool, &tutor_claims, &req_b.id, RequestStatus::Approved, None)
            .await
            .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("out of stock")));

    // The loser is untouched and its student keeps their balance.
    assert_eq!(user_points(&pool, &second.id).await, 100);
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM item_requests WHERE id = ?")
        .bind(&req_b.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "PENDING");
}

#[tokio::test]
async fn wrong_tutor_cannot_process() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let other = insert_user(&pool, "tutor.b", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.c", Role::Student, Some(&tutor.id), 0).await;
    let item = insert_item(&pool, &tutor.id, "Mug", 10, 1).await;

    points::adjust_points(&pool, &claims_for(&tutor), &student.id, 50, PointsAction::Add)
        .await
        .unwrap();
    let request = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap();

    let err = points::process_request(
        &pool,
        &claims_for(&other),
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    // Admin is not bound by the tutor assignment.
    let admin = insert_user(&pool, "admin", Role::Admin, None, 0).await;
    points::process_request(
        &pool,
        &claims_for(&admin),
        &request.id,
        RequestStatus::Approved,
        None,
    )
    .await
    .expect("admin approves");
}

#[tokio::test]
async fn submission_preconditions() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let orphan = insert_user(&pool, "student.orphan", Role::Student, None, 100).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 10).await;
    let item = insert_item(&pool, &tutor.id, "Poster", 50, 1).await;

    let err = points::submit_request(&pool, &orphan.id, &item.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("assigned tutor")));

    let err = points::submit_request(&pool, &student.id, "no-such-item", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let err = points::submit_request(&pool, &student.id, &item.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("Not enough points")));

    // Nothing was written along the way.
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM item_requests")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
