mod common;

use common::*;
use tutorhub::error::ApiError;
use tutorhub::models::Role;
use tutorhub::points::{self, PointsAction};

#[tokio::test]
async fn add_subtract_set_semantics() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let tutor_claims = claims_for(&tutor);

    let updated = points::adjust_points(&pool, &tutor_claims, &student.id, 30, PointsAction::Add)
        .await
        .unwrap();
    assert_eq!(updated.points, 30);

    let updated =
        points::adjust_points(&pool, &tutor_claims, &student.id, 10, PointsAction::Subtract)
            .await
            .unwrap();
    assert_eq!(updated.points, 20);

    let updated = points::adjust_points(&pool, &tutor_claims, &student.id, 50, PointsAction::Set)
        .await
        .unwrap();
    assert_eq!(updated.points, 50);

    let ledger = ledger_rows(&pool, &student.id).await;
    assert_eq!(
        ledger,
        vec![
            (30, "AWARD".to_string()),
            (10, "REDEEM".to_string()),
            (30, "AWARD".to_string()), // set 20 -> 50 is a 30-point award
        ]
    );
}

/// Subtraction floors at zero and the ledger row records the points that
/// actually moved, so the ledger stays consistent with the balance.
#[tokio::test]
async fn subtract_floors_at_zero_with_delta_sized_ledger_row() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 25, PointsAction::Add)
        .await
        .unwrap();
    let updated =
        points::adjust_points(&pool, &tutor_claims, &student.id, 100, PointsAction::Subtract)
            .await
            .unwrap();

    assert_eq!(updated.points, 0);
    let ledger = ledger_rows(&pool, &student.id).await;
    assert_eq!(ledger[1], (25, "REDEEM".to_string()));
    assert_eq!(
        points::ledger_balance(&pool, &student.id).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn set_to_current_value_appends_nothing() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 40, PointsAction::Add)
        .await
        .unwrap();
    points::adjust_points(&pool, &tutor_claims, &student.id, 40, PointsAction::Set)
        .await
        .unwrap();

    assert_eq!(ledger_rows(&pool, &student.id).await.len(), 1);
}

#[tokio::test]
async fn set_downward_records_a_redeem() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 80, PointsAction::Add)
        .await
        .unwrap();
    let updated = points::adjust_points(&pool, &tutor_claims, &student.id, 30, PointsAction::Set)
        .await
        .unwrap();

    assert_eq!(updated.points, 30);
    let ledger = ledger_rows(&pool, &student.id).await;
    assert_eq!(ledger[1], (50, "REDEEM".to_string()));
}

#[tokio::test]
async fn tutor_cannot_touch_another_tutors_student() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let other = insert_user(&pool, "tutor.b", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.c", Role::Student, Some(&tutor.id), 0).await;

    let err = points::adjust_points(&pool, &claims_for(&other), &student.id, 10, PointsAction::Add)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert_eq!(user_points(&pool, &student.id).await, 0);
    assert!(ledger_rows(&pool, &student.id).await.is_empty());

    // Admin has no such restriction.
    let admin = insert_user(&pool, "admin", Role::Admin, None, 0).await;
    points::adjust_points(&pool, &claims_for(&admin), &student.id, 10, PointsAction::Add)
        .await
        .expect("admin adjusts");
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let pool = test_pool().await;
    let admin = insert_user(&pool, "admin", Role::Admin, None, 0).await;

    let err = points::adjust_points(&pool, &claims_for(&admin), "nope", 10, PointsAction::Add)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

/// Balance never goes negative through any sequence of operations, and the
/// cached balance tracks the ledger throughout.
#[tokio::test]
async fn balance_stays_non_negative_and_ledger_consistent() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let tutor_claims = claims_for(&tutor);

    let steps = [
        (PointsAction::Add, 15),
        (PointsAction::Subtract, 40),
        (PointsAction::Add, 5),
        (PointsAction::Set, 0),
        (PointsAction::Add, 70),
        (PointsAction::Subtract, 70),
        (PointsAction::Set, 12),
    ];
    for (action, amount) in steps {
        let updated = points::adjust_points(&pool, &tutor_claims, &student.id, amount, action)
            .await
            .unwrap();
        assert!(updated.points >= 0);
        assert_eq!(
            points::ledger_balance(&pool, &student.id).await.unwrap(),
            updated.points
        );
    }
    assert_eq!(user_points(&pool, &student.id).await, 12);
}

#[tokio::test]
async fn total_earned_ignores_redemptions() {
    let pool = test_pool().await;
    let tutor = insert_user(&pool, "tutor.a", Role::Tutor, None, 0).await;
    let student = insert_user(&pool, "student.b", Role::Student, Some(&tutor.id), 0).await;
    let tutor_claims = claims_for(&tutor);

    points::adjust_points(&pool, &tutor_claims, &student.id, 60, PointsAction::Add)
        .await
        .unwrap();
    points::adjust_points(&pool, &tutor_claims, &student.id, 20, PointsAction::Subtract)
        .await
        .unwrap();
    points::adjust_points(&pool, &tutor_claims, &student.id, 10, PointsAction::Add)
        .await
        .unwrap();

    assert_eq!(points::total_earned(&pool, &student.id).await.unwrap(), 70);
    assert_eq!(user_points(&pool, &student.id).await, 50);
}
