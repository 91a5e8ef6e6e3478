//! Per-operation authorization decisions.
//!
//! Every guarded operation gets one function here returning a typed
//! [`Decision`] instead of ad hoc role booleans scattered through handlers.

use crate::auth::Claims;
use crate::error::ApiError;
use crate::models::{Event, EventScope, ItemRequest, Role, StoreItem, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    /// Converts a denial into the Forbidden arm of the error taxonomy.
    pub fn require(self) -> Result<(), ApiError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(ApiError::Forbidden(reason.to_string())),
        }
    }
}

/// Admins process anything; tutors only requests denormalized onto them.
pub fn process_request(actor: &Claims, request: &ItemRequest) -> Decision {
    match actor.role {
        Role::Admin => Decision::Allow,
        Role::Tutor if request.tutor_id == actor.sub => Decision::Allow,
        Role::Tutor => Decision::Deny("This request belongs to another tutor"),
        Role::Student => Decision::Deny("Only admin or tutor can update requests"),
    }
}

pub fn view_request(actor: &Claims, request: &ItemRequest) -> Decision {
    if actor.role.is_admin()
        || (actor.role.is_tutor() && request.tutor_id == actor.sub)
        || request.student_id == actor.sub
    {
        Decision::Allow
    } else {
        Decision::Deny("Not allowed to view this request")
    }
}

/// Tutors may only move points of students assigned to them.
pub fn adjust_points(actor: &Claims, target: &User) -> Decision {
    match actor.role {
        Role::Admin => Decision::Allow,
        Role::Tutor
            if target.role.is_student() && target.tutor_id.as_deref() == Some(actor.sub.as_str()) =>
        {
            Decision::Allow
        }
        Role::Tutor => Decision::Deny("You can only modify points for your own students"),
        Role::Student => Decision::Deny("Only admin or tutor can modify points"),
    }
}

/// The scope an actor's events get, or None when they may not create any.
pub fn event_scope_for(actor: &Claims) -> Option<EventScope> {
    match actor.role {
        Role::Admin => Some(EventScope::Global),
        Role::Tutor => Some(EventScope::Group),
        Role::Student => None,
    }
}

/// GLOBAL events are admin-managed; GROUP events belong to their creator.
pub fn manage_event(actor: &Claims, event: &Event) -> Decision {
    match event.scope {
        EventScope::Global if actor.role.is_admin() => Decision::Allow,
        EventScope::Global => Decision::Deny("Only admin can manage global events"),
        EventScope::Group if actor.role.is_admin() || event.created_by == actor.sub => {
            Decision::Allow
        }
        EventScope::Group => Decision::Deny("You can only manage your own group events"),
    }
}

/// Roster changes (adding participants, marking attendance) are owner-only.
pub fn manage_roster(actor: &Claims, event: &Event) -> Decision {
    if actor.role.is_tutor() && event.created_by == actor.sub {
        Decision::Allow
    } else if actor.role.is_admin() && event.created_by == actor.sub {
        Decision::Allow
    } else {
        Decision::Deny("Only the event owner can manage participants")
    }
}

pub fn view_roster(actor: &Claims, event: &Event, is_participant: bool) -> Decision {
    if actor.role.is_admin() || event.created_by == actor.sub || is_participant {
        Decision::Allow
    } else {
        Decision::Deny("Not allowed to view this event's participants")
    }
}

pub fn manage_store_item(actor: &Claims, item: &StoreItem) -> Decision {
    match actor.role {
        Role::Admin => Decision::Allow,
        Role::Tutor if item.tutor_id == actor.sub => Decision::Allow,
        _ => Decision::Deny("You can only manage items in your own store"),
    }
}

pub fn view_user(actor: &Claims, target: &User) -> Decision {
    if actor.role.is_admin()
        || actor.sub == target.id
        || (actor.role.is_tutor() && target.tutor_id.as_deref() == Some(actor.sub.as_str()))
    {
        Decision::Allow
    } else {
        Decision::Deny("Not allowed to view this user")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{EventStatus, EventType, RequestStatus};

    fn claims(id: &str, role: Role) -> Claims {
        Claims {
            sub: id.into(),
            username: format!("user-{id}"),
            email: format!("{id}@example.com"),
            role,
            tutor_id: None,
            iat: 0,
            exp: i64::MAX,
        }
    }

    fn request_for(tutor: &str, student: &str) -> ItemRequest {
        ItemRequest {
            id: "r-1".into(),
            student_id: student.into(),
            tutor_id: tutor.into(),
            item_id: "i-1".into(),
            status: RequestStatus::Pending,
            points_spent: 10,
            note: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn student(id: &str, tutor: &str) -> User {
        User {
            id: id.into(),
            username: id.into(),
            email: format!("{id}@example.com"),
            password_hash: String::new(),
            role: Role::Student,
            first_name: None,
            last_name: None,
            tutor_id: Some(tutor.into()),
            points: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tutor_processes_only_own_requests() {
        let req = request_for("t-1", "s-1");
        assert!(process_request(&claims("t-1", Role::Tutor), &req).is_allowed());
        assert!(!process_request(&claims("t-2", Role::Tutor), &req).is_allowed());
        assert!(process_request(&claims("a-1", Role::Admin), &req).is_allowed());
        assert!(!process_request(&claims("s-1", Role::Student), &req).is_allowed());
    }

    #[test]
    fn student_views_own_request_only() {
        let req = request_for("t-1", "s-1");
        assert!(view_request(&claims("s-1", Role::Student), &req).is_allowed());
        assert!(!view_request(&claims("s-2", Role::Student), &req).is_allowed());
    }

    #[test]
    fn points_adjustment_is_scoped_to_own_students() {
        let target = student("s-1", "t-1");
        assert!(adjust_points(&claims("t-1", Role::Tutor), &target).is_allowed());
        assert!(!adjust_points(&claims("t-2", Role::Tutor), &target).is_allowed());
        assert!(adjust_points(&claims("a-1", Role::Admin), &target).is_allowed());
    }

    #[test]
    fn event_scopes_follow_roles() {
        assert_eq!(
            event_scope_for(&claims("a-1", Role::Admin)),
            Some(EventScope::Global)
        );
        assert_eq!(
            event_scope_for(&claims("t-1", Role::Tutor)),
            Some(EventScope::Group)
        );
        assert_eq!(event_scope_for(&claims("s-1", Role::Student)), None);
    }

    #[test]
    fn group_events_are_creator_or_admin_managed() {
        let event = Event {
            id: "e-1".into(),
            title: "Chess night".into(),
            description: String::new(),
            start_at: Utc::now(),
            end_at: Utc::now(),
            location: "Online".into(),
            kind: EventType::Online,
            capacity: 10,
            points: 0,
            status: EventStatus::Upcoming,
            scope: EventScope::Group,
            created_by: "t-1".into(),
            created_at: Utc::now(),
        };
        assert!(manage_event(&claims("t-1", Role::Tutor), &event).is_allowed());
        assert!(!manage_event(&claims("t-2", Role::Tutor), &event).is_allowed());
        assert!(manage_event(&claims("a-1", Role::Admin), &event).is_allowed());
        assert!(manage_roster(&claims("t-1", Role::Tutor), &event).is_allowed());
        assert!(!manage_roster(&claims("a-1", Role::Admin), &event).is_allowed());
    }
}
