// Ticketflow schema - workflow tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    tickets (id) {
        id -> Integer,
        external_code -> Text,
        title -> Text,
        description -> Nullable<Text>,
        status -> Text,
        confirmation_status -> Nullable<Text>,
        is_blocking -> Bool,
        resolution_date -> Nullable<Text>,
        is_deleted -> Bool,
        is_active -> Bool,
        owner_id -> Text,
        last_modified_by -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    audit_actions (id) {
        id -> Integer,
        ticket_id -> Integer,
        kind -> Text,
        from_status -> Nullable<Text>,
        to_status -> Nullable<Text>,
        notes -> Nullable<Text>,
        performed_by -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    comments (id) {
        id -> Integer,
        ticket_id -> Integer,
        body -> Text,
        author_id -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    pauses (id) {
        id -> Integer,
        ticket_id -> Integer,
        paused_at -> Text,
        resumed_at -> Nullable<Text>,
        reason -> Text,
        resume_notes -> Nullable<Text>,
        paused_by -> Text,
        resumed_by -> Nullable<Text>,
    }
}

// ============================================================================
// Progress Requests
// ============================================================================

diesel::table! {
    progress_requests (id) {
        id -> Integer,
        ticket_id -> Integer,
        requested_by -> Text,
        target_id -> Text,
        message -> Text,
        requested_at -> Text,
        due_date -> Nullable<Text>,
        current_progress -> Nullable<Text>,
        current_percentage -> Integer,
        current_eta -> Nullable<Text>,
        responded -> Bool,
        responded_at -> Nullable<Text>,
        responded_by -> Nullable<Text>,
        status -> Text,
        cancelled_at -> Nullable<Text>,
        cancelled_by -> Nullable<Text>,
    }
}

diesel::table! {
    progress_updates (id) {
        id -> Integer,
        request_id -> Integer,
        updated_by -> Text,
        progress -> Text,
        percentage -> Integer,
        estimated_completion -> Nullable<Text>,
        created_at -> Text,
    }
}

// ============================================================================
// Notifications
// ============================================================================

diesel::table! {
    notifications (id) {
        id -> Integer,
        kind -> Text,
        priority -> Text,
        ticket_id -> Nullable<Integer>,
        progress_request_id -> Nullable<Integer>,
        title -> Text,
        message -> Text,
        created_by -> Text,
        target_user_id -> Nullable<Text>,
        target_role -> Nullable<Text>,
        is_global -> Bool,
        requires_action -> Bool,
        is_resolved -> Bool,
        resolved_at -> Nullable<Text>,
        resolved_by -> Nullable<Text>,
        created_at -> Text,
        expires_at -> Nullable<Text>,
    }
}

diesel::table! {
    notification_reads (notification_id, user_id) {
        notification_id -> Integer,
        user_id -> Text,
        read_at -> Text,
        channel -> Text,
    }
}

diesel::table! {
    notification_actions (id) {
        id -> Integer,
        notification_id -> Integer,
        user_id -> Text,
        action_type -> Text,
        notes -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::joinable!(audit_actions -> tickets (ticket_id));
diesel::joinable!(comments -> tickets (ticket_id));
diesel::joinable!(pauses -> tickets (ticket_id));
diesel::joinable!(progress_requests -> tickets (ticket_id));
diesel::joinable!(progress_updates -> progress_requests (request_id));
diesel::joinable!(notification_reads -> notifications (notification_id));
diesel::joinable!(notification_actions -> notifications (notification_id));

diesel::allow_tables_to_appear_in_same_query!(
    tickets,
    audit_actions,
    comments,
    pauses,
    progress_requests,
    progress_updates,
    notifications,
    notification_reads,
    notification_actions,
);
