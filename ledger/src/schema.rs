diesel::table! {
    venues (id) {
        id -> Uuid,
        name -> Varchar,
        address -> Varchar,
        city -> Varchar,
        state -> Varchar,
        zip -> Varchar,
        capacity -> Int4,
        description -> Nullable<Text>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    events (id) {
        id -> Uuid,
        venue_id -> Nullable<Uuid>,
        name -> Varchar,
        description -> Nullable<Text>,
        event_type -> Varchar,
        start_date -> Timestamptz,
        end_date -> Timestamptz,
        status -> Varchar,
        image_url -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        event_id -> Uuid,
        ticket_type -> Varchar,
        price -> Numeric,
        status -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    payment_intents (reference) {
        reference -> Varchar,
        event_id -> Uuid,
        ticket_ids -> Array<Uuid>,
        amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(events -> venues (venue_id));
diesel::joinable!(tickets -> events (event_id));

diesel::allow_tables_to_appear_in_same_query!(venues, events, tickets, payment_intents);
