table! {
    books (id) {
        id -> Uuid,
        author_id -> Uuid,
        name -> Text,
        is_approved -> Bool,
        is_completed -> Bool,
        is_subscription_eligible -> Bool,
        created_at -> Timestamptz,
    }
}

table! {
    chapters (id) {
        id -> Uuid,
        book_id -> Uuid,
        chapter_no -> Int4,
        title -> Text,
        content -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    library (user_id, book_id) {
        user_id -> Uuid,
        book_id -> Uuid,
        created_at -> Timestamptz,
    }
}

table! {
    notifications (id) {
        id -> Int8,
        user_id -> Uuid,
        book_id -> Uuid,
        message -> Text,
        created_at -> Timestamptz,
    }
}

joinable!(chapters -> books (book_id));
joinable!(library -> books (book_id));
joinable!(notifications -> books (book_id));

allow_tables_to_appear_in_same_query!(
    books,
    chapters,
    library,
    notifications,
);
