mod common;

use serde_json::{json, Value};
use uuid::Uuid;
use warp::http::StatusCode;

use chapter_notify::controllers::routes;

use common::*;

fn library_path(book_id: impl std::fmt::Display) -> String {
    format!("/api/v1/library/{}", book_id)
}

#[tokio::test]
async fn added_book_feeds_later_uploads() {
    let app = TestApp::spawn();
    let seed = seed(&app.store);
    let filter = routes(app.ctx.clone());
    let reader = Uuid::new_v4();

    let added = warp::test::request()
        .method("POST")
        .path(&library_path(seed.b3))
        .header("cookie", cookie_for(reader, false))
        .reply(&filter)
        .await;
    assert_eq!(added.status(), StatusCode::CREATED);
    assert_eq!(&added.body()[..], b"{}");

    let again = warp::test::request()
        .method("POST")
        .path(&library_path(seed.b3))
        .header("cookie", cookie_for(reader, false))
        .reply(&filter)
        .await;
    assert_eq!(again.status(), StatusCode::CREATED);

    warp::test::request()
        .method("POST")
        .path(&chapters_path(seed.b3))
        .header("cookie", cookie_for(seed.a3, false))
        .json(&chapter_body(1))
        .reply(&filter)
        .await;
    drain(&app.worker(), &mut app.publisher.queue()).await;

    let listed = warp::test::request()
        .method("GET")
        .path("/api/v1/notifications")
        .header("cookie", cookie_for(reader, false))
        .reply(&filter)
        .await;
    assert_eq!(listed.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(listed.body()).unwrap();
    let notifications = body.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["bookId"], json!(seed.b3.to_string()));
    assert_eq!(notifications[0]["message"], json!("Nightfall chapter 1"));
    assert!(notifications[0].get("userId").is_none());
}

#[tokio::test]
async fn removed_book_stops_notifications() {
    let app = TestApp::spawn();
    let seed = seed(&app.store);
    let filter = routes(app.ctx.clone());
    let remove = || {
        warp::test::request()
            .method("DELETE")
            .path(&library_path(seed.b1))
            .header("cookie", cookie_for(seed.u1, false))
    };

    let removed = remove().reply(&filter).await;
    assert_eq!(removed.status(), StatusCode::OK);
    let missing = remove().reply(&filter).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        serde_json::from_slice::<Value>(missing.body()).unwrap(),
        json!({ "error": "library entry not found" })
    );

    warp::test::request()
        .method("POST")
        .path(&chapters_path(seed.b1))
        .header("cookie", cookie_for(seed.a1, false))
        .json(&chapter_body(1))
        .reply(&filter)
        .await;
    drain(&app.worker(), &mut app.publisher.queue()).await;

    let recipients: Vec<_> = app
        .store
        .notifications_for_book(seed.b1)
        .into_iter()
        .map(|n| n.user_id)
        .collect();
    assert_eq!(recipients, vec![seed.u2]);
}

#[tokio::test]
async fn adding_unknown_book_is_book_not_found() {
    let app = TestApp::spawn();
    seed(&app.store);

    let response = warp::test::request()
        .method("POST")
        .path(&library_path(Uuid::new_v4()))
        .header("cookie", cookie_for(Uuid::new_v4(), false))
        .reply(&routes(app.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn library_and_notifications_require_a_cookie() {
    let app = TestApp::spawn();
    let seed = seed(&app.store);
    let filter = routes(app.ctx.clone());

    let add = warp::test::request()
        .method("POST")
        .path(&library_path(seed.b1))
        .reply(&filter)
        .await;
    assert_eq!(add.status(), StatusCode::UNAUTHORIZED);

    let list = warp::test::request()
        .method("GET")
        .path("/api/v1/notifications")
        .reply(&filter)
        .await;
    assert_eq!(list.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_reports_connection_counts() {
    let app = TestApp::spawn();

    let response = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&routes(app.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        serde_json::from_slice::<Value>(response.body()).unwrap(),
        json!({ "status": "ok", "connections": { "admins": 0, "users": 0 } })
    );
}

#[tokio::test]
async fn unknown_route_is_json_not_found() {
    let app = TestApp::spawn();

    let response = warp::test::request()
        .method("GET")
        .path("/api/v1/nowhere")
        .reply(&routes(app.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        serde_json::from_slice::<Value>(response.body()).unwrap(),
        json!({ "error": "not found" })
    );
}
