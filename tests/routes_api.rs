#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use askboard::repo::inmem::InMemRepo;
use askboard::{config, AppState, Forum, SecurityHeaders};
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn state() -> AppState {
    let mut state = AppState::new(Forum::new(Arc::new(InMemRepo::ephemeral())));
    state.admin_usernames = Arc::new(vec!["admin".to_string()]);
    state
}

fn score(v: &Value) -> String {
    format!("{} | {}", v["score"]["up"], v["score"]["down"])
}

/// Send a request and decode the JSON body (Null when empty).
macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status().as_u16();
        let body: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap_or(Value::Null);
        (status, body)
    }};
}

/// Register and log in, returning a bearer header value.
macro_rules! signup {
    ($app:expr, $name:expr) => {{
        let (status, _) = call!(
            $app,
            test::TestRequest::post()
                .uri("/api/v1/auth/register")
                .set_json(&json!({"username": $name, "password": "password123"}))
        );
        assert_eq!(status, 201, "register {}", $name);
        let (status, body) = call!(
            $app,
            test::TestRequest::post()
                .uri("/api/v1/auth/login")
                .set_json(&json!({"username": $name, "password": "password123"}))
        );
        assert_eq!(status, 200, "login {}", $name);
        format!("Bearer {}", body["token"].as_str().unwrap())
    }};
}

#[actix_web::test]
#[serial]
async fn question_answer_comment_and_vote_flow() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(web::Data::new(state()))
            .configure(config),
    )
    .await;

    let admin = signup!(app, "admin");
    let alice = signup!(app, "alice");
    let bob = signup!(app, "bob");
    let carol = signup!(app, "carol");

    // tag setup (admin only)
    let (status, tag) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/tags").insert_header(("Authorization", admin.clone())).set_json(&json!({"name": "Rust"}))
    );
    assert_eq!(status, 201);
    assert_eq!(tag["slug"], "rust");

    // list questions empty
    let (status, list) = call!(app, test::TestRequest::get().uri("/api/v1/questions"));
    assert_eq!(status, 200);
    assert_eq!(list.as_array().unwrap().len(), 0);

    let (status, q) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "How do lifetimes work?", "text": "Explain please", "tags": ["rust"]}))
    );
    assert_eq!(status, 201);
    assert_eq!(q["slug"], "how-do-lifetimes-work");
    assert_eq!(q["tags"], json!(["rust"]));
    let qid = q["id"].as_i64().unwrap();

    let (status, a) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/questions/{qid}/answers"))
            .insert_header(("Authorization", bob.clone()))
            .set_json(&json!({"text": "They are scopes for borrows."}))
    );
    assert_eq!(status, 201);
    assert_eq!(a["kind"], "answer");
    assert_eq!(a["parent_id"], qid);
    let aid = a["id"].as_i64().unwrap();

    let (status, c) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/content/{aid}/comments"))
            .insert_header(("Authorization", carol.clone()))
            .set_json(&json!({"text": "Nice one"}))
    );
    assert_eq!(status, 201);
    let cid = c["id"].as_i64().unwrap();

    // comments cannot nest
    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/content/{cid}/comments"))
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"text": "Reply"}))
    );
    assert_eq!(status, 422);
    assert!(body["fields"]["parent"].is_array());

    // the vote sequence on the answer
    let vote = |token: &str, dir: &str| {
        test::TestRequest::post()
            .uri(&format!("/api/v1/content/{aid}/vote/{dir}"))
            .insert_header(("Authorization", token.to_string()))
    };
    let (_, v) = call!(app, vote(&bob, "up"));
    assert_eq!(score(&v), "1 | 0");
    assert_eq!(v["user_vote"], 1);
    let (_, v) = call!(app, vote(&carol, "up"));
    assert_eq!(score(&v), "2 | 0");
    let (_, v) = call!(app, vote(&bob, "down"));
    assert_eq!(score(&v), "1 | 1");
    assert_eq!(v["user_vote"], -1);
    let (_, v) = call!(app, vote(&carol, "down"));
    assert_eq!(score(&v), "0 | 2");
    assert_eq!(v["score"]["points"], -2);
    // same direction again withdraws the vote
    let (status, v) = call!(app, vote(&carol, "down"));
    assert_eq!(status, 200);
    assert_eq!(score(&v), "0 | 1");
    assert!(v["user_vote"].is_null());

    // detail via slugged url, annotated for bob
    let (status, detail) = call!(
        app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/questions/{qid}/how-do-lifetimes-work"))
            .insert_header(("Authorization", bob.clone()))
    );
    assert_eq!(status, 200);
    assert_eq!(detail["question"]["views"], 1);
    assert_eq!(detail["answers"].as_array().unwrap().len(), 1);
    assert_eq!(detail["answers"][0]["answer"]["user_vote"], -1);
    assert_eq!(detail["answers"][0]["comments"][0]["id"], cid);

    // tag page lists the question
    let (status, t) = call!(app, test::TestRequest::get().uri("/api/v1/tags/rust"));
    assert_eq!(status, 200);
    assert_eq!(t["questions"][0]["id"], qid);

    // profile lists alice's question
    let (status, p) = call!(app, test::TestRequest::get().uri("/api/v1/users/alice"));
    assert_eq!(status, 200);
    assert_eq!(p["user"]["username"], "alice");
    assert!(p["user"].get("password_hash").is_none());
    assert_eq!(p["questions"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
#[serial]
async fn vote_requires_authentication() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let alice = signup!(app, "alice");
    let (_, q) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "Anyone there?"}))
    );
    let qid = q["id"].as_i64().unwrap();

    let (status, _) = call!(app, test::TestRequest::post().uri(&format!("/api/v1/content/{qid}/vote/up")));
    assert_eq!(status, 401);
    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/content/{qid}/vote/up"))
            .insert_header(("Authorization", "Bearer garbage"))
    );
    assert_eq!(status, 401);

    // score untouched
    let (_, detail) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")));
    assert_eq!(detail["question"]["up"], 0);
    assert!(detail["question"]["user_vote"].is_null());
}

#[actix_web::test]
#[serial]
async fn validation_errors_are_reported_per_field() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let alice = signup!(app, "alice");

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "Not a question", "tags": ["nope"]}))
    );
    assert_eq!(status, 422);
    assert_eq!(body["error"], "validation");
    assert_eq!(body["fields"]["title"][0], "That is not a question.");
    assert_eq!(body["fields"]["tags"][0], "Unknown tag: nope");

    let (_, q) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "Valid?"}))
    );
    let qid = q["id"].as_i64().unwrap();
    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/questions/{qid}/answers"))
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"text": "   "}))
    );
    assert_eq!(status, 422);
    assert_eq!(body["fields"]["text"][0], "This field is required.");

    let (status, body) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/auth/register").set_json(&json!({"username": "x y", "password": "short"}))
    );
    assert_eq!(status, 422);
    assert!(body["fields"]["username"].is_array());
    assert!(body["fields"]["password"].is_array());
}

#[actix_web::test]
#[serial]
async fn only_the_asker_accepts_and_only_once() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let alice = signup!(app, "alice");
    let bob = signup!(app, "bob");

    let (_, q) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "Which one?"}))
    );
    let qid = q["id"].as_i64().unwrap();
    let mut answers = Vec::new();
    for text in ["first", "second"] {
        let (_, a) = call!(
            app,
            test::TestRequest::post()
                .uri(&format!("/api/v1/questions/{qid}/answers"))
                .insert_header(("Authorization", bob.clone()))
                .set_json(&json!({ "text": text }))
        );
        answers.push(a["id"].as_i64().unwrap());
    }
    let accept = |token: &str, id: i64, action: &str| {
        test::TestRequest::post()
            .uri(&format!("/api/v1/answers/{id}/{action}"))
            .insert_header(("Authorization", token.to_string()))
    };

    let (status, _) = call!(app, accept(&bob, answers[0], "accept"));
    assert_eq!(status, 403);

    let (status, a) = call!(app, accept(&alice, answers[0], "accept"));
    assert_eq!(status, 200);
    assert_eq!(a["is_accepted"], true);

    let (status, body) = call!(app, accept(&alice, answers[1], "accept"));
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("more than one accepted answer"));

    let (_, list) = call!(app, test::TestRequest::get().uri("/api/v1/questions?filter=without_accepted_answer"));
    assert_eq!(list.as_array().unwrap().len(), 0);

    let (status, _) = call!(app, accept(&alice, answers[0], "unaccept"));
    assert_eq!(status, 200);
    let (status, _) = call!(app, accept(&alice, answers[1], "accept"));
    assert_eq!(status, 200);

    // questions cannot be accepted
    let (status, _) = call!(app, accept(&alice, qid, "accept"));
    assert_eq!(status, 422);
}

#[actix_web::test]
#[serial]
async fn hidden_and_deleted_content_is_not_found_for_others() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let admin = signup!(app, "admin");
    let alice = signup!(app, "alice");
    let bob = signup!(app, "bob");

    let (_, q) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "Secret?"}))
    );
    let qid = q["id"].as_i64().unwrap();

    // only the owner may hide
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/content/{qid}/hide")).insert_header(("Authorization", bob.clone()))
    );
    assert_eq!(status, 404);
    let (status, hidden) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/content/{qid}/hide")).insert_header(("Authorization", alice.clone()))
    );
    assert_eq!(status, 200);
    assert_eq!(hidden["is_hidden"], true);

    let (status, _) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")).insert_header(("Authorization", bob.clone())));
    assert_eq!(status, 404);
    let (status, _) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")).insert_header(("Authorization", alice.clone())));
    assert_eq!(status, 200);
    let (_, list) = call!(app, test::TestRequest::get().uri("/api/v1/questions"));
    assert_eq!(list.as_array().unwrap().len(), 0);
    let (_, list) = call!(app, test::TestRequest::get().uri("/api/v1/questions").insert_header(("Authorization", alice.clone())));
    assert_eq!(list.as_array().unwrap().len(), 1);

    // voting on invisible content looks like a missing item
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/content/{qid}/vote/up")).insert_header(("Authorization", bob.clone()))
    );
    assert_eq!(status, 404);

    call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/content/{qid}/unhide")).insert_header(("Authorization", alice.clone()))
    );

    // moderation is admin only
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/admin/content/{qid}/delete")).insert_header(("Authorization", bob.clone()))
    );
    assert_eq!(status, 403);
    let (status, deleted) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/admin/content/{qid}/delete")).insert_header(("Authorization", admin.clone()))
    );
    assert_eq!(status, 200);
    assert_eq!(deleted["is_deleted"], true);
    let (status, _) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")));
    assert_eq!(status, 404);

    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/api/v1/admin/content/{qid}/restore")).insert_header(("Authorization", admin.clone()))
    );
    assert_eq!(status, 200);
    let (status, _) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")));
    assert_eq!(status, 200);
}

#[actix_web::test]
#[serial]
async fn auth_endpoints() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let admin = signup!(app, "admin");
    let alice = signup!(app, "alice");

    let (status, _) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/auth/register").set_json(&json!({"username": "alice", "password": "password123"}))
    );
    assert_eq!(status, 409);

    let (status, _) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/auth/login").set_json(&json!({"username": "alice", "password": "wrong-password"}))
    );
    assert_eq!(status, 401);
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/auth/login").set_json(&json!({"username": "nobody", "password": "password123"}))
    );
    assert_eq!(status, 401);

    let (status, me) = call!(app, test::TestRequest::get().uri("/api/v1/auth/me").insert_header(("Authorization", alice.clone())));
    assert_eq!(status, 200);
    assert_eq!(me["username"], "alice");
    assert_eq!(me["role"], "user");
    let (_, me) = call!(app, test::TestRequest::get().uri("/api/v1/auth/me").insert_header(("Authorization", admin.clone())));
    assert_eq!(me["role"], "admin");
    let (status, _) = call!(app, test::TestRequest::get().uri("/api/v1/auth/me"));
    assert_eq!(status, 401);

    let (status, _) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/tags").insert_header(("Authorization", alice.clone())).set_json(&json!({"name": "go"}))
    );
    assert_eq!(status, 403);
    call!(
        app,
        test::TestRequest::post().uri("/api/v1/tags").insert_header(("Authorization", admin.clone())).set_json(&json!({"name": "go"}))
    );
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri("/api/v1/tags").insert_header(("Authorization", admin.clone())).set_json(&json!({"name": "Go"}))
    );
    assert_eq!(status, 409);

    let (_, users) = call!(app, test::TestRequest::get().uri("/api/v1/users"));
    assert_eq!(users.as_array().unwrap().len(), 2);
}

#[actix_web::test]
#[serial]
async fn question_slugged_answers_is_still_readable() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let alice = signup!(app, "alice");

    let (status, q) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/v1/questions")
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"title": "Answers?"}))
    );
    assert_eq!(status, 201);
    assert_eq!(q["slug"], "answers");
    let qid = q["id"].as_i64().unwrap();

    let (status, detail) = call!(app, test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}/answers")));
    assert_eq!(status, 200);
    assert_eq!(detail["question"]["id"], qid);

    // posting to the same path still answers
    let (status, a) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/questions/{qid}/answers"))
            .insert_header(("Authorization", alice.clone()))
            .set_json(&json!({"text": "Self answer"}))
    );
    assert_eq!(status, 201);
    assert_eq!(a["parent_id"], qid);
}

#[actix_web::test]
#[serial]
async fn tag_names_without_an_ascii_slug_are_rejected() {
    setup_env();
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;
    let admin = signup!(app, "admin");

    for name in ["日本", "中文"] {
        let (status, body) = call!(
            app,
            test::TestRequest::post().uri("/api/v1/tags").insert_header(("Authorization", admin.clone())).set_json(&json!({ "name": name }))
        );
        assert_eq!(status, 422, "{name}");
        assert_eq!(body["fields"]["name"][0], "A tag has only letters or numbers.");
    }
    let (_, tags) = call!(app, test::TestRequest::get().uri("/api/v1/tags"));
    assert_eq!(tags.as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn openapi_documents_moderation_endpoints() {
    use askboard::openapi::ApiDoc;
    use utoipa::OpenApi;

    let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
    for path in [
        "/api/v1/answers/{id}/unaccept",
        "/api/v1/content/{id}/hide",
        "/api/v1/content/{id}/unhide",
        "/api/v1/admin/content/{id}/delete",
        "/api/v1/admin/content/{id}/restore",
    ] {
        assert!(doc["paths"][path]["post"].is_object(), "{path} missing from ApiDoc");
    }
}
