use serde_json::json;
use uuid::Uuid;

use crate::helpers::{anna, spawn_app};

#[tokio::test]
async fn new_sub_returns_a_fresh_identifier_for_valid_data() {
    let app = spawn_app().await;

    let response = app.post_new_subscriber(&anna()).await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    let id = body["id"].as_str().expect("Missing id in response.");
    assert!(Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn new_sub_accepts_a_birth_time() {
    let app = spawn_app().await;
    let body = json!({
        "birth_day": "1990-12-31T23:45:00Z",
        "email": "boris@example.com",
        "firstname": "Boris",
        "lastname": "Petrov",
    });

    let response = app.post_new_subscriber(&body).await;

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn new_sub_returns_a_409_for_an_already_registered_email() {
    let app = spawn_app().await;
    app.register(&anna()).await;

    let mut again = anna();
    again["firstname"] = json!("Anya");
    let response = app.post_new_subscriber(&again).await;

    assert_eq!(409, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("anna@example.com"));
}

#[tokio::test]
async fn new_sub_returns_a_400_when_data_is_invalid() {
    let app = spawn_app().await;
    let test_cases = vec![
        (json!({"birth_day": "2024-05-10", "email": "not-an-email", "firstname": "Anna", "lastname": "Ivanova"}), "invalid email"),
        (json!({"birth_day": "2024-05-10", "email": "anna@example.com", "firstname": "", "lastname": "Ivanova"}), "empty first name"),
        (json!({"birth_day": "2024-05-10", "email": "anna@example.com", "firstname": "Anna", "lastname": "<script>"}), "forbidden characters"),
        (json!({"birth_day": "10/05/2024", "email": "anna@example.com", "firstname": "Anna", "lastname": "Ivanova"}), "unsupported date format"),
        (json!({"birth_day": "2023-02-29", "email": "anna@example.com", "firstname": "Anna", "lastname": "Ivanova"}), "impossible date"),
        (json!({"email": "anna@example.com", "firstname": "Anna", "lastname": "Ivanova"}), "missing birth day"),
    ];

    for (body, description) in test_cases {
        let response = app.post_new_subscriber(&body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload had an {}.",
            description
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn delete_sub_by_identifier_removes_the_subscriber() {
    let app = spawn_app().await;
    let id = app.register(&anna()).await;

    let response = app.delete_subscriber(&[("uid", &id)]).await;
    assert_eq!(200, response.status().as_u16());

    let response = app.delete_subscriber(&[("uid", &id)]).await;
    assert_eq!(404, response.status().as_u16());

    // the email is free again
    let response = app.post_new_subscriber(&anna()).await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn delete_sub_falls_back_to_the_email() {
    let app = spawn_app().await;
    let id = app.register(&anna()).await;

    let unknown = Uuid::new_v4().to_string();
    let response = app
        .delete_subscriber(&[("uid", &unknown), ("email", "anna@example.com")])
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"].as_str(), Some(id.as_str()));
    assert_eq!(404, app.get_tracking_image(&id).await.status().as_u16());
}

#[tokio::test]
async fn delete_sub_of_an_unknown_subscriber_is_a_404() {
    let app = spawn_app().await;

    let response = app
        .delete_subscriber(&[("email", "nobody@example.com")])
        .await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn delete_sub_without_a_reference_is_a_400() {
    let app = spawn_app().await;

    let response = app.delete_subscriber(&[]).await;
    assert_eq!(400, response.status().as_u16());

    let response = app.delete_subscriber(&[("uid", "42")]).await;
    assert_eq!(400, response.status().as_u16());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_each_get_their_own_identifier() {
    let app = spawn_app().await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let client = app.api_client.clone();
            let url = format!("{}/v1/newSub", app.address);
            tokio::spawn(async move {
                let body = json!({
                    "birth_day": "1999-07-01",
                    "email": format!("guest{i}@example.com"),
                    "firstname": "Guest",
                    "lastname": "Visitor",
                });
                let response = client.post(url).json(&body).send().await.unwrap();
                assert_eq!(200, response.status().as_u16());
                let body: serde_json::Value = response.json().await.unwrap();
                body["id"].as_str().unwrap().to_string()
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
}
