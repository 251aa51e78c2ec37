use serde_json::json;

use crate::helpers::{anna, spawn_app, spawn_app_with, SmtpBehaviour};

#[tokio::test]
async fn anna_receives_her_registered_message_on_demand() {
    let app = spawn_app().await;
    let id = app.register(&anna()).await;

    let image = app.get_tracking_image(&id).await;
    assert_eq!(200, image.status().as_u16());

    let mut body = anna();
    body["id"] = json!(id);
    let response = app.post_send_mail(&body).await;

    assert_eq!(200, response.status().as_u16());
    assert_eq!(response.text().await.unwrap(), "message sent");

    let sessions = app.smtp.sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert!(session.has_command("MAIL FROM:<greetings@example.com>"));
    assert!(session.has_command("RCPT TO:<anna@example.com>"));
    assert_eq!(session.commands.last().map(String::as_str), Some("QUIT"));
    assert!(session.data.contains("Content-Type: multipart/mixed; boundary="));
    assert!(session.data.is_ascii());
    let html = session.html_body();
    assert!(html.contains("Anna"));
    assert!(html.contains(&format!("/{id}\"")));
}

#[tokio::test]
async fn an_unregistered_recipient_still_gets_a_message() {
    let app = spawn_app().await;
    let body = json!({
        "email": "vera@example.com",
        "firstname": "Vera",
        "lastname": "Smirnova",
    });

    let response = app.post_send_mail(&body).await;

    assert_eq!(200, response.status().as_u16());
    let sessions = app.smtp.sessions();
    assert!(sessions[0].has_command("RCPT TO:<vera@example.com>"));
    assert!(sessions[0].html_body().contains("Vera"));

    // nothing was registered along the way
    let response = app.delete_subscriber(&[("email", "vera@example.com")]).await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn every_send_uses_its_own_boundary() {
    let app = spawn_app().await;
    let id = app.register(&anna()).await;
    let mut body = anna();
    body["id"] = json!(id);

    app.post_send_mail(&body).await;
    app.post_send_mail(&body).await;

    let boundaries: Vec<String> = app
        .smtp
        .sessions()
        .iter()
        .map(|s| {
            let start = s.data.find("boundary=\"").unwrap() + "boundary=\"".len();
            let end = start + s.data[start..].find('"').unwrap();
            s.data[start..end].to_string()
        })
        .collect();
    assert_eq!(boundaries.len(), 2);
    assert_ne!(boundaries[0], boundaries[1]);
}

#[tokio::test]
async fn send_mail_returns_a_500_when_the_recipient_is_rejected() {
    let app = spawn_app_with(SmtpBehaviour::RejectRecipients).await;

    let response = app.post_send_mail(&anna()).await;

    assert_eq!(500, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn send_mail_returns_a_400_for_invalid_data() {
    let app = spawn_app().await;
    let test_cases = vec![
        (json!({"email": "nope", "firstname": "Anna", "lastname": "Ivanova"}), "invalid email"),
        (json!({"id": "42", "email": "anna@example.com", "firstname": "Anna", "lastname": "Ivanova"}), "malformed identifier"),
        (json!({"birth_day": "yesterday", "email": "anna@example.com", "firstname": "Anna", "lastname": "Ivanova"}), "malformed birth day"),
    ];

    for (body, description) in test_cases {
        let response = app.post_send_mail(&body).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload had a {}.",
            description
        );
    }
    assert!(app.smtp.sessions().is_empty());
}

#[tokio::test]
async fn cyrillic_names_travel_as_seven_bit_data() {
    let app = spawn_app().await;
    let body = json!({
        "email": "olga@example.com",
        "firstname": "Ольга",
        "lastname": "Петрова",
    });

    let response = app.post_send_mail(&body).await;

    assert_eq!(200, response.status().as_u16());
    let sessions = app.smtp.sessions();
    assert!(sessions[0].data.is_ascii());
    assert!(sessions[0].data.lines().all(|line| line.len() <= 998));
    assert!(sessions[0].html_body().contains("Ольга Петрова"));
}
