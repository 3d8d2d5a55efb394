//! Telegram client against a wiremock Bot API.

use std::time::Duration;

use claude_relay::chat::{Button, ChatTransport, Keyboard, ParseMode};
use claude_relay::telegram::{TelegramClient, TelegramError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "123:abc";

fn client(server: &MockServer) -> TelegramClient {
    TelegramClient::new(&server.uri(), TOKEN).unwrap()
}

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
}

#[tokio::test]
async fn send_message_posts_html_with_keyboard() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .and(body_partial_json(json!({
            "chat_id": "42",
            "text": "<b>hi</b>",
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [[{ "text": "1", "callback_data": "reply:1" }]] }
        })))
        .respond_with(ok(json!({ "message_id": 77, "chat": { "id": 42 } })))
        .expect(1)
        .mount(&server)
        .await;

    let kb = Keyboard::rows(vec![Button::new("1", "reply:1")], 4);
    let id = client(&server)
        .send_message("42", "<b>hi</b>", ParseMode::Html, Some(&kb))
        .await
        .unwrap();
    assert_eq!(id, 77);
}

#[tokio::test]
async fn api_errors_carry_the_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/sendMessage")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: can't parse entities"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .send_message("42", "<b>broken", ParseMode::Html, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't parse entities"), "{err}");
}

#[tokio::test]
async fn get_updates_parses_messages_and_callbacks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/getUpdates")))
        .and(body_partial_json(json!({ "offset": 10, "timeout": 0 })))
        .respond_with(ok(json!([
            { "update_id": 10, "message": { "message_id": 1, "chat": { "id": 42 }, "text": "hello" } },
            { "update_id": 11, "callback_query": { "id": "cb", "data": "perm:allow",
                "message": { "message_id": 2, "chat": { "id": 42 } } } }
        ])))
        .mount(&server)
        .await;

    let updates = client(&server).get_updates(10, 0).await.unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].update_id, 10);
    assert!(updates[1].callback_query.is_some());
}

#[tokio::test]
async fn set_webhook_retries_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/setWebhook")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: bad webhook: Failed to resolve host"
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/setWebhook")))
        .and(body_partial_json(json!({
            "url": "https://x.trycloudflare.com/webhook",
            "secret_token": "s3cret"
        })))
        .respond_with(ok(json!(true)))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .set_webhook_with_retry(
            "https://x.trycloudflare.com/webhook",
            Some("s3cret"),
            3,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn set_webhook_gives_up_after_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{TOKEN}/setWebhook")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: bad webhook"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server)
        .set_webhook_with_retry("https://x/webhook", None, 2, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, TelegramError::Api { ref method, .. } if method == "setWebhook"));
}

#[tokio::test]
async fn edit_delete_and_answer_hit_their_methods() {
    let server = MockServer::start().await;
    for (name, result) in [
        ("editMessageText", json!({ "message_id": 5, "chat": { "id": 42 } })),
        ("deleteMessage", json!(true)),
        ("answerCallbackQuery", json!(true)),
        ("deleteWebhook", json!(true)),
    ] {
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/{name}")))
            .respond_with(ok(result))
            .expect(1)
            .mount(&server)
            .await;
    }

    let c = client(&server);
    c.edit_message("42", 5, "new", ParseMode::Html).await.unwrap();
    c.delete_message("42", 5).await.unwrap();
    c.answer_callback("cb").await.unwrap();
    c.delete_webhook().await.unwrap();
}
