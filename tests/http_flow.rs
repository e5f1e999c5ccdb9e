use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use ulid::Ulid;

use lessonbook::clock::{BusinessZone, ManualClock};
use lessonbook::engine::{Engine, InMemoryStore, Stores};
use lessonbook::http::{self, AppState, SIGNATURE_HEADER};
use lessonbook::model::LessonCatalog;
use lessonbook::notify::NotifyHub;
use lessonbook::profiles::InMemoryProfiles;
use lessonbook::webhook::{sign_payload, StripeSignatureVerifier, WebhookProcessor};

const SECRET: &str = "whsec_integration";
/// 2030-01-07 is a Monday.
const MONDAY: &str = "2030-01-07";

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    base: String,
    clock: Arc<ManualClock>,
    profiles: Arc<InMemoryProfiles>,
    client: reqwest::Client,
}

async fn start_test_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let zone = BusinessZone::pacific_standard();
    let clock = Arc::new(ManualClock::new(
        zone.instant(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(), 12 * 60),
    ));
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(Engine::new(
        Stores::in_memory(store),
        LessonCatalog::standard(),
        zone,
        clock.clone(),
    ));
    let profiles = Arc::new(InMemoryProfiles::new());
    let webhooks = Arc::new(WebhookProcessor::new(
        engine.clone(),
        Arc::new(StripeSignatureVerifier::new(Some(SECRET.into()))),
        profiles.clone(),
        Arc::new(NotifyHub::new()),
    ));

    let state = AppState::new(engine, webhooks);
    tokio::spawn(async move {
        let _ = http::serve(listener, state, std::future::pending()).await;
    });

    TestServer {
        base: format!("http://{addr}"),
        clock,
        profiles,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn open_mondays(&self) {
        let resp = self
            .client
            .put(self.url("/api/admin/availability"))
            .json(&json!({ "slots": [{ "dayOfWeek": 1, "startTime": "09:00", "endTime": "17:00" }] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    async fn slots(&self, lesson_type: &str) -> Vec<String> {
        let body: Value = self
            .client
            .get(self.url("/api/slots"))
            .query(&[("date", MONDAY), ("lessonType", lesson_type)])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        serde_json::from_value(body["slots"].clone()).unwrap()
    }

    async fn book(&self, time: &str, lesson_type: &str, session: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/bookings"))
            .json(&json!({
                "preferredDate": MONDAY,
                "preferredTime": time,
                "lessonType": lesson_type,
                "parent": {
                    "firstName": "Maya",
                    "lastName": "Ortiz",
                    "email": "maya@example.com",
                    "phone": "555-0199"
                },
                "athletes": [{ "name": "Leo Ortiz", "dateOfBirth": "2016-04-02" }],
                "externalSessionId": session
            }))
            .send()
            .await
            .unwrap()
    }

    async fn webhook(&self, body: &Value, secret: &str) -> reqwest::Response {
        let raw = serde_json::to_vec(body).unwrap();
        let now_secs = lessonbook::clock::Clock::now_ms(self.clock.as_ref()) / 1000;
        let signature = sign_payload(secret, now_secs, &raw).unwrap();
        self.client
            .post(self.url("/api/stripe/webhook"))
            .header(SIGNATURE_HEADER, signature)
            .header("content-type", "application/json")
            .body(raw)
            .send()
            .await
            .unwrap()
    }
}

fn completed_event(session: &str, booking_id: &str) -> Value {
    json!({
        "id": format!("evt_{}", Ulid::new()),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session,
            "amount_total": 6000,
            "payment_status": "paid",
            "metadata": { "booking_id": booking_id }
        }}
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn checkout_flow_end_to_end() {
    let server = start_test_server().await;
    server.open_mondays().await;

    let slots = server.slots("deep-dive").await;
    assert_eq!(slots.first().map(String::as_str), Some("09:00"));
    assert_eq!(slots.last().map(String::as_str), Some("16:00"));

    // Checkout starts: hold the slot for session cs_1.
    let hold = server
        .client
        .post(server.url("/api/holds"))
        .json(&json!({ "date": MONDAY, "time": "10:00", "lessonType": "deep-dive", "sessionId": "cs_1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(hold.status(), 201);
    assert!(!server.slots("quick-journey").await.contains(&"10:30".to_string()));

    let rival = server
        .client
        .post(server.url("/api/holds"))
        .json(&json!({ "date": MONDAY, "time": "10:30", "lessonType": "quick-journey", "sessionId": "cs_2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(rival.status(), 409);

    // The holding session books through its own hold.
    let created = server.book("10:00", "deep-dive", "cs_1").await;
    assert_eq!(created.status(), 201);
    let booking: Value = created.json().await.unwrap();
    assert_eq!(booking["preferredTime"], "10:00");
    assert_eq!(booking["paymentStatus"], "reservation-pending");
    assert_eq!(booking["status"], "pending");
    let id = booking["id"].as_str().unwrap().to_string();

    let event = completed_event("cs_1", &id);
    let first: Value = server.webhook(&event, SECRET).await.json().await.unwrap();
    assert_eq!(first["outcome"], "processed");
    let second: Value = server.webhook(&event, SECRET).await.json().await.unwrap();
    assert_eq!(second["outcome"], "duplicate");
    assert_eq!(server.profiles.parent_count(), 1);
    assert_eq!(server.profiles.athlete_count(), 1);

    let fetched: Value = server
        .client
        .get(server.url(&format!("/api/bookings/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["paymentStatus"], "reservation-paid");
    assert_eq!(fetched["attendanceStatus"], "confirmed");
    assert_eq!(fetched["status"], "confirmed");
    assert_eq!(fetched["paidAmount"], 6000);
}

#[tokio::test]
async fn forged_webhook_is_rejected_without_side_effects() {
    let server = start_test_server().await;
    server.open_mondays().await;
    let booking: Value = server.book("11:00", "quick-journey", "cs_f").await.json().await.unwrap();
    let id = booking["id"].as_str().unwrap().to_string();

    let resp = server.webhook(&completed_event("cs_f", &id), "whsec_forged").await;
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "SIGNATURE_VERIFICATION_FAILED");

    let unsigned = server
        .client
        .post(server.url("/api/stripe/webhook"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status(), 400);
    assert_eq!(server.profiles.parent_count(), 0);

    // Unknown event types are acknowledged.
    let other = json!({ "id": "evt_x", "type": "reporting.report_run.succeeded", "data": { "object": {} } });
    let ack: Value = server.webhook(&other, SECRET).await.json().await.unwrap();
    assert_eq!(ack["outcome"], "ignored");
}

#[tokio::test]
async fn error_mapping() {
    let server = start_test_server().await;
    server.open_mondays().await;

    let bad_date = server
        .client
        .get(server.url("/api/slots"))
        .query(&[("date", "2030-13-40"), ("lessonType", "deep-dive")])
        .send()
        .await
        .unwrap();
    assert_eq!(bad_date.status(), 400);

    let unknown_lesson = server
        .client
        .get(server.url("/api/slots"))
        .query(&[("date", MONDAY), ("lessonType", "yoga")])
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_lesson.status(), 400);
    let err: Value = unknown_lesson.json().await.unwrap();
    assert_eq!(err["code"], "VALIDATION_ERROR");

    let missing = server
        .client
        .get(server.url(&format!("/api/bookings/{}", Ulid::new())))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    assert_eq!(server.book("10:00", "quick-journey", "cs_a").await.status(), 201);
    let taken = server.book("10:00", "deep-dive", "cs_b").await;
    assert_eq!(taken.status(), 409);
    let err: Value = taken.json().await.unwrap();
    assert_eq!(err["message"], "slot no longer available: Time slot already booked");

    let booking: Value = server.book("14:00", "quick-journey", "cs_c").await.json().await.unwrap();
    let id = booking["id"].as_str().unwrap();
    let empty = server
        .client
        .post(server.url(&format!("/api/admin/bookings/{id}/status")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 422);

    let bad_status = server
        .client
        .post(server.url(&format!("/api/admin/bookings/{id}/status")))
        .json(&json!({ "paymentStatus": "paid-ish" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_status.status(), 400);
}

#[tokio::test]
async fn admin_override_and_exceptions() {
    let server = start_test_server().await;
    server.open_mondays().await;

    let resp = server
        .client
        .post(server.url("/api/admin/exceptions"))
        .json(&json!({ "date": MONDAY, "startTime": "12:00", "endTime": "13:00", "reason": "Lunch" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let verdict: Value = server
        .client
        .post(server.url("/api/slots/validate"))
        .json(&json!({ "date": MONDAY, "time": "12:30", "durationMinutes": 30 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(verdict, json!({ "available": false, "reason": "Lunch" }));

    let slots = server.slots("quick-journey").await;
    assert!(slots.contains(&"11:30".to_string()));
    assert!(!slots.contains(&"12:00".to_string()));
    assert!(slots.contains(&"13:00".to_string()));

    let booking: Value = server.book("15:00", "quick-journey", "cs_o").await.json().await.unwrap();
    let id = booking["id"].as_str().unwrap();
    let overridden: Value = server
        .client
        .post(server.url(&format!("/api/admin/bookings/{id}/status")))
        .json(&json!({ "paymentStatus": "session-paid", "attendanceStatus": "no-show" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overridden["changed"], true);
    assert_eq!(overridden["booking"]["attendanceStatus"], "no-show");
    assert_eq!(overridden["booking"]["status"], "completed");

    let released = server
        .client
        .delete(server.url("/api/holds"))
        .json(&json!({ "date": MONDAY, "time": "09:00", "sessionId": "cs_nobody" }))
        .send()
        .await
        .unwrap();
    assert_eq!(released.status(), 404);
}
