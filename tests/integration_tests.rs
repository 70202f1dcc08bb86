use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use mechanic_dispatch::config::AppConfig;
use mechanic_dispatch::db::{self, queries};
use mechanic_dispatch::handlers;
use mechanic_dispatch::models::{Actor, Booking, BookingStatus, GeoPoint, ServiceKind};
use mechanic_dispatch::services::messaging::MessagingProvider;
use mechanic_dispatch::services::payments::{PaymentLink, PaymentProvider, PaymentRequest};
use mechanic_dispatch::services::sessions::SessionStore;
use mechanic_dispatch::services::{directory, ledger};
use mechanic_dispatch::state::AppState;

// ── Mock Providers ──

type Outbox = Arc<Mutex<Vec<(String, String, Option<String>)>>>;

struct MockMessaging {
    sent: Outbox,
}

#[async_trait]
impl MessagingProvider for MockMessaging {
    async fn send_message(&self, to: &str, body: &str, media_url: Option<&str>) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string(), media_url.map(str::to_string)));
        Ok(())
    }
}

struct MockPayments {
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl PaymentProvider for MockPayments {
    async fn create_link(&self, request: &PaymentRequest) -> anyhow::Result<PaymentLink> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("payment gateway unavailable");
        }
        Ok(PaymentLink {
            reference: format!("plink_{}", request.booking_id),
            url: format!("https://pay.test/l/{}", request.booking_id),
            qr_image_url: Some(format!("https://qr.test/{}.png", request.booking_id)),
        })
    }
}

// ── Helpers ──

const REQUESTER: &str = "whatsapp:+919800000001";
const HERE: GeoPoint = GeoPoint {
    latitude: 12.9716,
    longitude: 77.5946,
};

struct TestApp {
    state: Arc<AppState>,
    sent: Outbox,
    payments_failing: Arc<AtomicBool>,
}

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        base_url: "http://localhost:3000".to_string(),
        twilio_account_sid: "".to_string(),
        twilio_auth_token: "".to_string(), // empty = skip signature validation
        twilio_phone_number: "whatsapp:+15551234567".to_string(),
        razorpay_key_id: "".to_string(),
        razorpay_key_secret: "".to_string(),
        admin_upi_id: "platform@upi".to_string(),
        session_timeout_minutes: 30,
    }
}

fn test_app_with_sessions(sessions: SessionStore) -> TestApp {
    let conn = db::init_db(":memory:").unwrap();
    let sent: Outbox = Arc::new(Mutex::new(vec![]));
    let payments_failing = Arc::new(AtomicBool::new(false));

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: test_config(),
        messaging: Box::new(MockMessaging { sent: Arc::clone(&sent) }),
        payments: Box::new(MockPayments {
            failing: Arc::clone(&payments_failing),
        }),
        sessions: Arc::new(sessions),
    });

    TestApp {
        state,
        sent,
        payments_failing,
    }
}

fn test_app() -> TestApp {
    test_app_with_sessions(SessionStore::default())
}

fn form_body(params: &[(&str, &str)]) -> String {
    reqwest::Url::parse_with_params("http://localhost/", params)
        .unwrap()
        .query()
        .unwrap_or("")
        .to_string()
}

impl TestApp {
    async fn post_form(&self, params: &[(&str, &str)]) -> Response {
        handlers::router(Arc::clone(&self.state))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/whatsapp/webhook")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form_body(params)))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Sends a text message and returns the reply the sender received.
    async fn say(&self, from: &str, body: &str) -> String {
        let response = self
            .post_form(&[("From", from), ("To", "whatsapp:+15551234567"), ("Body", body)])
            .await;
        assert_eq!(response.status(), StatusCode::OK, "webhook failed for {from}: {body}");
        self.last_to(from).expect("no reply sent")
    }

    async fn share_location(&self, from: &str, point: GeoPoint) -> String {
        let lat = point.latitude.to_string();
        let lon = point.longitude.to_string();
        let response = self
            .post_form(&[
                ("From", from),
                ("To", "whatsapp:+15551234567"),
                ("Body", ""),
                ("Latitude", &lat),
                ("Longitude", &lon),
            ])
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        self.last_to(from).expect("no reply sent")
    }

    async fn get(&self, uri: &str) -> Response {
        handlers::router(Arc::clone(&self.state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn messages_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _, _)| to == phone)
            .map(|(_, body, _)| body.clone())
            .collect()
    }

    fn last_to(&self, phone: &str) -> Option<String> {
        self.messages_to(phone).pop()
    }

    fn count_to(&self, phone: &str, needle: &str) -> usize {
        self.messages_to(phone).iter().filter(|m| m.contains(needle)).count()
    }

    fn provider(&self, n: usize, point: GeoPoint) -> Actor {
        let db = self.state.db();
        directory::register_provider(
            &db,
            &format!("whatsapp:+91990000{n:04}"),
            &format!("Mechanic {n}"),
            point,
            &format!("mechanic{n}@upi"),
        )
        .unwrap()
    }

    fn actor(&self, id: &str) -> Actor {
        let db = self.state.db();
        queries::get_actor_by_id(&db, id).unwrap().unwrap()
    }

    fn booking(&self, id: &str) -> Booking {
        let db = self.state.db();
        queries::get_booking_by_id(&db, id).unwrap().unwrap()
    }

    fn active_booking_of_requester(&self) -> Option<Booking> {
        self.active_booking_of(REQUESTER)
    }

    fn active_booking_of(&self, phone: &str) -> Option<Booking> {
        let db = self.state.db();
        let requester = queries::get_actor_by_phone(&db, phone).unwrap()?;
        queries::get_active_booking_for_requester(&db, &requester.id).unwrap()
    }

    /// Walks a new requester through the menu up to dispatch.
    async fn request_service(&self) -> String {
        self.request_service_as(REQUESTER, "Asha").await
    }

    async fn request_service_as(&self, phone: &str, name: &str) -> String {
        assert!(self.say(phone, "hi").await.starts_with("Welcome to Mechanic Booking"));
        assert_eq!(self.say(phone, "2").await, "What is your name?");
        assert!(self.say(phone, name).await.starts_with("What kind of service"));
        assert!(self.say(phone, "1").await.starts_with("Flat tire will cost you ₹300."));
        assert!(self.say(phone, "yes").await.starts_with("Please share your current location"));
        self.share_location(phone, HERE).await
    }

    /// A booking already paid for and in progress, bypassing the chat.
    fn paid_booking(&self, provider: &Actor) -> Booking {
        let db = self.state.db();
        let requester = match queries::get_actor_by_phone(&db, REQUESTER).unwrap() {
            Some(actor) => actor,
            None => directory::register_requester(&db, REQUESTER, "Asha").unwrap(),
        };
        let booking = ledger::open_booking(&db, &requester, ServiceKind::OilLeak, 300, HERE).unwrap();
        queries::insert_offers(&db, &booking.id, &[provider.id.clone()]).unwrap();
        assert!(queries::assign_provider(&db, &booking.id, &provider.id).unwrap());
        assert!(queries::set_payment_pending(&db, &booking.id, "plink", "https://pay.test/l").unwrap());
        assert!(queries::mark_paid(&db, &booking.id, Some("pay_1")).unwrap());
        queries::get_booking_by_id(&db, &booking.id).unwrap().unwrap()
    }
}

fn near(offset: f64) -> GeoPoint {
    GeoPoint::new(HERE.latitude + offset, HERE.longitude)
}

// ── Tests ──

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_payment_success_page() {
    let app = test_app();
    let response = app.get("/payment/success").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("Payment successful"));
}

#[tokio::test]
async fn test_full_booking_lifecycle() {
    let app = test_app();
    let winner = app.provider(1, near(0.01));
    let loser = app.provider(2, near(0.02));
    let far = app.provider(3, near(0.5));

    assert_eq!(
        app.request_service().await,
        "We are looking for mechanics in your area. Please wait for confirmation."
    );

    // Only providers within range get the offer.
    let offer = "There is a repair required for Flat tire (₹300). Would you like to take it?";
    assert_eq!(app.count_to(&winner.phone, offer), 1);
    assert_eq!(app.count_to(&loser.phone, offer), 1);
    assert!(app.messages_to(&far.phone).is_empty());

    assert_eq!(
        app.say(&winner.phone, "1").await,
        "You have accepted the job. Please wait for customer payment confirmation."
    );
    let booking = app.active_booking_of_requester().unwrap();
    assert_eq!(booking.status, BookingStatus::PaymentPending);
    assert_eq!(booking.provider_id.as_deref(), Some(winner.id.as_str()));
    assert_eq!(app.actor(&winner.id).is_available, Some(false));

    let link_msg = app.last_to(REQUESTER).unwrap();
    assert!(link_msg.contains("accepted by Mechanic 1"));
    assert!(link_msg.contains(&format!("https://pay.test/l/{}", booking.id)));
    let media: Vec<Option<String>> = app
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|(to, body, _)| to == REQUESTER && body.contains("Please complete the payment"))
        .map(|(_, _, media)| media.clone())
        .collect();
    assert_eq!(media, vec![Some(format!("https://qr.test/{}.png", booking.id))]);

    assert_eq!(app.count_to(&loser.phone, "already been taken by another mechanic"), 1);
    // Already told by the broadcast; a late "yes" is not answered twice.
    assert_eq!(app.say(&loser.phone, "yes").await, "Sorry, this job is no longer available.");
    assert_eq!(app.count_to(&loser.phone, "already been taken by another mechanic"), 1);

    // Payment reminder re-sends the stored link.
    assert!(app.say(REQUESTER, "status?").await.contains("pay.test/l/"));

    let response = app
        .get(&format!(
            "/api/payment/callback?booking_id={}&razorpay_payment_link_status=paid&razorpay_payment_id=pay_42",
            booking.id
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/payment/success");
    assert_eq!(app.booking(&booking.id).status, BookingStatus::InProgress);
    assert_eq!(app.count_to(&winner.phone, "https://www.google.com/maps?q="), 1);
    assert_eq!(app.count_to(REQUESTER, "Mechanic Mechanic 1 is on the way"), 1);

    // Handshake: the code only reaches the requester.
    assert!(app.say(REQUESTER, "Reached").await.contains("Waiting for mechanic confirmation"));
    assert!(app.booking(&booking.id).otp.is_none());
    assert!(app.say(&winner.phone, "I reached").await.starts_with("Please ask the customer for the OTP"));

    let code = app.booking(&booking.id).otp.unwrap();
    assert_eq!(app.count_to(REQUESTER, &format!("Your OTP is {code}")), 1);
    assert_eq!(app.count_to(&winner.phone, &code), 0);

    // Settlement.
    assert_eq!(app.say(&winner.phone, "not-the-code").await, "Invalid OTP. Please try again.");
    assert_eq!(app.booking(&booking.id).status, BookingStatus::InProgress);

    assert!(app
        .say(&winner.phone, &format!(" {code} "))
        .await
        .starts_with("Service completed successfully! ₹249"));
    let done = app.booking(&booking.id);
    assert_eq!(done.status, BookingStatus::Completed);
    assert_eq!(done.provider_share, Some(249));
    assert_eq!(done.platform_fee, Some(51));
    assert!(done.completed_at.is_some());
    assert_eq!(app.actor(&winner.id).is_available, Some(true));
    assert_eq!(app.count_to(REQUESTER, "service has been completed successfully"), 1);

    // The code cannot complete anything twice.
    assert_eq!(app.say(&winner.phone, &code).await, "Hi! To start over, please type \"hi\"");
    assert_eq!(app.count_to(REQUESTER, "service has been completed successfully"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acceptance_has_one_winner() {
    let app = test_app();
    let providers: Vec<Actor> = (0..6).map(|n| app.provider(n, near(0.001 * n as f64))).collect();
    app.request_service().await;

    let app = Arc::new(app);
    let mut handles = Vec::new();
    for provider in &providers {
        let app = Arc::clone(&app);
        let phone = provider.phone.clone();
        handles.push(tokio::spawn(async move {
            let response = app
                .post_form(&[("From", phone.as_str()), ("To", "whatsapp:+15551234567"), ("Body", "1")])
                .await;
            response.status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let accepted: usize = providers
        .iter()
        .map(|p| app.count_to(&p.phone, "You have accepted the job"))
        .sum();
    assert_eq!(accepted, 1);

    let busy: Vec<&Actor> = providers
        .iter()
        .filter(|p| app.actor(&p.id).is_available == Some(false))
        .collect();
    assert_eq!(busy.len(), 1);

    let booking = app.active_booking_of_requester().unwrap();
    assert_eq!(booking.status, BookingStatus::PaymentPending);
    assert_eq!(booking.provider_id.as_deref(), Some(busy[0].id.as_str()));
    assert_eq!(app.count_to(REQUESTER, "Please complete the payment"), 1);

    // Every loser hears exactly once, by reply or by broadcast.
    for provider in providers.iter().filter(|p| p.id != busy[0].id) {
        assert_eq!(
            app.count_to(&provider.phone, "already been taken by another mechanic"),
            1,
            "{} should be told once",
            provider.phone
        );
    }
    assert_eq!(app.count_to(&busy[0].phone, "already been taken by another mechanic"), 0);
}

#[tokio::test]
async fn test_older_open_offer_can_still_be_accepted() {
    let app = test_app();
    let first = app.provider(1, near(0.01));
    let second = app.provider(2, near(0.02));
    let other_requester = "whatsapp:+919800000002";

    app.request_service().await;
    app.request_service_as(other_requester, "Ravi").await;
    let older = app.active_booking_of_requester().unwrap();
    let newer = app.active_booking_of(other_requester).unwrap();

    // The second provider takes the newer job; the first is told it is gone.
    assert!(app.say(&second.phone, "1").await.starts_with("You have accepted the job"));
    assert_eq!(app.booking(&newer.id).provider_id.as_deref(), Some(second.id.as_str()));
    assert_eq!(app.count_to(&first.phone, "already been taken by another mechanic"), 1);

    // The first provider's older offer is still open on a pending booking.
    assert_eq!(app.booking(&older.id).status, BookingStatus::Pending);
    assert!(app.say(&first.phone, "yes").await.starts_with("You have accepted the job"));

    let older = app.booking(&older.id);
    assert_eq!(older.status, BookingStatus::PaymentPending);
    assert_eq!(older.provider_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(app.count_to(REQUESTER, "accepted by Mechanic 1"), 1);
    assert_eq!(app.count_to(other_requester, "accepted by Mechanic 2"), 1);
    // The winner of the newer job was no longer offered the older one.
    assert_eq!(app.count_to(&second.phone, "already been taken by another mechanic"), 0);
}

#[tokio::test]
async fn test_offer_reply_requires_membership() {
    let app = test_app();
    let in_range = app.provider(1, near(0.01));
    let outsider = app.provider(2, near(1.0));
    app.request_service().await;

    // Not notified: the reply falls through to the menu.
    assert_eq!(app.say(&outsider.phone, "1").await, "Hi! To start over, please type \"hi\"");
    assert_eq!(app.active_booking_of_requester().unwrap().status, BookingStatus::Pending);

    assert!(app.say(&in_range.phone, "no").await.starts_with("You have declined the job"));
    assert_eq!(app.active_booking_of_requester().unwrap().status, BookingStatus::Pending);
    assert_eq!(app.actor(&in_range.id).is_available, Some(true));
}

#[tokio::test]
async fn test_no_providers_cancels_booking() {
    let app = test_app();
    app.provider(1, near(1.0));

    assert_eq!(
        app.request_service().await,
        "Sorry, no mechanics are available in your area at the moment. Please try again later."
    );
    assert!(app.active_booking_of_requester().is_none());
    assert!(app.state.sessions.peek(REQUESTER).is_none());
}

#[tokio::test]
async fn test_handshake_order_does_not_matter() {
    for provider_first in [true, false] {
        let app = test_app();
        let provider = app.provider(1, near(0.01));
        let booking = app.paid_booking(&provider);

        let (first, second) = if provider_first {
            ((provider.phone.as_str(), "i reached"), (REQUESTER, "reached"))
        } else {
            ((REQUESTER, "REACHED"), (provider.phone.as_str(), "Reached"))
        };

        assert!(app.say(first.0, first.1).await.contains("Waiting for"));
        assert!(app.booking(&booking.id).otp.is_none());
        app.say(second.0, second.1).await;

        let code = app.booking(&booking.id).otp.expect("code issued");
        assert_eq!(code.len(), 6);
        assert_eq!(app.count_to(REQUESTER, "Your OTP is"), 1);
        assert_eq!(app.count_to(&provider.phone, &code), 0);

        // Re-confirmation is a no-op.
        app.say(first.0, first.1).await;
        app.say(second.0, second.1).await;
        assert_eq!(app.booking(&booking.id).otp.as_deref(), Some(code.as_str()));
        assert_eq!(app.count_to(REQUESTER, "Your OTP is"), 1);
    }
}

#[tokio::test]
async fn test_code_not_accepted_before_both_arrive() {
    let app = test_app();
    let provider = app.provider(1, near(0.01));
    let booking = app.paid_booking(&provider);

    assert!(app.say(&provider.phone, "123456").await.contains("by replying \"I reached\""));
    assert_eq!(app.booking(&booking.id).status, BookingStatus::InProgress);
}

#[tokio::test]
async fn test_payment_callback_validation() {
    let app = test_app();
    let provider = app.provider(1, near(0.01));

    assert_eq!(app.get("/api/payment/callback?status=paid").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        app.get("/api/payment/callback?booking_id=nope&status=paid").await.status(),
        StatusCode::NOT_FOUND
    );

    let pending = {
        let db = app.state.db();
        let requester = directory::register_requester(&db, REQUESTER, "Asha").unwrap();
        ledger::open_booking(&db, &requester, ServiceKind::FlatTire, 300, HERE).unwrap()
    };
    assert_eq!(
        app.get(&format!("/api/payment/callback?booking_id={}&status=failed", pending.id))
            .await
            .status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        app.get(&format!("/api/payment/callback?booking_id={}&status=paid", pending.id))
            .await
            .status(),
        StatusCode::CONFLICT
    );
    assert_eq!(app.booking(&pending.id).status, BookingStatus::Pending);

    {
        let db = app.state.db();
        queries::insert_offers(&db, &pending.id, &[provider.id.clone()]).unwrap();
        queries::assign_provider(&db, &pending.id, &provider.id).unwrap();
        queries::set_payment_pending(&db, &pending.id, "plink", "https://pay.test/l").unwrap();
    }
    let uri = format!("/api/payment/callback?booking_id={}&status=paid&razorpay_payment_id=pay_9", pending.id);
    assert_eq!(app.get(&uri).await.status(), StatusCode::SEE_OTHER);
    assert_eq!(app.get(&uri).await.status(), StatusCode::SEE_OTHER);

    let paid = app.booking(&pending.id);
    assert_eq!(paid.status, BookingStatus::InProgress);
    assert_eq!(paid.payment_ref.as_deref(), Some("pay_9"));
    assert_eq!(app.count_to(&provider.phone, "Customer location"), 1);
}

#[tokio::test]
async fn test_cancel_before_payment_frees_provider() {
    let app = test_app();
    let winner = app.provider(1, near(0.01));
    app.request_service().await;

    // Accepted, with the payment link still outstanding.
    app.payments_failing.store(true, Ordering::SeqCst);
    app.post_form(&[("From", winner.phone.as_str()), ("To", "whatsapp:+15551234567"), ("Body", "1")])
        .await;
    assert_eq!(app.active_booking_of_requester().unwrap().status, BookingStatus::Accepted);
    assert_eq!(app.actor(&winner.id).is_available, Some(false));

    assert!(app.say(REQUESTER, "cancel").await.starts_with("Your booking has been cancelled"));
    assert!(app.active_booking_of_requester().is_none());
    assert_eq!(app.actor(&winner.id).is_available, Some(true));
    assert_eq!(
        app.last_to(&winner.phone).unwrap(),
        "The customer has cancelled the booking. You are available for new requests."
    );
    assert!(app.state.sessions.peek(REQUESTER).is_none());
}

#[tokio::test]
async fn test_cancel_refused_once_payment_link_is_sent() {
    let app = test_app();
    let winner = app.provider(1, near(0.01));
    app.request_service().await;
    app.say(&winner.phone, "1").await;
    let booking = app.active_booking_of_requester().unwrap();
    assert_eq!(booking.status, BookingStatus::PaymentPending);

    assert_eq!(
        app.say(REQUESTER, "cancel").await,
        "Your booking can no longer be cancelled because the payment link has already been sent."
    );
    assert_eq!(app.booking(&booking.id).status, BookingStatus::PaymentPending);
    assert_eq!(app.actor(&winner.id).is_available, Some(false));

    // Paying the link already sent still starts the job.
    let response = app
        .get(&format!(
            "/api/payment/callback?booking_id={}&razorpay_payment_link_status=paid",
            booking.id
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(app.booking(&booking.id).status, BookingStatus::InProgress);
}

#[tokio::test]
async fn test_cancel_while_pending_withdraws_offers() {
    let app = test_app();
    let provider = app.provider(1, near(0.01));
    app.request_service().await;

    app.say(REQUESTER, "Cancel").await;
    assert_eq!(app.last_to(&provider.phone).unwrap(), "Sorry, this job is no longer available.");
    assert_eq!(app.say(&provider.phone, "1").await, "Sorry, this job is no longer available.");
    assert_eq!(app.count_to(&provider.phone, "already been taken"), 0);
    assert_eq!(app.actor(&provider.id).is_available, Some(true));
}

#[tokio::test]
async fn test_cancel_after_payment_is_refused() {
    let app = test_app();
    let provider = app.provider(1, near(0.01));
    let booking = app.paid_booking(&provider);

    assert!(app.say(REQUESTER, "cancel").await.contains("can no longer be cancelled"));
    assert_eq!(app.booking(&booking.id).status, BookingStatus::InProgress);
}

#[tokio::test]
async fn test_payment_link_failure_can_be_retried() {
    let app = test_app();
    let provider = app.provider(1, near(0.01));
    app.request_service().await;

    app.payments_failing.store(true, Ordering::SeqCst);
    let response = app
        .post_form(&[("From", provider.phone.as_str()), ("To", "whatsapp:+15551234567"), ("Body", "1")])
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let booking = app.active_booking_of_requester().unwrap();
    assert_eq!(booking.status, BookingStatus::Accepted);

    app.payments_failing.store(false, Ordering::SeqCst);
    assert!(app.say(&provider.phone, "yes").await.starts_with("You have accepted the job"));
    let booking = app.booking(&booking.id);
    assert_eq!(booking.status, BookingStatus::PaymentPending);
    assert!(booking.payment_link.is_some());
}

#[tokio::test]
async fn test_expired_session_starts_over() {
    let app = test_app_with_sessions(SessionStore::new(chrono::Duration::milliseconds(50)));
    app.say(REQUESTER, "hi").await;
    tokio::time::sleep(StdDuration::from_millis(120)).await;

    assert_eq!(app.say(REQUESTER, "2").await, "Hi! To start over, please type \"hi\"");
}

#[tokio::test]
async fn test_signature_required_when_token_configured() {
    let conn = db::init_db(":memory:").unwrap();
    let mut config = test_config();
    config.twilio_auth_token = "secret".to_string();
    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        messaging: Box::new(MockMessaging {
            sent: Arc::new(Mutex::new(vec![])),
        }),
        payments: Box::new(MockPayments {
            failing: Arc::new(AtomicBool::new(false)),
        }),
        sessions: Arc::new(SessionStore::default()),
    });

    let response = handlers::router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/whatsapp/webhook")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("x-twilio-signature", "bogus")
                .body(Body::from(form_body(&[("From", REQUESTER), ("Body", "hi")])))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
