use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use chrono::{Days, Local, NaiveDate};
use serde_json::json;
use shared::domain::{AdventureId, BookingId, BookingStatus};

use crate::{
    booking::{
        BookingObserver, BookingOrchestrator, BookingPhase, NoopObserver, PaymentOutcome,
        StepOutcome,
    },
    cache::MemorySessionCache,
    error::ClientError,
    stub_backend::{
        booking_json, bookings_page, bookings_page_of, client_for, sign_in_traveller, spawn_stub_backend,
        StubBackend, Reply, FAST_POLLING,
    },
    transport::HttpBackend,
    BookingClient,
};

type Completions = Arc<StdMutex<Vec<(PaymentOutcome, BookingId)>>>;

fn recording_observer() -> (Arc<dyn BookingObserver>, Completions) {
    let completions: Completions = Arc::default();
    let sink = completions.clone();
    let observer = move |outcome: PaymentOutcome, booking_id: BookingId| {
        sink.lock().expect("completions").push((outcome, booking_id));
    };
    (Arc::new(observer), completions)
}

fn trip_date() -> NaiveDate {
    Local::now()
        .date_naive()
        .checked_add_days(Days::new(30))
        .expect("trip date")
}

async fn fill_draft(flow: &BookingOrchestrator, guests: u32) {
    let edited = flow
        .edit_draft(|draft| {
            draft.trip_date = Some(trip_date());
            draft.guest_count = guests;
        })
        .await;
    assert!(edited);
}

async fn script_created_booking(stub: &StubBackend, booking_id: i64, total: f64) {
    stub.reply(
        "create_booking",
        Reply::ok(json!({
            "message": "Booking created successfully",
            "booking": booking_json(booking_id, "pending", total),
        })),
    )
    .await;
}

async fn signed_in_client() -> (BookingClient, StubBackend) {
    let (url, stub) = spawn_stub_backend().await;
    let client = client_for(&url, Arc::new(MemorySessionCache::default()));
    sign_in_traveller(&stub, &client.session).await;
    (client, stub)
}

/// Flow that already holds booking 55 for two guests at 14 000 each.
async fn flow_awaiting_payment(
    client: &BookingClient,
    stub: &StubBackend,
    observer: Arc<dyn BookingObserver>,
) -> BookingOrchestrator {
    script_created_booking(stub, 55, 28000.0).await;
    let flow = client.desk.open(AdventureId(102), 14_000, observer);
    fill_draft(&flow, 2).await;
    assert!(matches!(flow.submit().await, StepOutcome::Advanced(_)));
    flow
}

#[tokio::test]
async fn booking_is_created_once_and_payment_failure_keeps_it() {
    let (client, stub) = signed_in_client().await;
    script_created_booking(&stub, 55, 28000.0).await;
    stub.reply("initiate_payment", Reply::error(500, "Payment initiation failed"))
        .await;
    let flow = client
        .desk
        .open(AdventureId(102), 14_000, Arc::new(NoopObserver));
    fill_draft(&flow, 2).await;

    match flow.submit().await {
        StepOutcome::Advanced(BookingPhase::AwaitingPayment { booking, .. }) => {
            assert_eq!(booking.booking_id, BookingId(55));
            assert_eq!(booking.total_amount, 28_000);
            assert_eq!(booking.status, BookingStatus::Pending);
        }
        other => panic!("expected awaiting payment, got {other:?}"),
    }
    let sent = stub.bodies("create_booking").await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["adventure_id"], json!(102));
    assert_eq!(sent[0]["number_of_people"], json!(2));
    assert_eq!(sent[0]["customer_email"], json!("traveller@example.com"));
    assert_eq!(
        sent[0]["adventure_date"],
        json!(trip_date().format("%Y-%m-%d").to_string())
    );

    let outcome = flow.initiate_payment("0712345678").await;
    let expected_error = ClientError::Server {
        status: 500,
        message: "Payment initiation failed".into(),
    };
    assert_eq!(
        outcome,
        StepOutcome::Rejected {
            error: expected_error.clone(),
            redirect: None,
        }
    );
    match flow.phase().await {
        BookingPhase::AwaitingPayment { booking, error, .. } => {
            assert_eq!(booking.booking_id, BookingId(55));
            assert_eq!(error, Some(expected_error));
        }
        other => panic!("expected awaiting payment, got {other:?}"),
    }
    assert_eq!(stub.hits("create_booking").await, 1);
    assert_eq!(stub.hits("my_bookings").await, 0);
}

#[tokio::test]
async fn concurrent_submits_send_a_single_create_request() {
    let (client, stub) = signed_in_client().await;
    script_created_booking(&stub, 55, 28000.0).await;
    stub.delay("create_booking", Duration::from_millis(150))
        .await;
    let flow = client
        .desk
        .open(AdventureId(102), 14_000, Arc::new(NoopObserver));
    fill_draft(&flow, 2).await;

    let (first, second) = tokio::join!(flow.submit(), flow.submit());

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, StepOutcome::Advanced(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == StepOutcome::Ignored)
            .count(),
        1
    );
    assert_eq!(stub.hits("create_booking").await, 1);
}

#[tokio::test]
async fn payment_trigger_before_booking_exists_is_ignored() {
    let (client, stub) = signed_in_client().await;
    let flow = client
        .desk
        .open(AdventureId(102), 14_000, Arc::new(NoopObserver));

    assert_eq!(
        flow.initiate_payment("0712345678").await,
        StepOutcome::Ignored
    );
    assert_eq!(flow.phase().await.name(), "collecting");
    assert_eq!(stub.hits("initiate_payment").await, 0);
}

#[tokio::test]
async fn invalid_drafts_never_reach_the_server() {
    let (client, stub) = signed_in_client().await;
    let flow = client
        .desk
        .open(AdventureId(102), 14_000, Arc::new(NoopObserver));

    fill_draft(&flow, 0).await;
    assert!(matches!(
        flow.submit().await,
        StepOutcome::Rejected {
            error: ClientError::Validation(_),
            redirect: None,
        }
    ));

    flow.edit_draft(|draft| {
        draft.guest_count = 2;
        draft.trip_date = Local::now().date_naive().pred_opt();
    })
    .await;
    assert!(matches!(
        flow.submit().await,
        StepOutcome::Rejected {
            error: ClientError::Validation(_),
            ..
        }
    ));

    match flow.phase().await {
        BookingPhase::Collecting { error, .. } => assert!(error.is_some()),
        other => panic!("expected collecting, got {other:?}"),
    }
    assert_eq!(stub.hits("create_booking").await, 0);
}

#[tokio::test]
async fn anonymous_submit_redirects_to_login() {
    let (url, stub) = spawn_stub_backend().await;
    let client = client_for(&url, Arc::new(MemorySessionCache::default()));
    let flow = client
        .desk
        .open(AdventureId(102), 14_000, Arc::new(NoopObserver));
    fill_draft(&flow, 2).await;

    match flow.submit().await {
        StepOutcome::Rejected { error, redirect } => {
            assert!(error.requires_reauth());
            assert_eq!(redirect, Some("/login"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(stub.hits("create_booking").await, 0);
}

#[tokio::test]
async fn expired_session_during_create_redirects_to_login() {
    let (client, stub) = signed_in_client().await;
    stub.reply("create_booking", Reply::error(401, "Authentication required"))
        .await;
    let flow = client
        .desk
        .open(AdventureId(102), 14_000, Arc::new(NoopObserver));
    fill_draft(&flow, 2).await;

    assert_eq!(
        flow.submit().await,
        StepOutcome::Rejected {
            error: ClientError::Unauthorized("Authentication required".into()),
            redirect: Some("/login"),
        }
    );
    assert_eq!(flow.phase().await.name(), "collecting");
    assert!(
        flow.edit_draft(|draft| draft.special_requests = "vegetarian".into())
            .await
    );
}

#[tokio::test]
async fn paid_booking_settles_confirmed_and_notifies_once() {
    let (client, stub) = signed_in_client().await;
    stub.reply(
        "initiate_payment",
        Reply::ok(json!({
            "message": "Payment initiated",
            "checkout_request_id": "ws_CO_191020261200",
            "payment_id": 9,
        })),
    )
    .await;
    stub.reply_sequence(
        "my_bookings",
        vec![
            Reply::ok(bookings_page(vec![booking_json(55, "pending", 28000.0)])),
            Reply::ok(bookings_page(vec![booking_json(55, "confirmed", 28000.0)])),
        ],
    )
    .await;
    let (observer, completions) = recording_observer();
    let flow = flow_awaiting_payment(&client, &stub, observer).await;

    match flow.initiate_payment("0712345678").await {
        StepOutcome::Advanced(BookingPhase::Settled {
            booking,
            attempt,
            outcome,
            ..
        }) => {
            assert_eq!(outcome, PaymentOutcome::Confirmed);
            assert_eq!(booking.status, BookingStatus::Confirmed);
            let receipt = attempt.receipt.expect("receipt recorded");
            assert_eq!(
                receipt.checkout_request_id.as_deref(),
                Some("ws_CO_191020261200")
            );
        }
        other => panic!("expected settled, got {other:?}"),
    }
    assert_eq!(
        stub.bodies("initiate_payment").await,
        vec![json!({ "booking_id": 55, "phone_number": "0712345678" })]
    );
    assert_eq!(stub.hits("my_bookings").await, 2);
    assert_eq!(
        *completions.lock().expect("completions"),
        vec![(PaymentOutcome::Confirmed, BookingId(55))]
    );
    assert!(!flow.cancel().await);
    assert!(!flow.retry_payment().await);
}

#[tokio::test]
async fn empty_payment_acknowledgement_still_polls() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::empty()).await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "completed", 28000.0)])),
    )
    .await;
    let flow = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;

    match flow.initiate_payment("0712345678").await {
        StepOutcome::Advanced(BookingPhase::Settled {
            attempt, outcome, ..
        }) => {
            assert_eq!(outcome, PaymentOutcome::Confirmed);
            assert_eq!(attempt.receipt, Some(Default::default()));
        }
        other => panic!("expected settled, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_booking_settles_failed() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "cancelled", 28000.0)])),
    )
    .await;
    let (observer, completions) = recording_observer();
    let flow = flow_awaiting_payment(&client, &stub, observer).await;

    match flow.initiate_payment("0712345678").await {
        StepOutcome::Advanced(BookingPhase::Settled { outcome, .. }) => {
            assert_eq!(outcome, PaymentOutcome::Failed)
        }
        other => panic!("expected settled, got {other:?}"),
    }
    assert_eq!(stub.hits("my_bookings").await, 1);
    assert_eq!(
        *completions.lock().expect("completions"),
        vec![(PaymentOutcome::Failed, BookingId(55))]
    );
}

#[tokio::test]
async fn pending_until_attempts_run_out_is_unknown_and_retryable() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "pending", 28000.0)])),
    )
    .await;
    let (observer, completions) = recording_observer();
    let flow = flow_awaiting_payment(&client, &stub, observer).await;

    match flow.initiate_payment("0712345678").await {
        StepOutcome::Advanced(BookingPhase::Settled { outcome, .. }) => {
            assert_eq!(outcome, PaymentOutcome::Unknown)
        }
        other => panic!("expected settled, got {other:?}"),
    }
    assert_eq!(stub.hits("my_bookings").await, FAST_POLLING.max_attempts);

    assert!(flow.retry_payment().await);
    match flow.phase().await {
        BookingPhase::AwaitingPayment { booking, error, .. } => {
            assert_eq!(booking.booking_id, BookingId(55));
            assert_eq!(error, None);
        }
        other => panic!("expected awaiting payment, got {other:?}"),
    }

    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "confirmed", 28000.0)])),
    )
    .await;
    assert!(matches!(
        flow.initiate_payment("0712345678").await,
        StepOutcome::Advanced(BookingPhase::Settled {
            outcome: PaymentOutcome::Confirmed,
            ..
        })
    ));
    assert_eq!(stub.hits("initiate_payment").await, 2);
    assert_eq!(
        *completions.lock().expect("completions"),
        vec![
            (PaymentOutcome::Unknown, BookingId(55)),
            (PaymentOutcome::Confirmed, BookingId(55)),
        ]
    );
}

#[tokio::test]
async fn booking_listed_past_the_first_page_is_still_found() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    let newer = (56..66)
        .map(|id| booking_json(id, "pending", 14000.0))
        .collect();
    stub.reply_sequence(
        "my_bookings",
        vec![
            Reply::ok(bookings_page_of(newer, 1, 2)),
            Reply::ok(bookings_page_of(
                vec![booking_json(55, "confirmed", 28000.0)],
                2,
                2,
            )),
        ],
    )
    .await;
    let flow = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;

    assert!(matches!(
        flow.initiate_payment("0712345678").await,
        StepOutcome::Advanced(BookingPhase::Settled {
            outcome: PaymentOutcome::Confirmed,
            ..
        })
    ));
    assert_eq!(
        stub.bodies("my_bookings").await,
        vec![json!({ "query": "page=1" }), json!({ "query": "page=2" })]
    );
}

#[tokio::test]
async fn booking_missing_from_the_listing_ends_unknown_not_failed() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    stub.reply("my_bookings", Reply::ok(bookings_page(vec![])))
        .await;
    let (observer, completions) = recording_observer();
    let flow = flow_awaiting_payment(&client, &stub, observer).await;

    match flow.initiate_payment("0712345678").await {
        StepOutcome::Advanced(BookingPhase::Settled { outcome, .. }) => {
            assert_eq!(outcome, PaymentOutcome::Unknown)
        }
        other => panic!("expected settled, got {other:?}"),
    }
    assert_eq!(stub.hits("my_bookings").await, FAST_POLLING.max_attempts);
    assert_eq!(
        *completions.lock().expect("completions"),
        vec![(PaymentOutcome::Unknown, BookingId(55))]
    );
    assert!(flow.retry_payment().await);
}

#[tokio::test]
async fn cancelling_while_confirming_drops_the_poll_and_frees_the_booking() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "pending", 28000.0)])),
    )
    .await;
    stub.delay("my_bookings", Duration::from_millis(100)).await;
    let (observer, completions) = recording_observer();
    let flow = Arc::new(flow_awaiting_payment(&client, &stub, observer).await);

    let paying = flow.clone();
    let pending = tokio::spawn(async move { paying.initiate_payment("0712345678").await });
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(flow.phase().await.name(), "confirming_payment");

    assert!(flow.cancel().await);
    assert_eq!(pending.await.expect("payment task"), StepOutcome::Stale);
    assert_eq!(flow.phase().await, BookingPhase::Cancelled);
    assert!(completions.lock().expect("completions").is_empty());

    stub.delay("my_bookings", Duration::ZERO).await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "confirmed", 28000.0)])),
    )
    .await;
    let again = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;
    assert!(matches!(
        again.initiate_payment("0712345678").await,
        StepOutcome::Advanced(BookingPhase::Settled {
            outcome: PaymentOutcome::Confirmed,
            ..
        })
    ));
    assert_eq!(stub.hits("initiate_payment").await, 2);
}

#[tokio::test]
async fn lost_payment_response_is_resolved_by_polling() {
    let (url, stub) = spawn_stub_backend().await;
    let api = Arc::new(HttpBackend::new(&url, Duration::from_millis(300)).expect("backend"));
    let client = BookingClient::new(
        api,
        Arc::new(MemorySessionCache::default()),
        FAST_POLLING,
    );
    sign_in_traveller(&stub, &client.session).await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    stub.delay("initiate_payment", Duration::from_secs(2)).await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "confirmed", 28000.0)])),
    )
    .await;
    let flow = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;

    match flow.initiate_payment("0712345678").await {
        StepOutcome::Advanced(BookingPhase::Settled {
            attempt, outcome, ..
        }) => {
            assert_eq!(outcome, PaymentOutcome::Confirmed);
            assert_eq!(attempt.receipt, None);
        }
        other => panic!("expected settled, got {other:?}"),
    }
}

#[tokio::test]
async fn short_payer_phone_is_rejected_locally() {
    let (client, stub) = signed_in_client().await;
    let flow = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;

    assert!(matches!(
        flow.initiate_payment("07123").await,
        StepOutcome::Rejected {
            error: ClientError::Validation(_),
            redirect: None,
        }
    ));
    assert_eq!(flow.phase().await.name(), "awaiting_payment");
    assert_eq!(stub.hits("initiate_payment").await, 0);
}

#[tokio::test]
async fn one_booking_is_never_charged_by_two_flows_at_once() {
    let (client, stub) = signed_in_client().await;
    stub.reply("initiate_payment", Reply::ok(json!({ "message": "ok" })))
        .await;
    stub.delay("initiate_payment", Duration::from_millis(150))
        .await;
    stub.reply(
        "my_bookings",
        Reply::ok(bookings_page(vec![booking_json(55, "confirmed", 28000.0)])),
    )
    .await;
    let first = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;
    let second = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;

    let (a, b) = tokio::join!(
        first.initiate_payment("0712345678"),
        second.initiate_payment("0712345678")
    );

    let ignored = [&a, &b]
        .iter()
        .filter(|o| ***o == StepOutcome::Ignored)
        .count();
    assert_eq!(ignored, 1, "outcomes: {a:?} / {b:?}");
    assert_eq!(stub.hits("initiate_payment").await, 1);
}

#[tokio::test]
async fn cancelling_mid_submit_drops_the_late_response() {
    let (client, stub) = signed_in_client().await;
    script_created_booking(&stub, 55, 28000.0).await;
    stub.delay("create_booking", Duration::from_millis(200))
        .await;
    let (observer, completions) = recording_observer();
    let flow = Arc::new(client.desk.open(AdventureId(102), 14_000, observer));
    fill_draft(&flow, 2).await;

    let submitting = flow.clone();
    let pending = tokio::spawn(async move { submitting.submit().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(flow.phase().await.name(), "submitting");

    assert!(flow.cancel().await);
    assert_eq!(pending.await.expect("submit task"), StepOutcome::Stale);
    assert_eq!(flow.phase().await, BookingPhase::Cancelled);
    assert_eq!(flow.booking_id().await, None);
    assert!(completions.lock().expect("completions").is_empty());
    assert!(!flow.edit_draft(|draft| draft.guest_count = 3).await);
}

#[tokio::test]
async fn draft_is_prefilled_from_session_and_locked_after_submit() {
    let (client, stub) = signed_in_client().await;
    let flow = flow_awaiting_payment(&client, &stub, Arc::new(NoopObserver)).await;

    let phase = flow.phase().await;
    let draft = phase.draft().expect("draft kept");
    assert_eq!(draft.customer_name, "traveller");
    assert_eq!(draft.customer_phone, "0712345678");
    assert!(!flow.edit_draft(|draft| draft.guest_count = 5).await);
    assert_eq!(flow.booking_id().await, Some(BookingId(55)));
}

#[tokio::test]
async fn oversized_total_is_rejected_before_submit() {
    let (client, stub) = signed_in_client().await;
    let flow = client
        .desk
        .open(AdventureId(102), u64::MAX, Arc::new(NoopObserver));
    fill_draft(&flow, 2).await;

    assert!(matches!(
        flow.submit().await,
        StepOutcome::Rejected {
            error: ClientError::Validation(_),
            ..
        }
    ));
    assert_eq!(stub.hits("create_booking").await, 0);
}
