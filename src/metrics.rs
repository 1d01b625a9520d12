use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "chat_relay_active_connections",
        "WebSocket connections currently registered on this instance",
    )
    .expect("failed to create chat_relay_active_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_relay_active_connections");
    gauge
});

static MESSAGES_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_relay_messages_published_total",
            "Inbound client messages published to the bus",
        ),
        &["result"],
    )
    .expect("failed to create chat_relay_messages_published_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_messages_published_total");
    counter
});

static RELAY_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_relay_deliveries_total",
            "Fan-out writes from the bus to local connections",
        ),
        &["result"],
    )
    .expect("failed to create chat_relay_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_deliveries_total");
    counter
});

static RELAY_MALFORMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_relay_malformed_payloads_total",
        "Bus payloads dropped because they could not be decoded",
    )
    .expect("failed to create chat_relay_malformed_payloads_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_malformed_payloads_total");
    counter
});

fn result_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "error"
    }
}

pub fn set_active_connections(count: usize) {
    ACTIVE_CONNECTIONS.set(count as i64);
}

pub fn record_publish(ok: bool) {
    MESSAGES_PUBLISHED_TOTAL
        .with_label_values(&[result_label(ok)])
        .inc();
}

pub fn record_delivery(ok: bool) {
    RELAY_DELIVERIES_TOTAL
        .with_label_values(&[result_label(ok)])
        .inc();
}

pub fn record_malformed() {
    RELAY_MALFORMED_TOTAL.inc();
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
