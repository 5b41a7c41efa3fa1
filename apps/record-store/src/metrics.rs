use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};

use record_log::metrics::REGISTRY;

pub static API_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("record_store_requests_total", "Files API requests by route and status"),
        &["route", "status"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn observe(route: &str, status: u16) {
    API_REQUESTS
        .with_label_values(&[route, &status.to_string()])
        .inc();
}

pub fn export_prometheus() -> String {
    Lazy::force(&API_REQUESTS);
    record_log::metrics::export_prometheus()
}
