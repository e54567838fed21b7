use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder installed in
// `main` only serves the exposition endpoint.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "licita.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn upstream_page(code: u32, page: u32, status: u16, elapsed_ms: u128) {
    trace!(
        target = "licita.metrics",
        code = code,
        page = page,
        status = status,
        elapsed_ms = elapsed_ms as u64,
        "upstream_page"
    );
}

pub fn search_completed(results: usize, partial: bool, elapsed_ms: u128) {
    trace!(
        target = "licita.metrics",
        results = results as u64,
        partial = partial,
        elapsed_ms = elapsed_ms as u64,
        "search_completed"
    );
}
