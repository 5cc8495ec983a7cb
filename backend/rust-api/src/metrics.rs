use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    // Generation pipeline
    pub static ref GENERATION_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "generation_jobs_total",
        "Generation jobs by stage and outcome",
        &["stage", "status"]
    )
    .unwrap();

    // Chat streaming
    pub static ref CHAT_STREAMS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_streams_total",
        "Tutoring chat streams opened, by outcome",
        &["outcome"]
    )
    .unwrap();

    // Grading
    pub static ref TEST_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "test_submissions_total",
        "Graded test submissions by scope",
        &["scope"]
    )
    .unwrap();
}

pub fn record_generation_job(stage: &str, status: &str) {
    GENERATION_JOBS_TOTAL
        .with_label_values(&[stage, status])
        .inc();
}

pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}
