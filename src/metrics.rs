use std::sync::LazyLock;

use prometheus::*;

static METRIC_EMBEDDED_IMAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("image_search_embedded_images", "count of the embedded images").unwrap()
});

static METRIC_CHUNK_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "image_search_chunk_duration",
        "duration of embedding and upserting one chunk in seconds"
    )
    .unwrap()
});

static METRIC_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "image_search_request_duration",
        "duration of the api operations in seconds",
        &["operation"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "image_search_max_score",
        "max score of the per-image search",
        (0..=20).map(|x| x as f64 / 20.).collect()
    )
    .unwrap()
});

/// 增加已嵌入图片计数
pub fn inc_embedded_images(count: usize) {
    METRIC_EMBEDDED_IMAGES.inc_by(count as u64);
}

pub fn observe_chunk_duration(duration: f32) {
    METRIC_CHUNK_DURATION.observe(duration as f64);
}

pub fn observe_request_duration(operation: &str, duration: f32) {
    METRIC_REQUEST_DURATION.with_label_values(&[operation]).observe(duration as f64);
}

pub fn observe_search_max_score(score: f32) {
    METRIC_SEARCH_MAX_SCORE.observe(score as f64);
}
