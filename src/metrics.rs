//! Live stream metrics
//!
//! Two concerns live here:
//!
//! - The metrics estimator: a pure function turning cleaned text and stream
//!   timing into the token count, throughput and time-to-first-token shown
//!   on an assistant message. It runs after every chunk so the numbers stay
//!   live while the reply is still arriving.
//! - Stream telemetry exported through the `metrics` facade.
//!
//! # Metrics
//!
//! - `chat_streams_total`: Counter of streams by outcome
//! - `chat_stream_chunks_total`: Counter of body chunks consumed
//! - `chat_stream_tokens`: Histogram of estimated tokens per reply
//! - `chat_stream_ttft_ms`: Histogram of time to first token
//! - `chat_markers_dropped_total`: Counter of malformed tool markers
//! - `chat_streams_active`: Gauge of streams in flight

use metrics::{counter, decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::thread::Message;

/// Characters-per-token heuristic for English-like text
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Below this elapsed time throughput is considered not yet measurable
pub const MIN_RATE_WINDOW_SECS: f64 = 0.1;

/// Timing trackers for one in-flight request
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    /// When the request was issued, if known
    pub request_start: Option<Instant>,
    /// When the response body started streaming
    pub stream_start: Instant,
    /// When the first non-empty chunk arrived
    pub first_chunk: Option<Instant>,
}

impl StreamClock {
    /// Starts a clock for a stream that begins now
    pub fn started(request_start: Option<Instant>) -> Self {
        Self {
            request_start,
            stream_start: Instant::now(),
            first_chunk: None,
        }
    }

    /// Records the first chunk carrying non-whitespace text
    ///
    /// Later calls keep the original instant.
    pub fn observe_chunk(&mut self, chunk: &str, at: Instant) {
        if self.first_chunk.is_none() && !chunk.trim().is_empty() {
            self.first_chunk = Some(at);
        }
    }
}

/// Metrics for the current state of a streamed reply
///
/// `None` means "not measurable yet", which is distinct from zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamMetrics {
    pub estimated_tokens: u64,
    pub tokens_per_second: Option<f64>,
    /// Milliseconds between request start and first non-empty chunk
    pub time_to_first_token: Option<u64>,
}

impl StreamMetrics {
    /// Copies the metrics onto a message, leaving a zero token count unset
    pub fn apply_to(&self, message: &mut Message) {
        message.total_tokens = (self.estimated_tokens > 0).then_some(self.estimated_tokens);
        message.tokens_per_second = self.tokens_per_second;
        message.time_to_first_token = self.time_to_first_token;
    }
}

/// Estimated token count of `text`
///
/// # Examples
///
/// ```
/// use threadline::metrics::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u64
}

/// Computes live metrics for a reply
///
/// # Arguments
///
/// * `cleaned` - Display text with tool markers removed
/// * `clock` - Timing trackers of the stream
/// * `now` - Current instant
pub fn estimate(cleaned: &str, clock: &StreamClock, now: Instant) -> StreamMetrics {
    let estimated_tokens = estimate_tokens(cleaned);
    let elapsed = now.saturating_duration_since(clock.stream_start).as_secs_f64();

    let tokens_per_second = (estimated_tokens > 0 && elapsed > MIN_RATE_WINDOW_SECS)
        .then(|| estimated_tokens as f64 / elapsed);

    let time_to_first_token = match (clock.first_chunk, clock.request_start) {
        (Some(first), Some(start)) => Some(first.saturating_duration_since(start).as_millis() as u64),
        _ => None,
    };

    StreamMetrics {
        estimated_tokens,
        tokens_per_second,
        time_to_first_token,
    }
}

/// Telemetry for a single streamed reply
///
/// Outcomes are recorded through a shared reference; the first recorded
/// outcome wins. Dropping it unrecorded only releases the active gauge.
#[derive(Debug)]
pub struct StreamTelemetry {
    model: String,
    recorded: AtomicBool,
}

impl StreamTelemetry {
    /// Starts tracking a stream and bumps the active gauge
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        increment_gauge!("chat_streams_active", 1.0, "model" => model.clone());
        Self {
            model,
            recorded: AtomicBool::new(false),
        }
    }

    pub fn record_chunk(&self) {
        increment_counter!("chat_stream_chunks_total", "model" => self.model.clone());
    }

    pub fn record_dropped_markers(&self, dropped: usize) {
        if dropped > 0 {
            counter!("chat_markers_dropped_total", dropped as u64, "model" => self.model.clone());
        }
    }

    /// Records a stream that ran to completion
    pub fn record_completion(&self, metrics: &StreamMetrics) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        histogram!(
            "chat_stream_tokens",
            metrics.estimated_tokens as f64,
            "model" => self.model.clone()
        );
        if let Some(ttft) = metrics.time_to_first_token {
            histogram!("chat_stream_ttft_ms", ttft as f64, "model" => self.model.clone());
        }
        self.finish("completed");
    }

    /// Records a stream that ended in failure
    pub fn record_failure(&self) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        self.finish("failed");
    }

    fn finish(&self, outcome: &'static str) {
        increment_counter!(
            "chat_streams_total",
            "model" => self.model.clone(),
            "outcome" => outcome
        );
        decrement_gauge!("chat_streams_active", 1.0, "model" => self.model.clone());
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }
}

impl Drop for StreamTelemetry {
    fn drop(&mut self) {
        if !self.recorded.load(Ordering::SeqCst) {
            decrement_gauge!("chat_streams_active", 1.0, "model" => self.model.clone());
        }
    }
}

/// Installs the Prometheus exporter when the `prometheus` feature is enabled
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let _ = PrometheusBuilder::new().install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
