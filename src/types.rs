use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upstream field names carrying the hit flag, in order of preference
pub const HIT_FLAG_FIELDS: &[&str] = &["hit_status", "hit"];

/// One named sentiment signal from the upstream source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub name: String,
    pub hit: bool,
    pub hit_time: Option<i64>,   // epoch milliseconds
}

impl IndicatorRecord {
    /// Build a record from one raw `data` item.
    ///
    /// The hit flag is resolved through [`HIT_FLAG_FIELDS`]: the first field
    /// that is present and non-null wins.
    pub fn from_json(item: &Value) -> Self {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Indicator")
            .to_string();

        let hit = HIT_FLAG_FIELDS
            .iter()
            .filter_map(|field| item.get(*field))
            .find(|v| !v.is_null())
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Some payloads carry the timestamp as a float
        let hit_time = item.get("hit_time").and_then(|v| {
            v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
        });

        Self { name, hit, hit_time }
    }
}

/// Response envelope wrapping every upstream payload.
///
/// `code` is the upstream's own status marker, not the HTTP status.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub code: Value,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
}

impl Envelope {
    /// Envelope code as a string ("200", "400", ...), accepting numeric codes too
    pub fn code_str(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Ingest the `data` array into indicator records
    pub fn records(&self) -> Vec<IndicatorRecord> {
        self.data
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(IndicatorRecord::from_json)
            .collect()
    }
}

/// Outcome of a single HTTP attempt
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(Envelope),
    RetriableFailure { status: u16, message: String },
    FatalFailure { status: Option<u16>, message: String },
    NetworkFailure { message: String },
}

/// Sentiment bucket derived from the sell percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Unwavering,
    Confident,
    Watchful,
    Cautious,
    Neutral,
    Caution,
    Mitigate,
    Divest,
    Urgent,
    Liquidate,
    Unknown,
}

impl SentimentLabel {
    const DECADES: [SentimentLabel; 10] = [
        SentimentLabel::Unwavering,
        SentimentLabel::Confident,
        SentimentLabel::Watchful,
        SentimentLabel::Cautious,
        SentimentLabel::Neutral,
        SentimentLabel::Caution,
        SentimentLabel::Mitigate,
        SentimentLabel::Divest,
        SentimentLabel::Urgent,
        SentimentLabel::Liquidate,
    ];

    /// Map a sell percentage onto its decade bucket.
    ///
    /// Buckets are inclusive integer ranges `[0,9]`, `[10,19]`, ... `[90,100]`;
    /// fractional values land in the bucket of their integer floor.
    pub fn classify(sell_pct: f64) -> Self {
        if !(0.0..=100.0).contains(&sell_pct) {
            return SentimentLabel::Unknown;
        }
        let decade = ((sell_pct.floor() as usize) / 10).min(9);
        Self::DECADES[decade]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Unwavering => "Unwavering",
            SentimentLabel::Confident => "Confident",
            SentimentLabel::Watchful => "Watchful",
            SentimentLabel::Cautious => "Cautious",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Caution => "Caution",
            SentimentLabel::Mitigate => "Mitigate",
            SentimentLabel::Divest => "Divest",
            SentimentLabel::Urgent => "Urgent",
            SentimentLabel::Liquidate => "Liquidate",
            SentimentLabel::Unknown => "Unknown",
        }
    }

    /// Display glyph shown next to the label
    pub fn glyph(&self) -> &'static str {
        match self {
            SentimentLabel::Unwavering => "💎",
            SentimentLabel::Confident => "🛡️",
            SentimentLabel::Watchful => "📈",
            SentimentLabel::Cautious => "🐂",
            SentimentLabel::Neutral => "⚖️",
            SentimentLabel::Caution => "⚠️",
            SentimentLabel::Mitigate => "🧯",
            SentimentLabel::Divest => "🏃",
            SentimentLabel::Urgent => "🔥",
            SentimentLabel::Liquidate => "🚨",
            SentimentLabel::Unknown => "📊",
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hold/sell split computed from one indicator set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub hold_pct: f64,                    // rounded to 2 decimals
    pub sell_pct: f64,                    // rounded to 2 decimals
    pub label: SentimentLabel,
    pub triggered: Vec<IndicatorRecord>,  // upstream order preserved
    pub total: usize,
}

/// Error types surfaced by a fetch cycle
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("API Error: Retriable status {status}")]
    RetriableServer { status: u16 },

    #[error("Network Error: {0}")]
    Network(String),

    #[error("HTTP Error ({status}): {message}")]
    FatalClient { status: u16, message: String },

    #[error("{message}")]
    Upstream { code: String, message: String },

    #[error("Invalid response format: {0}")]
    Decode(String),

    #[error("Failed after {retries} retries: {last}")]
    RetriesExhausted { retries: u32, last: Box<FetchError> },

    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("Unknown error after all retries")]
    Unknown,
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, FetchError::RetriableServer { .. } | FetchError::Network(_))
    }
}

/// Result of one fetch cycle, handed back to the caller
pub type AggregateResult = std::result::Result<Aggregate, FetchError>;

/// Trait for sentiment data sources
#[async_trait::async_trait]
pub trait SentimentSource: Send + Sync {
    /// Fetch the current indicator set and aggregate it
    async fn fetch_aggregate(&self, api_key: Option<&str>) -> AggregateResult;

    /// Source name
    fn name(&self) -> &str;
}
