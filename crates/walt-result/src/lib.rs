//! Probe result model and wire codec for the website availability monitor.
//!
//! A [`ProbeResult`] is the unit of data that flows from the Producer onto
//! the Kafka topic and from the Consumer into PostgreSQL. The wire format is
//! a fixed, line-oriented encoding (see [`ProbeResult::encode`]); it predates
//! this crate and must not change without a version bump to the ordinals in
//! [`ResultKind`] and [`Pattern`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome classification of a single probe.
///
/// Ordinals are part of the wire format (§ codec) and are 1-based and
/// append-only: never renumber an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// The HTTP request completed and a response was read.
    Result,
    /// A network-level client error (connection reset, DNS, TLS, ...).
    ClientError,
    /// The request or body read did not complete before the deadline.
    TimeoutError,
    /// Any other failure.
    Error,
}

impl ResultKind {
    fn ordinal(self) -> u8 {
        match self {
            ResultKind::Result => 1,
            ResultKind::ClientError => 2,
            ResultKind::TimeoutError => 3,
            ResultKind::Error => 4,
        }
    }

    fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            1 => Some(ResultKind::Result),
            2 => Some(ResultKind::ClientError),
            3 => Some(ResultKind::TimeoutError),
            4 => Some(ResultKind::Error),
            _ => None,
        }
    }

    /// `true` for the non-failure outcome.
    pub fn is_success(self) -> bool {
        matches!(self, ResultKind::Result)
    }
}

/// Content-pattern match verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// The configured pattern matched the response body.
    Found,
    /// No pattern was configured for this URL.
    NoPattern,
    /// A pattern was configured but did not match.
    NotFound,
    /// The probe failed before a body could be evaluated.
    Irrelevant,
}

impl Pattern {
    fn ordinal(self) -> u8 {
        match self {
            Pattern::Found => 1,
            Pattern::NoPattern => 2,
            Pattern::NotFound => 3,
            Pattern::Irrelevant => 4,
        }
    }

    fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            1 => Some(Pattern::Found),
            2 => Some(Pattern::NoPattern),
            3 => Some(Pattern::NotFound),
            4 => Some(Pattern::Irrelevant),
            _ => None,
        }
    }
}

/// The tagged outcome of one probe against one configured URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub result_type: ResultKind,
    pub url: String,
    /// Wall-clock probe duration in seconds; 0 on failure.
    pub response_time: f64,
    /// HTTP status code; 0 on failure.
    pub status_code: u16,
    pub pattern: Pattern,
    /// Milliseconds since the UNIX epoch, assigned once at creation.
    pub utc_timestamp_ms: i64,
}

impl ProbeResult {
    /// Builds a successful probe outcome.
    pub fn success(url: impl Into<String>, response_time: f64, status_code: u16, pattern: Pattern) -> Self {
        Self {
            result_type: ResultKind::Result,
            url: url.into(),
            response_time,
            status_code,
            pattern,
            utc_timestamp_ms: utc_now_ms(),
        }
    }

    /// Builds a failure outcome. `response_time`, `status_code`, and
    /// `pattern` are forced to their failure-path values per the invariant.
    pub fn failure(kind: ResultKind, url: impl Into<String>) -> Self {
        assert!(!kind.is_success(), "failure() called with ResultKind::Result");
        Self {
            result_type: kind,
            url: url.into(),
            response_time: 0.0,
            status_code: 0,
            pattern: Pattern::Irrelevant,
            utc_timestamp_ms: utc_now_ms(),
        }
    }

    /// Encodes this result into the six-line wire format described at the
    /// crate level. No trailing newline.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.result_type.ordinal(),
            self.url,
            self.response_time,
            self.status_code,
            self.pattern.ordinal(),
            self.utc_timestamp_ms,
        )
        .into_bytes()
    }

    /// Decodes a result from bytes produced by [`ProbeResult::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::new(bytes))?;
        let mut lines = text.split('\n');

        let mut next = || lines.next().ok_or_else(|| DecodeError::new(bytes));

        let result_type = next()?;
        let url = next()?;
        let response_time = next()?;
        let status_code = next()?;
        let pattern = next()?;
        let utc_timestamp_ms = next()?;

        if lines.next().is_some() {
            return Err(DecodeError::new(bytes));
        }

        let result_type = result_type
            .parse::<u8>()
            .ok()
            .and_then(ResultKind::from_ordinal)
            .ok_or_else(|| DecodeError::new(bytes))?;
        let pattern = pattern
            .parse::<u8>()
            .ok()
            .and_then(Pattern::from_ordinal)
            .ok_or_else(|| DecodeError::new(bytes))?;

        Ok(ProbeResult {
            result_type,
            url: url.to_string(),
            response_time: response_time.parse().map_err(|_| DecodeError::new(bytes))?,
            status_code: status_code.parse().map_err(|_| DecodeError::new(bytes))?,
            pattern,
            utc_timestamp_ms: utc_timestamp_ms.parse().map_err(|_| DecodeError::new(bytes))?,
        })
    }
}

/// The offending input is carried on the error for diagnostics in the
/// Consumer's "decode failure, skip message" path.
#[derive(Debug, Clone)]
pub struct DecodeError {
    pub input: Vec<u8>,
}

impl DecodeError {
    fn new(input: &[u8]) -> Self {
        Self { input: input.to_vec() }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} is not a valid ProbeResult representation",
            String::from_utf8_lossy(&self.input)
        )
    }
}

impl std::error::Error for DecodeError {}

fn utc_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProbeResult {
        ProbeResult {
            result_type: ResultKind::Result,
            url: "wow.web".to_string(),
            response_time: 0.359,
            status_code: 200,
            pattern: Pattern::NoPattern,
            utc_timestamp_ms: 719,
        }
    }

    #[test]
    fn encode_matches_fixed_line_order() {
        let r = sample();
        assert_eq!(r.encode(), b"1\nwow.web\n0.359\n200\n2\n719");
    }

    #[test]
    fn decode_matches_scenario_6() {
        let bytes = b"1\nwow.web\n0.359\n200\n2\n719";
        let r = ProbeResult::decode(bytes).unwrap();
        assert_eq!(r, sample());
    }

    #[test]
    fn round_trip_success() {
        let r = sample();
        assert_eq!(ProbeResult::decode(&r.encode()).unwrap(), r);
    }

    #[test]
    fn round_trip_failure() {
        let r = ProbeResult::failure(ResultKind::TimeoutError, "such.web");
        let decoded = ProbeResult::decode(&r.encode()).unwrap();
        assert_eq!(decoded.response_time, 0.0);
        assert_eq!(decoded.status_code, 0);
        assert_eq!(decoded.pattern, Pattern::Irrelevant);
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        let err = ProbeResult::decode(b"1\nurl\n0.1\n200\n2").unwrap_err();
        assert!(err.to_string().contains("not a valid ProbeResult"));
    }

    #[test]
    fn decode_rejects_bad_numeric_field() {
        assert!(ProbeResult::decode(b"1\nurl\nNOT_A_FLOAT\n200\n2\n1").is_err());
    }

    #[test]
    fn decode_rejects_unknown_ordinal() {
        assert!(ProbeResult::decode(b"9\nurl\n0.1\n200\n2\n1").is_err());
    }

    #[test]
    #[should_panic]
    fn failure_rejects_success_kind() {
        ProbeResult::failure(ResultKind::Result, "oops");
    }
}
