//! Parser for the plan capture command channel.
//!
//! The collector piggybacks commands on the metrics ingest response body:
//!
//! ```text
//! v1|th:<micros>|qp:<hash>|qp:<micros>:<hash>|qp:all|qp:<micros>:all
//! ```
//!
//! Bodies that are empty or carry another version tag are ignored. A
//! malformed directive is skipped on its own and never aborts the batch.

use crate::domain::capture::CaptureInitRequest;
use crate::domain::errors::DirectiveError;
use tracing::warn;

pub const PROTOCOL_VERSION: &str = "v1";

const ALL_PLANS: &str = "all";

/// A single `:`-separated directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `th:<micros>` sets the batch default threshold
    Threshold(i64),
    /// `qp:<hash>` or `qp:<micros>:<hash>`
    CapturePlan {
        hash: String,
        threshold_micros: Option<i64>,
    },
    /// `qp:all` or `qp:<micros>:all`
    CaptureAll { threshold_micros: Option<i64> },
}

impl Directive {
    pub fn parse(directive: &str) -> Result<Self, DirectiveError> {
        if let Some(rest) = directive.strip_prefix("th:") {
            return parse_micros(directive, rest).map(Directive::Threshold);
        }
        let Some(rest) = directive.strip_prefix("qp:") else {
            return Err(DirectiveError::UnknownDirective {
                directive: directive.to_string(),
            });
        };

        let fields: Vec<&str> = rest.split(':').collect();
        let (threshold_micros, hash) = match fields.as_slice() {
            [hash] => (None, *hash),
            [micros, hash] => (Some(parse_micros(directive, micros)?), *hash),
            _ => {
                return Err(DirectiveError::FieldCount {
                    directive: directive.to_string(),
                    count: fields.len() + 1,
                });
            }
        };

        if hash.is_empty() {
            return Err(DirectiveError::EmptyHash {
                directive: directive.to_string(),
            });
        }
        if hash == ALL_PLANS {
            return Ok(Directive::CaptureAll { threshold_micros });
        }
        Ok(Directive::CapturePlan {
            hash: hash.to_string(),
            threshold_micros,
        })
    }

    /// Apply this directive to the request being built, in encounter order.
    fn apply(self, request: &mut CaptureInitRequest) {
        match self {
            Directive::Threshold(micros) => request.set_default_threshold_micros(micros),
            Directive::CapturePlan {
                hash,
                threshold_micros,
            } => request.add(hash, threshold_micros),
            Directive::CaptureAll { threshold_micros } => {
                request.set_all();
                // qp:<micros>:all also becomes the batch default.
                if let Some(micros) = threshold_micros {
                    request.set_default_threshold_micros(micros);
                }
            }
        }
    }
}

fn parse_micros(directive: &str, value: &str) -> Result<i64, DirectiveError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| DirectiveError::InvalidThreshold {
            directive: directive.to_string(),
            value: value.to_string(),
        })
}

/// Parse a raw command body into a capture request.
///
/// Never fails: anything unusable yields an empty (no-op) request.
pub fn parse(raw: &str) -> CaptureInitRequest {
    let mut request = CaptureInitRequest::new();

    let mut segments = raw.trim().split('|');
    if segments.next() != Some(PROTOCOL_VERSION) {
        return request;
    }

    for segment in segments.map(str::trim).filter(|s| !s.is_empty()) {
        match Directive::parse(segment) {
            Ok(directive) => directive.apply(&mut request),
            Err(e) => warn!("CommandParser: Skipping directive: {}", e),
        }
    }
    request
}
