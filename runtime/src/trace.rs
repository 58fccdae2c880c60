//! Stack trace trimming for failure reports.
//!
//! Frames arrive innermost first. Trimming drops frames from the standard
//! library, the async runtime and the failure constructor itself, then stops
//! at the first frame that belongs to the transport layer: everything past it
//! is request plumbing that looks the same for every failure.

/// Frames with these path prefixes never describe application code.
pub const INTERNAL_FRAME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "tokio::",
    "futures_util::",
    "futures_core::",
    "txapi_core::error::",
    "__rust",
    "rust_begin_unwind",
];

/// Transport frames that end the useful part of a trace.
pub const DEFAULT_TRANSPORT_MARKERS: &[&str] = &["axum::", "hyper::", "tower::", "tower_http::"];

/// Removes framework frames from stack traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceTrimmer {
    transport_markers: Vec<String>,
}

impl Default for TraceTrimmer {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSPORT_MARKERS.iter().copied())
    }
}

impl TraceTrimmer {
    /// Create a trimmer that stops at frames starting with any of `markers`.
    #[must_use]
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transport_markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Trim `frames`.
    ///
    /// With `origin_only`, only the first application frame is kept: the
    /// point where the failure was raised.
    #[must_use]
    pub fn trim(&self, frames: &[String], origin_only: bool) -> Vec<String> {
        let limit = if origin_only { 1 } else { usize::MAX };
        frames
            .iter()
            .map(String::as_str)
            .take_while(|frame| !self.is_transport(frame))
            .filter(|frame| !is_internal(frame))
            .take(limit)
            .map(str::to_string)
            .collect()
    }

    fn is_transport(&self, frame: &str) -> bool {
        let path = symbol_path(frame);
        self.transport_markers
            .iter()
            .any(|marker| path.starts_with(marker.as_str()))
    }
}

fn is_internal(frame: &str) -> bool {
    let path = symbol_path(frame);
    INTERNAL_FRAME_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// Symbol path without generic-impl brackets: `<axum::Foo as Bar>::f` reads
/// as `axum::Foo as Bar>::f`.
fn symbol_path(frame: &str) -> &str {
    frame.trim_start().trim_start_matches('<')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_drops_internal_and_stops_at_transport() {
        let trace = frames(&[
            "txapi_core::error::ApiError::new at core/src/error.rs:121:13",
            "std::backtrace::Backtrace::capture",
            "orders::place::handler at src/place.rs:40:9",
            "<core::pin::Pin<P> as core::future::Future>::poll",
            "orders::place::validate at src/place.rs:12:5",
            "<axum::handler::HandlerService as tower::Service>::call",
            "orders::main at src/main.rs:3:1",
        ]);

        assert_eq!(
            TraceTrimmer::default().trim(&trace, false),
            frames(&[
                "orders::place::handler at src/place.rs:40:9",
                "orders::place::validate at src/place.rs:12:5",
            ])
        );
    }

    #[test]
    fn test_origin_only_keeps_first_application_frame() {
        let trace = frames(&[
            "txapi_core::error::ApiError::invalid_input",
            "orders::place::validate",
            "orders::place::handler",
        ]);

        assert_eq!(
            TraceTrimmer::default().trim(&trace, true),
            frames(&["orders::place::validate"])
        );
    }

    #[test]
    fn test_custom_markers() {
        let trimmer = TraceTrimmer::new(["my_transport::"]);
        let trace = frames(&["app::a", "my_transport::serve", "app::b"]);
        assert_eq!(trimmer.trim(&trace, false), frames(&["app::a"]));
    }

    #[test]
    fn test_empty_trace() {
        assert!(TraceTrimmer::default().trim(&[], false).is_empty());
    }
}
