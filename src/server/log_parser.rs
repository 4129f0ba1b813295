//! Startup detection from the server's log stream.
//!
//! The server has no structured readiness API; the only signal is its
//! free-text log output. Classification is a table of line matchers and
//! field extractors, so log-format drift in a future server version stays
//! a localized table change.

use regex::Regex;

/// A fact extracted from one log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogEvent {
    /// The node reported its operational state
    Started,
    /// The server announced its process id
    Pid(u32),
    /// The HTTP transport published its bound address
    HttpPort(u16),
    /// The internal transport published its bound address
    TransportPort(u16),
}

type Matcher = fn(&str) -> bool;
type Extractor = fn(&LineClassifier, &str) -> Option<LogEvent>;

/// Matcher table over raw log lines. Entries are tried in order; the first
/// whose matcher hits gets to extract.
pub(crate) struct LineClassifier {
    pid_pattern: Regex,
    address_pattern: Regex,
    table: &'static [(Matcher, Extractor)],
}

const TABLE: &[(Matcher, Extractor)] = &[
    (is_started_line, extract_started),
    (is_pid_line, extract_pid),
    (is_http_address_line, extract_http_port),
    (is_transport_address_line, extract_transport_port),
];

impl LineClassifier {
    pub(crate) fn new() -> Self {
        Self {
            pid_pattern: Regex::new(r"pid\[(\d+)\]").expect("pid pattern is valid"),
            address_pattern: Regex::new(r"publish_address \{.*?:(\d+)\}")
                .expect("address pattern is valid"),
            table: TABLE,
        }
    }

    pub(crate) fn classify(&self, line: &str) -> Option<LogEvent> {
        self.table
            .iter()
            .find(|(matches, _)| matches(line))
            .and_then(|(_, extract)| extract(self, line))
    }

    fn captured_number(&self, pattern: &Regex, line: &str) -> Option<u32> {
        pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .and_then(|capture| capture.as_str().parse().ok())
    }
}

fn is_started_line(line: &str) -> bool {
    line.contains("] started")
}

fn is_pid_line(line: &str) -> bool {
    line.contains(", pid[")
}

// The HTTP module logged itself as "[http" up to 2.x and as an
// "...HttpServer..." class afterwards
fn is_http_address_line(line: &str) -> bool {
    line.contains("publish_address") && (line.contains("[http") || line.contains("HttpServer"))
}

fn is_transport_address_line(line: &str) -> bool {
    line.contains("publish_address")
        && (line.contains("[transport") || line.contains("TransportService"))
}

fn extract_started(_classifier: &LineClassifier, _line: &str) -> Option<LogEvent> {
    Some(LogEvent::Started)
}

fn extract_pid(classifier: &LineClassifier, line: &str) -> Option<LogEvent> {
    classifier
        .captured_number(&classifier.pid_pattern, line)
        .map(LogEvent::Pid)
}

fn extract_http_port(classifier: &LineClassifier, line: &str) -> Option<LogEvent> {
    classifier
        .captured_number(&classifier.address_pattern, line)
        .and_then(|port| u16::try_from(port).ok())
        .map(LogEvent::HttpPort)
}

fn extract_transport_port(classifier: &LineClassifier, line: &str) -> Option<LogEvent> {
    classifier
        .captured_number(&classifier.address_pattern, line)
        .and_then(|port| u16::try_from(port).ok())
        .map(LogEvent::TransportPort)
}
