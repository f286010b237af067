use std::fmt;

use super::ServerId;

/// Marker separating the server from its annotation in a blacklist line
pub const ANNOTATION_MARKER: char = '#';

/// Why a server was blacklisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistReason {
    /// No sample produced data
    Dead,
    /// Excluded by a region/operator rule; carries the matched labels
    PolicyBlocked(String),
    /// Free-text annotation (hand-written or legacy lines)
    Note(String),
}

impl fmt::Display for BlacklistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlacklistReason::Dead => f.write_str("dead"),
            BlacklistReason::PolicyBlocked(detail) if detail.is_empty() => {
                f.write_str("policy-blocked")
            }
            BlacklistReason::PolicyBlocked(detail) => write!(f, "policy-blocked: {detail}"),
            BlacklistReason::Note(note) => f.write_str(note),
        }
    }
}

/// One blacklist line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub server: ServerId,
    pub reason: BlacklistReason,
}

impl BlacklistEntry {
    pub fn new(server: ServerId, reason: BlacklistReason) -> Self {
        Self { server, reason }
    }

    /// Render as a single line without the trailing newline
    ///
    /// Line breaks inside the annotation are flattened so an entry can never
    /// spill onto a second line.
    pub fn to_line(&self) -> String {
        let reason = self.reason.to_string();
        let reason = reason.replace(['\r', '\n'], " ");
        let reason = reason.trim();
        if reason.is_empty() {
            self.server.to_string()
        } else {
            format!("{} {} {}", self.server, ANNOTATION_MARKER, reason)
        }
    }

    /// Parse a stored line, tolerating any annotation after the marker
    ///
    /// Returns `None` for blank or unparseable lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (server, annotation) = match line.split_once(ANNOTATION_MARKER) {
            Some((server, annotation)) => (server, Some(annotation.trim())),
            None => (line, None),
        };

        let server: ServerId = server.trim().parse().ok()?;
        let reason = match annotation {
            None | Some("") => BlacklistReason::Note(String::new()),
            Some("dead") => BlacklistReason::Dead,
            Some(text) => match text.strip_prefix("policy-blocked") {
                Some(detail) => BlacklistReason::PolicyBlocked(
                    detail.trim_start_matches(':').trim().to_string(),
                ),
                None => BlacklistReason::Note(text.to_string()),
            },
        };

        Some(Self { server, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let server = ServerId::new("10.0.0.1", 80);
        assert_eq!(
            BlacklistEntry::new(server.clone(), BlacklistReason::Dead).to_line(),
            "10.0.0.1:80 # dead"
        );
        assert_eq!(
            BlacklistEntry::new(
                server.clone(),
                BlacklistReason::PolicyBlocked("Shanghai China Telecom".into())
            )
            .to_line(),
            "10.0.0.1:80 # policy-blocked: Shanghai China Telecom"
        );
        assert_eq!(
            BlacklistEntry::new(server, BlacklistReason::Note("a\nb".into())).to_line(),
            "10.0.0.1:80 # a b"
        );
    }

    #[test]
    fn test_parse_written_lines() {
        let dead = BlacklistEntry::parse_line("10.0.0.1:80 # dead").unwrap();
        assert_eq!(dead.reason, BlacklistReason::Dead);

        let blocked =
            BlacklistEntry::parse_line("10.0.0.2:80 # policy-blocked: Jiangsu Chinanet").unwrap();
        assert_eq!(
            blocked.reason,
            BlacklistReason::PolicyBlocked("Jiangsu Chinanet".into())
        );
    }

    #[test]
    fn test_parse_tolerates_legacy_and_bare_lines() {
        let legacy = BlacklistEntry::parse_line("  58.50.205.3:4022 # 死链 ").unwrap();
        assert_eq!(legacy.server.to_string(), "58.50.205.3:4022");
        assert_eq!(legacy.reason, BlacklistReason::Note("死链".into()));

        let bare = BlacklistEntry::parse_line("58.50.205.3:4022").unwrap();
        assert_eq!(bare.server.to_string(), "58.50.205.3:4022");

        assert!(BlacklistEntry::parse_line("").is_none());
        assert!(BlacklistEntry::parse_line("# just a comment").is_none());
        assert!(BlacklistEntry::parse_line("not-a-server # dead").is_none());
    }
}
