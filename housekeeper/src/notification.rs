//! Plain-text notification messages.
//!
//! A message is rendered as three header lines, a blank line, then one line
//! per body entry:
//!
//! ```text
//! From: ops@example.com
//! To: oncall@example.com
//! Subject: Report file has changed!
//!
//! /srv/reports/daily.csv
//! ```
//!
//! No escaping or MIME structuring is applied. Rendering is pure: the same
//! inputs always produce byte-identical output.

use std::fmt;

/// Subject used for every rename notification.
pub const RENAME_SUBJECT: &str = "Report file has changed!";

/// Subject used for the aggregate sweep notification.
pub const SWEEP_SUBJECT: &str = "List log files have cleaned";

/// A composed notification, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    from: String,
    to: String,
    subject: String,
    body: Vec<String>,
}

impl NotificationMessage {
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Renders the message into the exact bytes handed to the transport.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NotificationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From: {}\nTo: {}\nSubject: {}\n\n",
            self.from, self.to, self.subject
        )?;
        for line in &self.body {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Builds a message from its parts, keeping body lines in input order.
pub fn compose<I, S>(from: &str, to: &str, subject: &str, lines: I) -> NotificationMessage
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    NotificationMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: subject.to_string(),
        body: lines.into_iter().map(Into::into).collect(),
    }
}
