//! Wake-word list parsing and transcript matching.
//!
//! The list is stored as one comma-separated string.  Matching is
//! case-sensitive substring containment with no normalisation: a transcript
//! matches if any trimmed, non-empty token occurs in it.

/// Parsed wake-word list.  Order is kept, duplicates are not removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakewordList {
    tokens: Vec<String>,
}

impl WakewordList {
    /// Split `raw` on commas, trim each piece and drop the empty ones.
    ///
    /// ```
    /// use sentio_wakeword::wakeword::WakewordList;
    ///
    /// let list = WakewordList::parse(" hello , ,help,");
    /// assert_eq!(list.tokens(), ["hello", "help"]);
    /// ```
    pub fn parse(raw: &str) -> Self {
        let tokens = raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// First token (in list order) contained in `transcript`.
    pub fn first_match(&self, transcript: &str) -> Option<&str> {
        if transcript.is_empty() {
            return None;
        }
        self.tokens
            .iter()
            .map(String::as_str)
            .find(|token| transcript.contains(token))
    }

    pub fn matches(&self, transcript: &str) -> bool {
        self.first_match(transcript).is_some()
    }
}

/// `true` iff some token of the comma-separated `wakewords` is a substring of
/// `transcript`.
///
/// ```
/// use sentio_wakeword::wakeword::matches;
///
/// assert!(matches("hello,help", "say hello now"));
/// assert!(!matches("Hello", "say hello now"));
/// assert!(!matches("", "anything"));
/// ```
pub fn matches(wakewords: &str, transcript: &str) -> bool {
    WakewordList::parse(wakewords).matches(transcript)
}
