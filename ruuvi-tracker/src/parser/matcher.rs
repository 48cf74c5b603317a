use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ops::Range;
use core::str;

use regex_automata::meta::Regex;
use regex_automata::util::captures::Captures;
use regex_automata::{Anchored, Input};

use crate::Error;

/// What a callback wants done with the bytes it was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Retention {
    /// Done with them, they may be flushed.
    Release,
    /// Keep them buffered, more of the response is still to come.
    Keep,
}

/// A compiled regular expression.
#[derive(Clone, Debug)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self, Error> {
        match Regex::new(pattern) {
            Ok(regex) => Ok(Self { regex }),
            Err(error) => {
                log::error!("invalid pattern {:?}: {}", pattern, error);
                Err(Error::InvalidPattern)
            }
        }
    }

    /// True if the pattern matches anywhere in `haystack`.
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.regex.is_match(haystack)
    }
}

/// How a line matcher decides whether a line is for it.
#[derive(Clone, Debug)]
pub enum LineTest {
    /// The line starts with these bytes.
    Prefix(Vec<u8>),
    /// The line ends with these bytes.
    Suffix(Vec<u8>),
    /// The line contains these bytes.
    Contains(Vec<u8>),
    /// The line is exactly these bytes.
    Equals(Vec<u8>),
    /// The pattern matches somewhere in the line.
    Pattern(Pattern),
}

impl LineTest {
    /// [`LineTest::Prefix`].
    pub fn prefix(bytes: impl AsRef<[u8]>) -> Self {
        Self::Prefix(bytes.as_ref().to_vec())
    }

    /// [`LineTest::Suffix`].
    pub fn suffix(bytes: impl AsRef<[u8]>) -> Self {
        Self::Suffix(bytes.as_ref().to_vec())
    }

    /// [`LineTest::Contains`].
    pub fn contains(bytes: impl AsRef<[u8]>) -> Self {
        Self::Contains(bytes.as_ref().to_vec())
    }

    /// [`LineTest::Equals`].
    pub fn equals(bytes: impl AsRef<[u8]>) -> Self {
        Self::Equals(bytes.as_ref().to_vec())
    }

    /// [`LineTest::Pattern`], compiling `pattern`.
    pub fn pattern(pattern: &str) -> Result<Self, Error> {
        Pattern::new(pattern).map(Self::Pattern)
    }

    /// Apply the test.
    pub fn matches(&self, line: &[u8]) -> bool {
        match self {
            Self::Prefix(prefix) => line.starts_with(prefix),
            Self::Suffix(suffix) => line.ends_with(suffix),
            Self::Contains(needle) => {
                needle.is_empty() || line.windows(needle.len()).any(|w| w == needle.as_slice())
            }
            Self::Equals(bytes) => line == bytes.as_slice(),
            Self::Pattern(pattern) => pattern.is_match(line),
        }
    }
}

/// Where a pattern matcher may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum PatternMode {
    /// Anywhere in the buffer.
    Search,
    /// Only at the start of the buffer.
    Match,
}

/// A pattern match in the parser buffer, handed to pattern callbacks.
pub struct PatternMatch<'a> {
    haystack: &'a [u8],
    captures: &'a Captures,
}

impl<'a> PatternMatch<'a> {
    /// The matched bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.group(0).unwrap_or(&[])
    }

    /// The matched bytes as text, if they are UTF-8.
    pub fn as_str(&self) -> Option<&'a str> {
        str::from_utf8(self.as_bytes()).ok()
    }

    /// Where the match is in the buffer.
    pub fn range(&self) -> Range<usize> {
        self.captures
            .get_match()
            .map_or(0..0, |found| found.range())
    }

    /// A capture group, 0 being the whole match.
    pub fn group(&self, index: usize) -> Option<&'a [u8]> {
        let span = self.captures.get_group(index)?;
        self.haystack.get(span.range())
    }

    /// Number of groups, the whole match included.
    pub fn group_len(&self) -> usize {
        self.captures.group_len()
    }
}

pub(crate) type LineCallback = Box<dyn FnMut(&[u8]) -> Retention>;
pub(crate) type PatternCallback = Box<dyn FnMut(&PatternMatch<'_>) -> Retention>;

pub(crate) struct LineMatcher {
    pub(crate) id: &'static str,
    pub(crate) test: LineTest,
    pub(crate) callback: LineCallback,
}

pub(crate) struct PatternMatcher {
    pub(crate) id: &'static str,
    pattern: Pattern,
    mode: PatternMode,
    captures: Captures,
    callback: PatternCallback,
}

impl PatternMatcher {
    pub(crate) fn new(
        id: &'static str,
        pattern: Pattern,
        mode: PatternMode,
        callback: PatternCallback,
    ) -> Self {
        let captures = pattern.regex.create_captures();
        Self {
            id,
            pattern,
            mode,
            captures,
            callback,
        }
    }

    /// Search `haystack`, on a match invoke the callback. Returns the end of the match and what
    /// the callback wants.
    pub(crate) fn dispatch(&mut self, haystack: &[u8]) -> Option<(usize, Retention)> {
        let anchored = match self.mode {
            PatternMode::Search => Anchored::No,
            PatternMode::Match => Anchored::Yes,
        };
        let input = Input::new(haystack).anchored(anchored);
        self.pattern
            .regex
            .search_captures(&input, &mut self.captures);
        let end = self.captures.get_match()?.end();

        let found = PatternMatch {
            haystack,
            captures: &self.captures,
        };
        Some((end, (self.callback)(&found)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    #[test]
    fn line_tests() {
        assert!(LineTest::prefix("$GPRMC").matches(b"$GPRMC,1,2"));
        assert!(!LineTest::prefix("$GPRMC").matches(b"$GPGGA,1,2"));
        assert!(LineTest::suffix("OK").matches(b"AT OK"));
        assert!(LineTest::contains("CREG").matches(b"+CREG: 1"));
        assert!(LineTest::contains("").matches(b""));
        assert!(LineTest::equals("OK").matches(b"OK"));
        assert!(!LineTest::equals("OK").matches(b"OK "));
        let test = LineTest::pattern(r"^\$G[PLN]RMC,").unwrap();
        assert!(test.matches(b"$GNRMC,,V"));
        assert!(!test.matches(b"x$GNRMC,,V"));
    }

    #[test]
    fn invalid_pattern() {
        assert!(matches!(Pattern::new("(unclosed"), Err(Error::InvalidPattern)));
    }

    #[test]
    fn match_mode_is_anchored() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut matcher = PatternMatcher::new(
            "prompt",
            Pattern::new("> ").unwrap(),
            PatternMode::Match,
            Box::new(move |found: &PatternMatch<'_>| {
                sink.borrow_mut().push(found.range());
                Retention::Release
            }),
        );
        assert_eq!(matcher.dispatch(b"OK\r\n> "), None);
        assert_eq!(matcher.dispatch(b"> "), Some((2, Retention::Release)));
        assert_eq!(*seen.borrow(), [0..2]);
    }

    #[test]
    fn capture_groups() {
        let captured = Rc::new(RefCell::new(Vec::new()));
        let sink = captured.clone();
        let mut matcher = PatternMatcher::new(
            "cmgs",
            Pattern::new(r"\+CMGS: (\d+)\r\n").unwrap(),
            PatternMode::Search,
            Box::new(move |found: &PatternMatch<'_>| {
                sink.borrow_mut().extend_from_slice(found.group(1).unwrap_or(&[]));
                assert_eq!(found.group_len(), 2);
                assert_eq!(found.as_str(), Some("+CMGS: 17\r\n"));
                Retention::Keep
            }),
        );
        assert_eq!(
            matcher.dispatch(b"\r\n+CMGS: 17\r\n"),
            Some((13, Retention::Keep))
        );
        assert_eq!(captured.borrow().as_slice(), b"17");
    }
}
