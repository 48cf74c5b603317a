use core::ops::Range;

use heapless::Vec;

/// Line terminator.
pub const EOL: &[u8] = b"\r\n";

/// Bytes received but not yet dropped, and how far lines have been framed.
///
/// `start_of_line <= len` always holds. Bytes before `start_of_line` belong to lines already
/// delivered, they stay until the next [`flush`](ParserBuffer::flush) so pattern matchers can
/// still see them.
///
/// After [`discard_line`](ParserBuffer::discard_line) the rest of the overlong line is skipped
/// as it arrives, see [`skip_discarded`](ParserBuffer::skip_discarded).
pub struct ParserBuffer<const N: usize> {
    bytes: Vec<u8, N>,
    start_of_line: usize,
    discarding: bool,
    after_cr: bool,
}

impl<const N: usize> Default for ParserBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ParserBuffer<N> {
    /// An empty buffer.
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            start_of_line: 0,
            discarding: false,
            after_cr: false,
        }
    }

    /// Everything buffered.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Where the next line starts.
    pub fn start_of_line(&self) -> usize {
        self.start_of_line
    }

    /// The partial line after the last terminator.
    pub fn unframed(&self) -> &[u8] {
        &self.bytes[self.start_of_line..]
    }

    /// Bytes buffered.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Room left.
    pub fn free(&self) -> usize {
        N - self.bytes.len()
    }

    /// Append `data`, nothing is appended if it does not fit.
    #[allow(clippy::result_unit_err)]
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ()> {
        self.bytes.extend_from_slice(data)
    }

    /// Frame the next complete line, returns its range without the terminator.
    ///
    /// Scans from `start_of_line`, a terminator split across two appends is found once both
    /// halves are in.
    pub fn next_line(&mut self) -> Option<Range<usize>> {
        let start = self.start_of_line;
        let offset = self.bytes[start..]
            .windows(EOL.len())
            .position(|window| window == EOL)?;
        let end = start + offset;
        self.start_of_line = end + EOL.len();
        Some(start..end)
    }

    /// Drop the lines already framed.
    pub fn flush(&mut self) {
        self.consume(self.start_of_line);
    }

    /// Drop the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.bytes.len());
        if n == 0 {
            return;
        }
        let len = self.bytes.len();
        self.bytes.copy_within(n.., 0);
        self.bytes.truncate(len - n);
        self.start_of_line = self.start_of_line.saturating_sub(n);
    }

    /// Drop everything, including a line being skipped.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.start_of_line = 0;
        self.discarding = false;
        self.after_cr = false;
    }

    /// Drop everything and skip the rest of the unframed line up to its terminator.
    ///
    /// With no partial line buffered there is nothing to skip.
    pub fn discard_line(&mut self) {
        let partial = !self.unframed().is_empty();
        let after_cr = self.bytes.last() == Some(&b'\r');
        self.clear();
        self.discarding = partial;
        self.after_cr = partial && after_cr;
    }

    /// True while the rest of a discarded line is being skipped.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Skip what still belongs to a discarded line, returns the bytes after its terminator.
    ///
    /// All of `data` is skipped while no terminator shows up, a terminator split across two
    /// calls ends the line as well.
    pub fn skip_discarded<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        if !self.discarding {
            return data;
        }
        for (i, &byte) in data.iter().enumerate() {
            if self.after_cr && byte == b'\n' {
                self.discarding = false;
                self.after_cr = false;
                return &data[i + 1..];
            }
            self.after_cr = byte == b'\r';
        }
        &[]
    }
}
