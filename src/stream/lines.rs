use memchr::memchr_iter;

/// Splits decoded text into complete newline-delimited lines.
///
/// Feed it text in whatever pieces the transport produced; it returns every
/// line that is now complete and keeps the unterminated tail until the next
/// push. A single trailing `\r` is stripped from each line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
    read_offset: usize,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return the lines it completed, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.push_into(text, &mut out);
        out
    }

    /// Append `text` and push completed lines into a caller-provided buffer.
    pub fn push_into(&mut self, text: &str, out: &mut Vec<String>) {
        if text.is_empty() {
            return;
        }
        // The pending tail never holds a newline, so only new text is scanned.
        let scan_start = self.buffer.len();
        self.buffer.push_str(text);

        let mut line_start = self.read_offset;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            out.push(strip_cr(&self.buffer[line_start..line_end]).to_owned());
            line_start = line_end + 1;
        }

        self.read_offset = line_start;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// The unterminated tail not yet returned as a line.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer[self.read_offset..]
    }

    /// Flush the tail at end of stream as one final line, if non-empty.
    pub fn finish(&mut self) -> Option<String> {
        let tail = strip_cr(self.pending()).to_owned();
        self.buffer.clear();
        self.read_offset = 0;
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }
}

#[inline]
fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}
