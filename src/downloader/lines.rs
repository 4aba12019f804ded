//! Newline framing for streamed response bodies
//!
//! Chunks arrive at arbitrary boundaries; the splitter keeps the unfinished
//! tail of the previous chunk and hands out complete lines in order.

#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    buf: Vec<u8>,
    // Start of the first line not yet handed out
    start: usize,
    // Bytes before this offset are known to hold no newline past `start`
    scanned: usize,
}

impl LineSplitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, compacting already-consumed bytes first
    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line without its `\n` (or `\r\n`)
    pub(crate) fn next_line(&mut self) -> Option<&[u8]> {
        let from = self.scanned.max(self.start);
        let Some(pos) = self.buf[from..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let line_start = self.start;
        let line_end = from + pos;
        self.start = line_end + 1;
        self.scanned = self.start;
        Some(trim_cr(&self.buf[line_start..line_end]))
    }

    /// Whatever is left once the stream has ended
    pub(crate) fn finish(&mut self) -> Option<&[u8]> {
        let rest = trim_cr(&self.buf[self.start..]);
        self.start = self.buf.len();
        self.scanned = self.start;
        if rest.is_empty() { None } else { Some(rest) }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
