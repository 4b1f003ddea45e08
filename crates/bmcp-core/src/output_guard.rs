//! Output-channel guard for stdout.
//!
//! In guarded mode stdout is the protocol transport, so anything that is not
//! the start of a structured message corrupts framing for every caller.
//! [`GuardedWriter`] is the last line of defence: it lets through chunks that
//! are blank or whose trimmed content starts with `{`, `[` or `"`, and drops
//! everything else while reporting success.
//!
//! Known limitation: a legitimate message whose trimmed form starts with
//! another character is indistinguishable from noise and is dropped too.

use std::io::{self, Write};

/// Lead bytes that open a structured protocol message.
const LEAD_BYTES: [u8; 3] = [b'{', b'[', b'"'];

/// Decide whether a chunk may reach the protocol channel.
pub fn is_protocol_chunk(chunk: &[u8]) -> bool {
    match chunk.iter().find(|b| !b.is_ascii_whitespace()) {
        // Empty or whitespace-only.
        None => true,
        Some(first) => LEAD_BYTES.contains(first),
    }
}

/// `io::Write` wrapper that filters non-protocol chunks.
///
/// Each call to `write` is treated as one chunk, so callers should hand it
/// whole frames (`write_all` of a serialized line).
#[derive(Debug)]
pub struct GuardedWriter<W: Write> {
    inner: W,
    guarded: bool,
    dropped: u64,
}

impl<W: Write> GuardedWriter<W> {
    /// Wrap `inner`, filtering chunks.
    pub fn new(inner: W) -> Self {
        Self { inner, guarded: true, dropped: 0 }
    }

    /// Wrap `inner` without filtering (guarded mode off).
    pub fn passthrough(inner: W) -> Self {
        Self { inner, guarded: false, dropped: 0 }
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// Number of chunks discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for GuardedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.guarded || is_protocol_chunk(buf) {
            return self.inner.write(buf);
        }
        self.dropped += 1;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(chunks: &[&str]) -> String {
        let mut w = GuardedWriter::new(Vec::new());
        for c in chunks {
            w.write_all(c.as_bytes()).unwrap();
        }
        w.flush().unwrap();
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn passes_structured_messages() {
        assert_eq!(written(&["{\"jsonrpc\":\"2.0\"}\n"]), "{\"jsonrpc\":\"2.0\"}\n");
        assert_eq!(written(&["[1,2]"]), "[1,2]");
        assert_eq!(written(&["\"str\""]), "\"str\"");
        assert_eq!(written(&["  \t{\"a\":1}"]), "  \t{\"a\":1}");
    }

    #[test]
    fn passes_blank_chunks_unchanged() {
        assert_eq!(written(&["\n"]), "\n");
        assert_eq!(written(&["   \r\n"]), "   \r\n");
        assert_eq!(written(&[""]), "");
    }

    #[test]
    fn drops_noise() {
        assert_eq!(written(&["Connecting to gateway...\n", "{}\n", "WARN something\n"]), "{}\n");
    }

    #[test]
    fn drop_reports_full_length_and_counts() {
        let mut w = GuardedWriter::new(Vec::new());
        assert_eq!(w.write(b"noise").unwrap(), 5);
        assert_eq!(w.dropped(), 1);
        assert!(w.get_ref().is_empty());
        assert!(w.flush().is_ok());
    }

    #[test]
    fn passthrough_keeps_everything() {
        let mut w = GuardedWriter::passthrough(Vec::new());
        w.write_all(b"plain text\n").unwrap();
        assert!(!w.is_guarded());
        assert_eq!(w.into_inner(), b"plain text\n");
    }
}
