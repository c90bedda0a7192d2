//! Plain line reassembly for finite streams.

/// Reassembles complete lines from transport chunks, holding any
/// unterminated tail unconditionally until more bytes arrive.
///
/// This is the simple sibling of [`crate::ChunkBuffer`]: no marker, no hold
/// heuristic. It suits finite downloads (a tabular file fetched in chunks)
/// where the stream is known to end and every held tail will be resolved by
/// either another chunk or [`LineBuffer::finish`].
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Option<Vec<u8>>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one chunk, returning the complete lines it closed out.
    ///
    /// Returned lines carry neither `\n` nor a trailing `\r`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            rest = &tail[1..];
            lines.push(self.take_joined(trim_cr(line)));
        }

        if !rest.is_empty() {
            let tail = self.take_joined(rest);
            self.pending = Some(tail);
        }

        lines
    }

    /// Flushes the stream, returning a final unterminated line if one is held.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        self.pending.take()
    }

    fn take_joined(&mut self, piece: &[u8]) -> Vec<u8> {
        match self.pending.take() {
            Some(mut held) => {
                held.extend_from_slice(piece);
                held
            }
            None => piece.to_vec(),
        }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', body)) => body,
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reassembles_lines_across_chunks() {
        let mut buf = LineBuffer::new();
        let mut lines = buf.feed(b"id\tname\n12\tbron");
        lines.extend(buf.feed(b"ze bowl\n34\tamulet\n"));
        assert_eq!(
            lines,
            vec![
                b"id\tname".to_vec(),
                b"12\tbronze bowl".to_vec(),
                b"34\tamulet".to_vec(),
            ]
        );
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn finish_returns_the_unterminated_tail() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.feed(b"last row without newline"), Vec::<Vec<u8>>::new());
        assert_eq!(buf.finish(), Some(b"last row without newline".to_vec()));
    }

    #[test]
    fn handles_crlf_and_empty_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.feed(b"a\r\n\r\nb\n");
        assert_eq!(lines, vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }
}
