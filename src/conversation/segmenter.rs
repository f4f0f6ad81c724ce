//! Sentence splitting for streamed model output
//!
//! Text arrives as arbitrary deltas; speech should start as soon as a whole
//! sentence is available. ASCII terminators only end a sentence when followed
//! by whitespace (so `3.14` survives), full-width ones end it immediately.

/// Characters that stay attached to the sentence they close
const CLOSERS: &[char] = &['"', '\'', '」', '』', '）', '】', ')', '”', '’'];

fn is_ascii_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_full_width_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

/// Accumulates deltas and yields complete sentences
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return every sentence it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        while let Some(end) = find_boundary(&self.buffer) {
            let sentence: String = self.buffer.drain(..end).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Flush whatever remains once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Byte offset just past the first complete sentence, if any
fn find_boundary(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\n' {
            return Some(i + 1);
        }

        let full_width = is_full_width_terminator(c);
        if !full_width && !is_ascii_terminator(c) {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            let absorbs = CLOSERS.contains(&next)
                || (full_width && is_full_width_terminator(next))
                || (!full_width && is_ascii_terminator(next));
            if !absorbs {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }

        match chars.peek() {
            Some(&(_, next)) if next.is_whitespace() => return Some(end),
            _ if full_width => return Some(end),
            _ => {}
        }
    }

    None
}
