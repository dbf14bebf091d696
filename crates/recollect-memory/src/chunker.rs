use recollect_core::{RecollectError, RecollectResult};

const PARAGRAPH_BREAK: [char; 2] = ['\n', '\n'];
const SENTENCE_BREAK: [char; 2] = ['.', ' '];

/// Split `text` into overlapping windows of at most `max_chars` characters.
///
/// Text that already fits is returned whole. Otherwise each window prefers to
/// end at the last paragraph break past its midpoint, then just after the last
/// sentence end past its midpoint, and falls back to a hard cut. The next
/// window starts `overlap_chars` before the previous one ended, so
/// consecutive windows share context and together cover the whole input.
/// Windows are trimmed; windows that are pure whitespace are dropped.
///
/// Lengths are counted in `char`s, so multi-byte text is never split inside
/// a code point.
pub fn chunk_text(
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> RecollectResult<Vec<String>> {
    if max_chars == 0 {
        return Err(RecollectError::Validation(
            "max_chars must be greater than zero".to_string(),
        ));
    }
    if overlap_chars >= max_chars {
        return Err(RecollectError::Validation(format!(
            "overlap ({overlap_chars}) must be smaller than max_chars ({max_chars})"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len <= max_chars {
        return Ok(vec![text.to_string()]);
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + max_chars).min(len);

        if end < len {
            let midpoint = start + max_chars / 2;
            let window = &chars[start..end];
            if let Some(pos) = rfind(window, &PARAGRAPH_BREAK)
                .map(|p| start + p)
                .filter(|&p| p > midpoint)
            {
                end = pos;
            } else if let Some(pos) = rfind(window, &SENTENCE_BREAK)
                .map(|p| start + p)
                .filter(|&p| p > midpoint)
            {
                // Keep the period, drop the space.
                end = pos + 1;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= len {
            break;
        }
        // A break-shortened window may be shorter than the overlap.
        start = if end > start + overlap_chars {
            end - overlap_chars
        } else {
            end
        };
    }

    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    Ok(chunks)
}

/// Position of the last occurrence of `needle` that lies entirely in `haystack`.
fn rfind(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}
