use std::collections::HashSet;

/// Strip terminal escape sequences (CSI, OSC, charset selects, keypad
/// modes) using the strip-ansi-escapes crate, then normalize line
/// endings: `\r\n` and lone `\r` both become `\n`. Lossy UTF-8
/// conversion so partial reads never drop data.
pub fn strip_escapes(raw: &[u8]) -> String {
    let normalized = normalize_line_endings(raw);
    let stripped = strip_ansi_escapes::strip(&normalized);
    String::from_utf8_lossy(&stripped).into_owned()
}

fn normalize_line_endings(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut idx = 0;
    while idx < raw.len() {
        if raw[idx] == b'\r' {
            if raw.get(idx + 1) == Some(&b'\n') {
                idx += 1;
            }
            out.push(b'\n');
        } else {
            out.push(raw[idx]);
        }
        idx += 1;
    }
    out
}

/// Count of printable (non-whitespace) characters, used by agent startup
/// to decide whether a banner actually arrived.
pub fn printable_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Line-level filter applied when preparing a reply for display and
/// history storage. Holds the lowercased noise keyword set from config.
#[derive(Debug, Clone)]
pub struct LineFilter {
    noise_keywords: Vec<String>,
}

impl LineFilter {
    pub fn new(noise_keywords: &[String]) -> Self {
        Self {
            noise_keywords: noise_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Reduce escape-stripped text to the logical reply lines:
    /// - drop lines that trim to empty
    /// - drop the echo of the last sent command
    /// - drop shell-prompt lines, and prompt-prefixed lines whose
    ///   remainder is empty or the echo
    /// - drop divider lines of box/rule characters
    /// - drop lines containing a configured noise keyword
    /// - de-duplicate repeated lines, preserving first-seen order
    pub fn clean(&self, text: &str, last_sent: Option<&str>, prompt: Option<&str>) -> Vec<String> {
        let echo = last_sent.map(str::trim);
        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty());

        let mut seen: HashSet<String> = HashSet::new();
        let mut lines = Vec::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if echo.is_some_and(|e| e == line) {
                continue;
            }
            if let Some(p) = prompt {
                if line == p {
                    continue;
                }
                if let Some(rest) = line.strip_prefix(p) {
                    let rest = rest.trim();
                    if rest.is_empty() || echo.is_some_and(|e| e == rest) {
                        continue;
                    }
                }
            }
            if is_divider(line) {
                continue;
            }
            let lower = line.to_lowercase();
            if self.noise_keywords.iter().any(|k| lower.contains(k)) {
                continue;
            }
            if !seen.insert(line.to_string()) {
                continue;
            }
            lines.push(line.to_string());
        }

        lines
    }
}

/// A divider is a non-empty run of box/rule characters
fn is_divider(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '─' | '—' | '-' | '·' | ' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(strip_escapes(b"hello world"), "hello world");
    }

    #[test]
    fn test_csi_sequences_stripped() {
        assert_eq!(strip_escapes(b"\x1b[32mgreen\x1b[0m"), "green");
        assert_eq!(strip_escapes(b"\x1b[1;31mbold red\x1b[0m"), "bold red");
        // Private-mode CSI (cursor hide/show)
        assert_eq!(strip_escapes(b"\x1b[?25lhidden\x1b[?25h"), "hidden");
        // Cursor movement
        assert_eq!(strip_escapes(b"\x1b[Hstart\x1b[10;20H"), "start");
    }

    #[test]
    fn test_osc_sequences_stripped() {
        // BEL-terminated
        assert_eq!(strip_escapes(b"\x1b]0;title\x07text"), "text");
        // ST-terminated
        assert_eq!(strip_escapes(b"\x1b]8;;http://x\x1b\\link"), "link");
    }

    #[test]
    fn test_charset_and_keypad_sequences_stripped() {
        assert_eq!(strip_escapes(b"\x1b(Babc"), "abc");
        assert_eq!(strip_escapes(b"\x1b)0abc"), "abc");
        assert_eq!(strip_escapes(b"\x1b=abc\x1b>"), "abc");
    }

    #[test]
    fn test_line_ending_normalization() {
        assert_eq!(strip_escapes(b"a\r\nb"), "a\nb");
        assert_eq!(strip_escapes(b"a\rb"), "a\nb");
        assert_eq!(strip_escapes(b"a\r\r\nb"), "a\n\nb");
    }

    #[test]
    fn test_escape_only_input_yields_empty() {
        let escapes = b"\x1b[31m\x1b[0m\x1b]0;t\x07\x1b(B\x1b=\x1b>\x1b[?2004h";
        assert_eq!(strip_escapes(escapes), "");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let samples: [&[u8]; 3] = [
            b"\x1b[31mred\x1b[0m plain \x1b]0;t\x07",
            b"a\r\nb\rc",
            b"no escapes at all",
        ];
        for raw in samples {
            let once = strip_escapes(raw);
            let twice = strip_escapes(once.as_bytes());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_invalid_utf8_is_lossy_not_dropped() {
        let mut data = b"abc".to_vec();
        data.push(0xFF);
        data.extend_from_slice(b"def");
        let text = strip_escapes(&data);
        assert!(text.contains("abc"));
        assert!(text.contains("def"));
    }

    #[test]
    fn test_printable_chars() {
        assert_eq!(printable_chars("  \n\t "), 0);
        assert_eq!(printable_chars("ab c"), 3);
    }

    fn filter() -> LineFilter {
        LineFilter::new(&[
            "? for shortcuts".to_string(),
            "thinking…".to_string(),
            "esc to interrupt".to_string(),
        ])
    }

    #[test]
    fn test_clean_drops_empty_and_noise() {
        let text = "? for shortcuts\nThinking…\n\nreal answer\n[COMPLETE]\n";
        let lines = filter().clean(text, None, None);
        assert_eq!(lines, vec!["real answer", "[COMPLETE]"]);
    }

    #[test]
    fn test_clean_noise_is_case_insensitive() {
        let text = "ESC TO INTERRUPT\nkeep me";
        assert_eq!(filter().clean(text, None, None), vec!["keep me"]);
    }

    #[test]
    fn test_clean_suppresses_echo_and_prompt() {
        let text = "compute fib(10)\nclaude>\nclaude> compute fib(10)\n55";
        let lines = filter().clean(text, Some("compute fib(10)"), Some("claude>"));
        assert_eq!(lines, vec!["55"]);
    }

    #[test]
    fn test_clean_keeps_prompt_prefixed_content() {
        let text = "claude> something new";
        let lines = filter().clean(text, None, Some("claude>"));
        assert_eq!(lines, vec!["claude> something new"]);
    }

    #[test]
    fn test_clean_drops_dividers() {
        let text = "────────\n--- ---\n· · ·\n—\nanswer";
        assert_eq!(filter().clean(text, None, None), vec!["answer"]);
    }

    #[test]
    fn test_clean_dedupes_repeated_lines() {
        let text = "a\nb\na\nc\nb\na";
        assert_eq!(filter().clean(text, None, None), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let text = "x\nx\n\n────\ny";
        let once = filter().clean(text, None, None);
        let again = filter().clean(&once.join("\n"), None, None);
        assert_eq!(once, again);
    }
}
