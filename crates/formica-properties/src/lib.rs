//! A range-preserving parser for Java `.properties` files.
//!
//! Build files pull external definitions in through `<property file=...>` and
//! properties-format `typedef` resources; entries keep their source ranges so
//! "go to declaration" can land inside the external file.

use formica_core::{TextRange, TextSize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyEntry {
    pub key: String,
    pub value: String,
    pub key_range: TextRange,
    pub value_range: TextRange,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertiesFile {
    pub entries: Vec<PropertyEntry>,
}

impl PropertiesFile {
    /// First entry for `key`. Later duplicates are kept in `entries` but do
    /// not shadow the first one, matching the first-definition-wins rule the
    /// build model applies to properties.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

/// Parse a `.properties` file into key/value entries.
#[must_use]
pub fn parse(text: &str) -> PropertiesFile {
    let bytes = text.as_bytes();
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let before = pos;
        while pos < bytes.len() && is_inline_ws(bytes[pos]) {
            pos += 1;
        }
        match bytes.get(pos) {
            None => break,
            Some(b'\r') | Some(b'\n') => {
                pos = eat_newline(bytes, pos);
                continue;
            }
            // Comment lines never continue, even when they end in `\`.
            Some(b'#') | Some(b'!') => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
                continue;
            }
            Some(_) => {}
        }

        let (line, next) = next_logical_line(bytes, pos);
        if let Some(entry) = parse_entry(&line) {
            entries.push(entry);
        }
        // Guarantee progress on pathological inputs.
        pos = next.max(before + 1);
    }

    PropertiesFile { entries }
}

struct LogicalLine {
    /// Continuation-joined content, escapes still present.
    raw: Vec<u8>,
    /// Input offset of `raw[0]`; the first `first_segment_len` bytes of `raw`
    /// map one-to-one onto the input starting there.
    start: usize,
    first_segment_len: usize,
    /// Content span in the input (trailing newlines excluded).
    span: TextRange,
}

impl LogicalLine {
    /// Map a range over `raw` back to the input. Precise while the slice
    /// stays within the first physical segment; spans that cross a
    /// continuation degrade to the whole line.
    fn range_of(&self, from: usize, to: usize) -> TextRange {
        if to <= self.first_segment_len {
            return range(self.start + from, self.start + to);
        }
        if from <= self.first_segment_len {
            return TextRange::new(size(self.start + from), self.span.end());
        }
        self.span
    }
}

fn next_logical_line(bytes: &[u8], mut pos: usize) -> (LogicalLine, usize) {
    let start = pos;
    let mut raw = Vec::new();
    let mut first_segment_len = None;
    let mut content_end = pos;

    loop {
        let seg_start = pos;
        while pos < bytes.len() && bytes[pos] != b'\n' && bytes[pos] != b'\r' {
            pos += 1;
        }
        let continues = odd_trailing_backslashes(&bytes[seg_start..pos]);
        let copy_end = if continues { pos - 1 } else { pos };
        raw.extend_from_slice(&bytes[seg_start..copy_end]);
        if first_segment_len.is_none() {
            first_segment_len = Some(copy_end - seg_start);
        }
        content_end = copy_end;

        pos = eat_newline(bytes, pos);
        if !continues || pos >= bytes.len() {
            break;
        }
        // Leading whitespace of a continuation line is not part of the value.
        while pos < bytes.len() && is_inline_ws(bytes[pos]) {
            pos += 1;
        }
    }

    let line = LogicalLine {
        raw,
        start,
        first_segment_len: first_segment_len.unwrap_or(0),
        span: range(start, content_end),
    };
    (line, pos)
}

fn parse_entry(line: &LogicalLine) -> Option<PropertyEntry> {
    let raw = &line.raw;
    let mut i = 0usize;
    while i < raw.len() && is_inline_ws(raw[i]) {
        i += 1;
    }
    if i >= raw.len() {
        return None;
    }

    let key_start = i;
    while i < raw.len() {
        match raw[i] {
            b'\\' => i += 2,
            b'=' | b':' => break,
            b if is_inline_ws(b) => break,
            _ => i += 1,
        }
    }
    let key_end = i.min(raw.len());

    while i < raw.len() && is_inline_ws(raw[i]) {
        i += 1;
    }
    if i < raw.len() && (raw[i] == b'=' || raw[i] == b':') {
        i += 1;
    }
    while i < raw.len() && is_inline_ws(raw[i]) {
        i += 1;
    }
    let value_start = i;

    Some(PropertyEntry {
        key: unescape(&raw[key_start..key_end]),
        value: unescape(&raw[value_start..]),
        key_range: line.range_of(key_start, key_end),
        value_range: line.range_of(value_start, raw.len()),
    })
}

fn eat_newline(bytes: &[u8], mut pos: usize) -> usize {
    if bytes.get(pos) == Some(&b'\r') {
        pos += 1;
    }
    if bytes.get(pos) == Some(&b'\n') {
        pos += 1;
    }
    pos
}

fn odd_trailing_backslashes(segment: &[u8]) -> bool {
    segment.iter().rev().take_while(|&&b| b == b'\\').count() % 2 == 1
}

fn is_inline_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\x0C')
}

fn unescape(raw: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(raw.len());
    let mut i = 0usize;
    while i < raw.len() {
        if raw[i] != b'\\' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&escaped) = raw.get(i) else {
            out.push(b'\\');
            break;
        };
        match escaped {
            b't' => out.push(b'\t'),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b'f' => out.push(b'\x0C'),
            b'u' => {
                let hex = raw.get(i + 1..i + 5);
                let code = hex
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .and_then(char::from_u32);
                match code {
                    Some(ch) => {
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        i += 4;
                    }
                    None => out.push(b'u'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn size(offset: usize) -> TextSize {
    TextSize::from(u32::try_from(offset).unwrap_or(u32::MAX))
}

fn range(start: usize, end: usize) -> TextRange {
    TextRange::new(size(start), size(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn slice(text: &str, range: TextRange) -> &str {
        &text[u32::from(range.start()) as usize..u32::from(range.end()) as usize]
    }

    #[test]
    fn parses_entries_with_all_separator_styles() {
        let text = "build.dir=out\nsrc.dir : src\nlib.dir  lib\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.entries[0].key, "build.dir");
        assert_eq!(parsed.entries[0].value, "out");
        assert_eq!(parsed.entries[1].key, "src.dir");
        assert_eq!(parsed.entries[1].value, "src");
        assert_eq!(parsed.entries[2].key, "lib.dir");
        assert_eq!(parsed.entries[2].value, "lib");
    }

    #[test]
    fn ranges_point_back_into_the_source() {
        let text = "# build settings\nversion = 1.4.2\n";
        let parsed = parse(text);
        let entry = &parsed.entries[0];
        assert_eq!(slice(text, entry.key_range), "version");
        assert_eq!(slice(text, entry.value_range), "1.4.2");
    }

    #[test]
    fn joins_continuation_lines() {
        let text = "classpath=a.jar:\\\n    b.jar\nnext=x\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].value, "a.jar:b.jar");
        assert_eq!(parsed.entries[1].key, "next");
        // Key stays precise; the value crossed a continuation so its range
        // runs to the end of the logical line.
        assert_eq!(slice(text, parsed.entries[0].key_range), "classpath");
        assert_eq!(
            slice(text, parsed.entries[0].value_range),
            "a.jar:\\\n    b.jar"
        );
    }

    #[test]
    fn decodes_escapes_in_keys_and_values() {
        let text = "path\\:sep=semi\ntabbed=a\\tb\nunicode=\\u00e9clair\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries[0].key, "path:sep");
        assert_eq!(parsed.entries[0].value, "semi");
        assert_eq!(parsed.entries[1].value, "a\tb");
        assert_eq!(parsed.entries[2].value, "\u{e9}clair");
    }

    #[test]
    fn comment_lines_never_continue() {
        let text = "# trailing backslash \\\nreal=value\n! bang comment\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].key, "real");
    }

    #[test]
    fn first_definition_wins_on_lookup() {
        let text = "name=first\nname=second\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.get("name").map(|e| e.value.as_str()), Some("first"));
        assert_eq!(parsed.get("missing"), None);
    }

    #[test]
    fn handles_crlf_and_empty_values() {
        let text = "empty=\r\nkeyonly\r\nreal=x\r\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.entries[0].value, "");
        assert_eq!(parsed.entries[1].key, "keyonly");
        assert_eq!(parsed.entries[1].value, "");
        assert_eq!(parsed.entries[2].value, "x");
    }

    #[test]
    fn utf8_values_survive_unescaping() {
        let text = "greeting=grüß dich\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries[0].value, "grüß dich");
    }
}
