use std::sync::LazyLock;

use regex::Regex;

use crate::models::RawTable;

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<table\b[^>]*>(?P<body>.*?)</table\s*>")
        .expect("hardcoded table regex is valid")
});
static ROW_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<tr\b[^>]*>").expect("hardcoded row regex is valid")
});
static CELL_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<t(?:h|d)\b[^>]*>").expect("hardcoded cell regex is valid")
});
static CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</t[hdr]\s*>").expect("hardcoded close tag regex is valid")
});
static COLSPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)colspan\s*=\s*["']?(?P<span>\d+)"#).expect("hardcoded colspan regex is valid")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<[^>]+>").expect("hardcoded HTML tags regex is valid"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&#(?:(?P<dec>\d+)|[xX](?P<hex>[0-9a-fA-F]+));")
        .expect("hardcoded entity regex is valid")
});

const MAX_COLSPAN: usize = 64;

/// Every `<table>` in the document, in document order. Never fails; pages
/// without tables produce an empty vector.
pub fn parse_tables(html: &str) -> Vec<RawTable> {
    TABLE_RE
        .captures_iter(html)
        .filter_map(|capture| capture.name("body"))
        .map(|body| parse_table_body(body.as_str()))
        .filter(|table| !table.rows.is_empty())
        .collect()
}

fn parse_table_body(body: &str) -> RawTable {
    let rows = segments(&ROW_OPEN_RE, body)
        .into_iter()
        .map(|(_, row)| parse_row(row))
        .filter(|cells| !cells.is_empty())
        .collect();

    RawTable { rows }
}

/// Splits `text` at every match of `open`; each segment runs to the next
/// opening tag, so unclosed `<tr>`/`<td>` elements still parse.
fn segments<'a>(open: &Regex, text: &'a str) -> Vec<(&'a str, &'a str)> {
    let starts = open.find_iter(text).collect::<Vec<_>>();
    starts
        .iter()
        .enumerate()
        .map(|(index, tag)| {
            let end = starts.get(index + 1).map_or(text.len(), |next| next.start());
            let segment = &text[tag.end()..end];
            let body = CLOSE_RE
                .find(segment)
                .map_or(segment, |close| &segment[..close.start()]);
            (tag.as_str(), body)
        })
        .collect()
}

fn parse_row(row: &str) -> Vec<String> {
    let mut cells = Vec::new();

    for (tag, body) in segments(&CELL_OPEN_RE, row) {
        let span = COLSPAN_RE
            .captures(tag)
            .and_then(|span| span.name("span"))
            .and_then(|span| span.as_str().parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_COLSPAN);

        cells.extend(std::iter::repeat_n(cell_text(body), span));
    }

    cells
}

pub fn cell_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(input: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(input, |capture: &regex::Captures<'_>| {
        let code = if let Some(dec) = capture.name("dec") {
            dec.as_str().parse::<u32>().ok()
        } else {
            capture
                .name("hex")
                .and_then(|hex| u32::from_str_radix(hex.as_str(), 16).ok())
        };
        code.and_then(char::from_u32)
            .map_or_else(|| capture[0].to_string(), String::from)
    });

    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
