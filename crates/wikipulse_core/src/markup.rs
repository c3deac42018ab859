//! Minimal HTML element scanner.
//!
//! Only what the history parser needs: locate elements by attribute, find the
//! matching close tag of an element, and collect the text inside it. Not a
//! conforming HTML parser; comments are skipped and quoted attribute values
//! may contain `>`.

use std::collections::BTreeMap;

/// An opening tag found in the document, with byte offsets into the source.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    /// Offset of the `<` of the opening tag.
    pub start: usize,
    /// Offset of the `>` of the opening tag.
    pub open_end: usize,
    pub self_closing: bool,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|item| item == class))
    }
}

/// Every opening tag in `html`, in document order.
pub fn scan_elements(html: &str) -> Vec<Element> {
    let mut output = Vec::new();
    let mut index = 0usize;

    while index < html.len() {
        let Some(lt) = html[index..].find('<') else {
            break;
        };
        let at = index + lt;
        if starts_with_at(html, at, "<!--") {
            index = match html[at + 4..].find("-->") {
                Some(end) => at + 4 + end + 3,
                None => html.len(),
            };
            continue;
        }
        let Some(name) = tag_name_at(html, at) else {
            index = at + 1;
            continue;
        };
        let Some(end) = find_tag_end(html, at) else {
            break;
        };
        let raw = &html[at..=end];
        output.push(Element {
            attrs: parse_attributes(raw, name.len()),
            self_closing: raw.ends_with("/>"),
            name,
            start: at,
            open_end: end,
        });
        index = end + 1;
    }

    output
}

/// First element whose `id` attribute equals `id`.
pub fn find_element_by_id(html: &str, id: &str) -> Option<Element> {
    scan_elements(html)
        .into_iter()
        .find(|element| element.attr("id") == Some(id))
}

/// Raw markup between the opening tag of `element` and its matching close tag.
///
/// An unclosed element runs to the end of the document.
pub fn inner_html<'a>(html: &'a str, element: &Element) -> &'a str {
    if element.self_closing {
        return "";
    }
    let body_start = element.open_end + 1;
    let body_end = find_matching_close(html, &element.name, body_start).unwrap_or(html.len());
    &html[body_start..body_end]
}

/// Text content of `fragment`: tags dropped, entities decoded, whitespace collapsed.
pub fn text_content(fragment: &str) -> String {
    let mut text = String::new();
    let mut index = 0usize;
    while index < fragment.len() {
        let Some(lt) = fragment[index..].find('<') else {
            text.push_str(&fragment[index..]);
            break;
        };
        let at = index + lt;
        text.push_str(&fragment[index..at]);
        match find_tag_end(fragment, at) {
            Some(end) => index = end + 1,
            None => break,
        }
    }
    decode_html(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_matching_close(html: &str, tag_name: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut index = from;
    while index < html.len() {
        let lt = html[index..].find('<')?;
        let at = index + lt;
        if starts_with_at(html, at, "<!--") {
            index = at + 4 + html[at + 4..].find("-->")? + 3;
            continue;
        }
        if is_close_tag_at(html, at, tag_name) {
            depth -= 1;
            if depth == 0 {
                return Some(at);
            }
            index = at + 2;
            continue;
        }
        if tag_name_at(html, at).is_some_and(|name| name == tag_name) {
            let end = find_tag_end(html, at)?;
            if html.as_bytes().get(end.wrapping_sub(1)).copied() != Some(b'/') {
                depth += 1;
            }
            index = end + 1;
            continue;
        }
        index = at + 1;
    }
    None
}

fn tag_name_at(html: &str, at: usize) -> Option<String> {
    let bytes = html.as_bytes();
    if bytes.get(at).copied() != Some(b'<') {
        return None;
    }
    let start = at + 1;
    let mut index = start;
    while index < bytes.len() && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'-') {
        index += 1;
    }
    if index == start || !bytes[start].is_ascii_alphabetic() {
        return None;
    }
    match bytes.get(index).copied() {
        Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/') => {
            Some(html[start..index].to_ascii_lowercase())
        }
        _ => None,
    }
}

fn is_close_tag_at(html: &str, at: usize, tag_name: &str) -> bool {
    let bytes = html.as_bytes();
    if !starts_with_at(html, at, "</") {
        return false;
    }
    let mut index = at + 2;
    for expected in tag_name.as_bytes() {
        let Some(actual) = bytes.get(index) else {
            return false;
        };
        if !actual.eq_ignore_ascii_case(expected) {
            return false;
        }
        index += 1;
    }
    matches!(
        bytes.get(index).copied(),
        Some(b' ' | b'\t' | b'\n' | b'\r' | b'>')
    )
}

/// Offset of the `>` that closes the tag opened at `start`; quoted attribute
/// values may contain `>`.
fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, byte) in html.bytes().enumerate().skip(start) {
        match (quote, byte) {
            (Some(open), _) if byte == open => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some(offset),
            (None, _) => {}
        }
    }
    None
}

/// Attributes of the opening tag `tag_raw` (`<name ...>`). Names are
/// lowercased, the first occurrence of a name wins, values are decoded here.
fn parse_attributes(tag_raw: &str, name_len: usize) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let mut rest = tag_raw[name_len + 1..].trim_end_matches('>');

    loop {
        rest = rest.trim_start_matches(|ch: char| ch.is_ascii_whitespace() || ch == '/');
        if rest.is_empty() {
            break;
        }
        let name_end = rest
            .find(|ch: char| ch.is_ascii_whitespace() || ch == '=' || ch == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let mut raw_value = "";
        if let Some(after_eq) = rest.strip_prefix('=') {
            (raw_value, rest) = split_attribute_value(after_eq.trim_start());
        }
        if !name.is_empty() {
            attrs.entry(name).or_insert_with(|| decode_html(raw_value));
        }
    }

    attrs
}

/// Split a quoted or bare attribute value off the front of `text`.
fn split_attribute_value(text: &str) -> (&str, &str) {
    if let Some(quote) = text.chars().next().filter(|ch| *ch == '"' || *ch == '\'') {
        let body = &text[1..];
        return match body.find(quote) {
            Some(end) => (&body[..end], &body[end + 1..]),
            None => (body, ""),
        };
    }
    let end = text
        .find(|ch: char| ch.is_ascii_whitespace())
        .unwrap_or(text.len());
    text.split_at(end)
}

fn starts_with_at(text: &str, index: usize, sequence: &str) -> bool {
    text.as_bytes()
        .get(index..index + sequence.len())
        .is_some_and(|slice| slice == sequence.as_bytes())
}

fn decode_html(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
