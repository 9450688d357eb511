//! SOAP envelopes and response scanning
//!
//! Responses are scanned by element local name, ignoring namespace
//! prefixes. That is enough for the handful of flat ONVIF responses the
//! recorder reads. Quoted attribute values, comments and CDATA sections are
//! skipped as units; DTDs are not supported.

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope""#,
    r#" xmlns:tds="http://www.onvif.org/ver10/device/wsdl""#,
    r#" xmlns:trt="http://www.onvif.org/ver10/media/wsdl""#,
    r#" xmlns:tt="http://www.onvif.org/ver10/schema">"#,
    "<s:Body>"
);
const ENVELOPE_CLOSE: &str = "</s:Body></s:Envelope>";

pub fn envelope(body: &str) -> String {
    format!("{}{}{}", ENVELOPE_OPEN, body, ENVELOPE_CLOSE)
}

/// An element found in a document
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    attrs: &'a str,
    inner: &'a str,
}

impl<'a> Element<'a> {
    /// Raw content between the start and end tag
    pub fn inner(&self) -> &'a str {
        self.inner
    }

    /// Trimmed, unescaped text content. A CDATA section is returned verbatim.
    pub fn text(&self) -> String {
        let inner = self.inner.trim();
        match inner
            .strip_prefix("<![CDATA[")
            .and_then(|rest| rest.strip_suffix("]]>"))
        {
            Some(raw) => raw.to_string(),
            None => unescape(inner),
        }
    }

    /// Attribute value by local name
    pub fn attr(&self, name: &str) -> Option<String> {
        let mut rest = self.attrs;
        while let Some(eq) = rest.find('=') {
            let key = rest[..eq].trim();
            let key = key.rsplit(':').next().unwrap_or(key);
            let after = rest[eq + 1..].trim_start();
            let quote = after.chars().next()?;
            if quote != '"' && quote != '\'' {
                return None;
            }
            let close = after[1..].find(quote)?;
            let value = &after[1..1 + close];
            if key == name {
                return Some(unescape(value));
            }
            rest = &after[close + 2..];
        }
        None
    }

    /// First descendant with the given local name
    pub fn child(&self, local_name: &str) -> Option<Element<'a>> {
        first(self.inner, local_name)
    }

    /// Text of the first descendant with the given local name
    pub fn child_text(&self, local_name: &str) -> Option<String> {
        self.child(local_name).map(|e| e.text())
    }
}

/// All elements with the given local name, in document order. Elements
/// nested inside a match are not reported separately.
pub fn elements<'a>(xml: &'a str, local_name: &str) -> Vec<Element<'a>> {
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset;
        let Some(tag) = parse_tag(xml, start) else {
            break;
        };
        pos = tag.end;

        if tag.closing || local(tag.name) != local_name {
            continue;
        }

        if tag.self_closing {
            found.push(Element {
                attrs: tag.attrs,
                inner: "",
            });
            continue;
        }

        match find_close(xml, tag.end, tag.name) {
            Some((inner_end, after)) => {
                found.push(Element {
                    attrs: tag.attrs,
                    inner: &xml[tag.end..inner_end],
                });
                pos = after;
            }
            None => break,
        }
    }

    found
}

/// First element with the given local name
pub fn first<'a>(xml: &'a str, local_name: &str) -> Option<Element<'a>> {
    elements(xml, local_name).into_iter().next()
}

/// Reason text of a SOAP fault, if the document is one
pub fn fault_reason(xml: &str) -> Option<String> {
    let fault = first(xml, "Fault")?;
    let reason = fault
        .child("Reason")
        .and_then(|r| r.child_text("Text"))
        .or_else(|| fault.child_text("faultstring"))
        .unwrap_or_else(|| "unknown fault".to_string());
    Some(reason)
}

struct Tag<'a> {
    name: &'a str,
    attrs: &'a str,
    closing: bool,
    self_closing: bool,
    /// Byte offset just past `>`
    end: usize,
}

fn parse_tag(xml: &str, start: usize) -> Option<Tag<'_>> {
    let rest = &xml[start..];

    // Comments, CDATA, declarations and processing instructions carry no
    // elements.
    for (open, close) in [("<!--", "-->"), ("<![CDATA[", "]]>")] {
        if rest.starts_with(open) {
            let end = start + open.len() + rest[open.len()..].find(close)? + close.len();
            return Some(Tag::skipped(end));
        }
    }

    let close = start + tag_end(rest)?;
    let body = &xml[start + 1..close];
    if body.starts_with('?') || body.starts_with('!') {
        return Some(Tag::skipped(close + 1));
    }

    let closing = body.starts_with('/');
    let self_closing = body.ends_with('/');
    let body = body.trim_start_matches('/').trim_end_matches('/');
    let name_end = body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(body.len());

    Some(Tag {
        name: &body[..name_end],
        attrs: &body[name_end..],
        closing,
        self_closing,
        end: close + 1,
    })
}

impl Tag<'_> {
    fn skipped(end: usize) -> Self {
        Tag {
            name: "",
            attrs: "",
            closing: true,
            self_closing: false,
            end,
        }
    }
}

/// Offset of the `>` closing the tag at the start of `s`, ignoring any
/// inside quoted attribute values
fn tag_end(s: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

// Matching end tag of `name`, honouring nested elements of the same name.
fn find_close(xml: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut pos = from;

    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset;
        let tag = parse_tag(xml, start)?;
        pos = tag.end;

        if tag.name != name {
            continue;
        }
        if tag.closing {
            if depth == 0 {
                return Some((start, tag.end));
            }
            depth -= 1;
        } else if !tag.self_closing {
            depth += 1;
        }
    }

    None
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .and_then(|semi| entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
