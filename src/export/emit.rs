//! Writing exports back out.
//!
//! The ingesting tool was written against PyYAML's block style, so that's what
//! we produce: two-space nesting, sequences under a mapping key not indented,
//! the first key of a mapping in a sequence on the dash line. Tags come out as
//! `!tag 'value'` for scalars and `key: !tag` followed by the nested block for
//! mappings. Strings that a YAML reader would resolve as something other than
//! a string are quoted.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use serde_yaml::Value;

use super::{
    document::ExportDocument,
    node::{Mapping, Node},
};
use crate::error::{Error, Result};

/// Render an export in the ingesting tool's dialect.
pub fn to_yaml_string(doc: &ExportDocument) -> String {
    let mut out = String::new();
    write_mapping(&mut out, &doc.to_mapping(), 0, false);
    out
}

pub fn write_document<W: Write>(doc: &ExportDocument, mut dest: W) -> std::io::Result<()> {
    dest.write_all(to_yaml_string(doc).as_bytes())?;
    dest.flush()
}

/// Write an export to `path`, refusing to replace an existing file unless
/// `overwrite` is set.
pub fn write_to_path(doc: &ExportDocument, path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Err(Error::OutputExists(path.to_owned()));
    }

    let file = File::create(path).map_err(Error::io(path))?;
    write_document(doc, BufWriter::new(file)).map_err(Error::io(path))
}

/// Render an arbitrary node as a standalone document.
pub fn node_to_yaml(node: &Node) -> String {
    let mut out = String::new();

    match node {
        Node::Map(m) if !m.is_empty() => write_mapping(&mut out, m, 0, false),
        Node::Seq(s) if !s.is_empty() => write_sequence(&mut out, s, 0, false),
        other => {
            out.push_str(&scalar(other));
            out.push('\n');
        }
    }

    out
}

fn pad(out: &mut String, indent: usize) {
    out.extend(std::iter::repeat(' ').take(indent));
}

/// Non-empty collections are written in block style; everything else fits on
/// one line.
fn block_collection(node: &Node) -> Option<&Node> {
    match node {
        Node::Map(m) if !m.is_empty() => Some(node),
        Node::Seq(s) if !s.is_empty() => Some(node),
        _ => None,
    }
}

fn write_mapping(out: &mut String, map: &Mapping, indent: usize, inline_first: bool) {
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 || !inline_first {
            pad(out, indent);
        }

        out.push_str(&string(key));
        out.push(':');
        write_mapping_value(out, value, indent);
    }
}

fn write_mapping_value(out: &mut String, value: &Node, indent: usize) {
    let (tag, inner) = match value {
        Node::Tagged(tag, inner) if block_collection(inner).is_some() => (Some(tag), &**inner),
        other => (None, other),
    };

    if let Some(tag) = tag {
        out.push_str(" !");
        out.push_str(tag);
    }

    match inner {
        Node::Map(m) if !m.is_empty() => {
            out.push('\n');
            write_mapping(out, m, indent + 2, false);
        }
        Node::Seq(s) if !s.is_empty() => {
            out.push('\n');
            write_sequence(out, s, indent, false);
        }
        other => {
            out.push(' ');
            out.push_str(&scalar(other));
            out.push('\n');
        }
    }
}

fn write_sequence(out: &mut String, items: &[Node], indent: usize, inline_first: bool) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 || !inline_first {
            pad(out, indent);
        }

        out.push_str("- ");
        write_sequence_item(out, item, indent + 2);
    }
}

fn write_sequence_item(out: &mut String, item: &Node, indent: usize) {
    match item {
        Node::Map(m) if !m.is_empty() => write_mapping(out, m, indent, true),
        Node::Seq(s) if !s.is_empty() => write_sequence(out, s, indent, true),
        Node::Tagged(tag, inner) if block_collection(inner).is_some() => {
            out.push('!');
            out.push_str(tag);
            out.push('\n');

            match &**inner {
                Node::Map(m) => write_mapping(out, m, indent, false),
                Node::Seq(s) => write_sequence(out, s, indent, false),
                _ => {}
            }
        }
        other => {
            out.push_str(&scalar(other));
            out.push('\n');
        }
    }
}

/// One-line rendering of a scalar, an empty collection, or a tagged one of
/// those.
fn scalar(node: &Node) -> String {
    match node {
        Node::Null => "null".to_owned(),
        Node::Bool(b) => b.to_string(),
        Node::Int(i) => i.to_string(),
        Node::Float(f) => float(*f),
        Node::Str(s) => string(s),
        Node::Seq(_) => "[]".to_owned(),
        Node::Map(_) => "{}".to_owned(),
        Node::Tagged(tag, inner) => match &**inner {
            // Tagged strings are always quoted, the way registry exports
            // write them.
            Node::Str(s) if needs_double_quotes(s) => format!("!{tag} {}", double_quoted(s)),
            Node::Str(s) => format!("!{tag} {}", single_quoted(s)),
            other => format!("!{tag} {}", scalar(other)),
        },
    }
}

/// Floats the way Python's `repr` writes them, which always includes a `.`
/// and uses a signed two-digit exponent outside `[1e-4, 1e16)`.
fn float(f: f64) -> String {
    if f.is_nan() {
        return ".nan".to_owned();
    }

    if f.is_infinite() {
        return if f > 0. { ".inf" } else { "-.inf" }.to_owned();
    }

    let magnitude = f.abs();

    if magnitude == 0. || (1e-4..1e16).contains(&magnitude) {
        // Debug formatting is shortest-round-trip and keeps a trailing `.0`.
        return format!("{f:?}");
    }

    let text = format!("{f:e}");
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exponent),
    };
    let dot = if mantissa.contains('.') { "" } else { ".0" };
    format!("{mantissa}{dot}e{sign}{digits:0>2}")
}

fn string(s: &str) -> String {
    if needs_double_quotes(s) {
        double_quoted(s)
    } else if needs_quotes(s) {
        single_quoted(s)
    } else {
        s.to_owned()
    }
}

fn single_quoted(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn needs_double_quotes(s: &str) -> bool {
    s.chars().any(|c| !(' '..='~').contains(&c))
}

fn double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');

    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1b' => out.push_str("\\e"),
            ' '..='~' => out.push(c),
            c if (c as u32) <= 0xff => out.push_str(&format!("\\x{:02X}", c as u32)),
            c if (c as u32) <= 0xffff => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push_str(&format!("\\U{:08X}", c as u32)),
        }
    }

    out.push('"');
    out
}

/// Whether a printable-ASCII string can't be written plain.
fn needs_quotes(s: &str) -> bool {
    if s.is_empty() || s.starts_with(' ') || s.ends_with(' ') {
        return true;
    }

    let first = s.as_bytes()[0];

    if b"#,[]{}&*!|>'\"%@`".contains(&first) {
        return true;
    }

    if matches!(first, b'-' | b'?' | b':') && (s.len() == 1 || s.as_bytes()[1] == b' ') {
        return true;
    }

    if s.contains(": ") || s.contains(" #") || s.ends_with(':') {
        return true;
    }

    if resolves_as_non_string_yaml11(s) {
        return true;
    }

    // Finally, make sure our own reader would hand the same string back.
    !matches!(serde_yaml::from_str::<Value>(s), Ok(Value::String(ref back)) if back == s)
}

/// The YAML 1.1 implicit resolvers, which is what PyYAML-based readers apply.
fn resolves_as_non_string_yaml11(s: &str) -> bool {
    is_null(s) || is_bool(s) || is_int(s) || is_float(s) || is_timestamp(s) || s == "<<" || s == "="
}

fn is_null(s: &str) -> bool {
    matches!(s, "~" | "null" | "Null" | "NULL")
}

fn is_bool(s: &str) -> bool {
    matches!(
        s,
        "yes" | "Yes" | "YES" | "no" | "No" | "NO" | "true" | "True" | "TRUE" | "false"
            | "False" | "FALSE" | "on" | "On" | "ON" | "off" | "Off" | "OFF"
    )
}

fn strip_sign(s: &str) -> &str {
    s.strip_prefix(['-', '+']).unwrap_or(s)
}

fn all_of(s: &str, allowed: impl Fn(char) -> bool) -> bool {
    !s.is_empty() && s.chars().all(allowed)
}

fn digit_or_underscore(c: char) -> bool {
    c.is_ascii_digit() || c == '_'
}

/// `(:[0-5]?[0-9])+`, the tail of a base-60 number.
fn is_sexagesimal_tail(s: &str) -> bool {
    let mut parts = s.split(':');

    parts.next() == Some("")
        && parts.all(|p| {
            let b = p.as_bytes();
            match b.len() {
                1 => b[0].is_ascii_digit(),
                2 => (b'0'..=b'5').contains(&b[0]) && b[1].is_ascii_digit(),
                _ => false,
            }
        })
}

fn is_int(s: &str) -> bool {
    let body = strip_sign(s);

    if let Some(bits) = body.strip_prefix("0b") {
        return all_of(bits, |c| c == '0' || c == '1' || c == '_');
    }

    if let Some(hex) = body.strip_prefix("0x") {
        return all_of(hex, |c| c.is_ascii_hexdigit() || c == '_');
    }

    if body == "0" {
        return true;
    }

    if let Some(oct) = body.strip_prefix('0') {
        return all_of(oct, |c| ('0'..='7').contains(&c) || c == '_');
    }

    if !body.starts_with(|c: char| ('1'..='9').contains(&c)) {
        return false;
    }

    match body.find(':') {
        None => all_of(body, digit_or_underscore),
        Some(i) => all_of(&body[..i], digit_or_underscore) && is_sexagesimal_tail(&body[i..]),
    }
}

fn is_float(s: &str) -> bool {
    if matches!(s, ".nan" | ".NaN" | ".NAN") {
        return true;
    }

    let body = strip_sign(s);

    if matches!(body, ".inf" | ".Inf" | ".INF") {
        return true;
    }

    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };

    if let Some(exp) = exponent {
        let digits = match exp.strip_prefix(['-', '+']) {
            Some(d) => d,
            None => return false,
        };

        if !all_of(digits, |c| c.is_ascii_digit()) {
            return false;
        }
    }

    let Some(dot) = mantissa.find('.') else {
        return false;
    };
    let (whole, frac) = (&mantissa[..dot], &mantissa[dot + 1..]);

    if !frac.chars().all(digit_or_underscore) {
        return false;
    }

    if whole.is_empty() {
        return frac.starts_with(|c: char| c.is_ascii_digit());
    }

    if !whole.starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }

    match whole.find(':') {
        None => whole.chars().all(digit_or_underscore),
        Some(i) => {
            exponent.is_none()
                && whole[..i].chars().all(digit_or_underscore)
                && is_sexagesimal_tail(&whole[i..])
        }
    }
}

/// `YYYY-MM-DD`, optionally followed by a time.
fn is_timestamp(s: &str) -> bool {
    let b = s.as_bytes();

    if b.len() < 8 || !b[..4].iter().all(u8::is_ascii_digit) || b[4] != b'-' {
        return false;
    }

    let rest = &s[5..];
    let mut fields = rest.splitn(2, '-');
    let month = fields.next().unwrap_or("");
    let Some(tail) = fields.next() else {
        return false;
    };

    let day_len = tail.bytes().take_while(u8::is_ascii_digit).count();
    let digits_ok = |f: &str| (1..=2).contains(&f.len()) && f.bytes().all(|c| c.is_ascii_digit());

    if !digits_ok(month) || !(1..=2).contains(&day_len) {
        return false;
    }

    let after = &tail[day_len..];

    if after.is_empty() {
        return month.len() == 2 && day_len == 2;
    }

    after.starts_with(['T', 't', ' ', '\t'])
}
