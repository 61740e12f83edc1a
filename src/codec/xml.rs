//! `application/xml`.
//!
//! Documents map onto elements under a `<document>` root:
//!
//! - object members become child elements named after their key (keys that
//!   are not XML names become `<entry key="..">`);
//! - array elements become `<item>` children of an element typed `array`;
//! - numbers, booleans and `null` carry `type="number"`, `"boolean"` or
//!   `"null"`; untyped text is a string.
//!
//! Decoding reads the same shape back. Elements with children and no
//! `type` are objects, and repeated child names collect into an array, so
//! hand-written XML without `type` attributes decodes to objects and
//! strings.

use std::collections::HashSet;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Number, Value};

use super::{Codec, CodecError};

const CONTENT_TYPE: &str = "application/xml";
const ROOT: &str = "document";
const ITEM: &str = "item";
const ENTRY: &str = "entry";

/// `application/xml` via quick-xml.
#[derive(Clone, Copy, Debug, Default)]
pub struct XmlCodec;

impl Codec for XmlCodec {
    fn content_type(&self) -> &str {
        CONTENT_TYPE
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut writer = Writer::new(Vec::new());
        emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        write_value(&mut writer, ROOT, value)?;
        Ok(writer.into_inner())
    }

    fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
        let mut reader = Reader::from_reader(body);
        loop {
            match reader.read_event().map_err(invalid)? {
                Event::Start(start) => {
                    let element = Element::parse(&start)?;
                    return read_content(&mut reader, element.kind.as_deref());
                }
                Event::Empty(start) => {
                    let element = Element::parse(&start)?;
                    return scalar(element.kind.as_deref(), "");
                }
                Event::Eof => return Err(invalid("document has no root element")),
                _ => {}
            }
        }
    }
}

fn invalid(e: impl std::fmt::Display) -> CodecError {
    CodecError::new(CONTENT_TYPE, e)
}

// ── encoding ──────────────────────────────────────────────────────────────────

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CodecError> {
    writer.write_event(event).map_err(invalid)
}

fn write_value(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<(), CodecError> {
    let tag = if is_xml_name(name) { name } else { ENTRY };
    let mut start = BytesStart::new(tag);
    if tag != name {
        start.push_attribute(("key", name));
    }

    let text = match value {
        Value::Null => {
            start.push_attribute(("type", "null"));
            return emit(writer, Event::Empty(start));
        }
        Value::Bool(b) => {
            start.push_attribute(("type", "boolean"));
            b.to_string()
        }
        Value::Number(n) => {
            start.push_attribute(("type", "number"));
            n.to_string()
        }
        Value::String(s) if s.is_empty() => return emit(writer, Event::Empty(start)),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            start.push_attribute(("type", "array"));
            if items.is_empty() {
                return emit(writer, Event::Empty(start));
            }
            emit(writer, Event::Start(start))?;
            for item in items {
                write_value(writer, ITEM, item)?;
            }
            return emit(writer, Event::End(BytesEnd::new(tag)));
        }
        Value::Object(members) => {
            if members.is_empty() {
                start.push_attribute(("type", "object"));
                return emit(writer, Event::Empty(start));
            }
            emit(writer, Event::Start(start))?;
            for (key, member) in members {
                write_value(writer, key, member)?;
            }
            return emit(writer, Event::End(BytesEnd::new(tag)));
        }
    };

    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(&text)))?;
    emit(writer, Event::End(BytesEnd::new(tag)))
}

/// Conservative XML `Name` check: ASCII letters, digits, `_`, `-` and `.`,
/// not starting with a digit, `-`, `.` or `xml`.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("xml"))
}

// ── decoding ──────────────────────────────────────────────────────────────────

struct Element {
    name: String,
    kind: Option<String>,
}

impl Element {
    fn parse(start: &BytesStart<'_>) -> Result<Self, CodecError> {
        let mut name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut kind = None;
        for attr in start.attributes() {
            let attr = attr.map_err(invalid)?;
            match attr.key.as_ref() {
                b"type" => kind = Some(attr.unescape_value().map_err(invalid)?.into_owned()),
                b"key" if name == ENTRY => name = attr.unescape_value().map_err(invalid)?.into_owned(),
                _ => {}
            }
        }
        Ok(Self { name, kind })
    }
}

/// Reads up to the end tag of the element just opened.
fn read_content(reader: &mut Reader<&[u8]>, kind: Option<&str>) -> Result<Value, CodecError> {
    let mut text = String::new();
    let mut children: Vec<(String, Value)> = Vec::new();

    loop {
        match reader.read_event().map_err(invalid)? {
            Event::Start(start) => {
                let element = Element::parse(&start)?;
                let value = read_content(reader, element.kind.as_deref())?;
                children.push((element.name, value));
            }
            Event::Empty(start) => {
                let element = Element::parse(&start)?;
                let value = scalar(element.kind.as_deref(), "")?;
                children.push((element.name, value));
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(invalid)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) => break,
            Event::Eof => return Err(invalid("unexpected end of document")),
            _ => {}
        }
    }

    match kind {
        Some("array") => Ok(Value::Array(children.into_iter().map(|(_, v)| v).collect())),
        Some("object") => Ok(object(children)),
        None if !children.is_empty() => Ok(object(children)),
        _ => scalar(kind, &text),
    }
}

fn scalar(kind: Option<&str>, text: &str) -> Result<Value, CodecError> {
    match kind {
        None | Some("string") => Ok(Value::String(text.to_owned())),
        Some("null") => Ok(Value::Null),
        Some("boolean") => text.trim().parse::<bool>()
            .map(Value::Bool)
            .map_err(|_| invalid(format!("invalid boolean {text:?}"))),
        Some("number") => text.trim().parse::<Number>()
            .map(Value::Number)
            .map_err(|_| invalid(format!("invalid number {text:?}"))),
        Some("array") => Ok(Value::Array(Vec::new())),
        Some("object") => Ok(Value::Object(Map::new())),
        Some(other) => Err(invalid(format!("unknown element type {other:?}"))),
    }
}

/// Children to members; a name seen more than once becomes an array.
fn object(children: Vec<(String, Value)>) -> Value {
    let mut members = Map::new();
    let mut repeated = HashSet::new();
    for (name, value) in children {
        match members.get_mut(&name) {
            Some(Value::Array(items)) if repeated.contains(&name) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
                repeated.insert(name);
            }
            None => {
                members.insert(name, value);
            }
        }
    }
    Value::Object(members)
}
