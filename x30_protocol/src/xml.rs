//! Parsing and building of the `<PatrolDevice>` XML envelope carried in the
//! body of every frame.
use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ProtocolError, Result};

pub(crate) struct ParsedEnvelope {
    pub message_type_raw: u16,
    pub time: String,
    pub items: Vec<BTreeMap<String, String>>,
}

/// Walks a `<PatrolDevice>` document and collects its direct `Type`/`Time`
/// fields plus one map per `<Items>` child, keyed by that item's own child
/// element names. `Command` is read by the device but carries no information
/// we act on, so it is skipped.
pub(crate) fn parse_envelope(xml: &str) -> Result<ParsedEnvelope> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut depth = 0i32;
    let mut path: Vec<String> = Vec::new();
    let mut message_type_raw: Option<u16> = None;
    let mut time = String::new();
    let mut items = Vec::new();
    let mut current_item: Option<BTreeMap<String, String>> = None;
    let mut text_buf = String::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|err| ProtocolError::ParseError(err.to_string()))?
        {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                depth += 1;
                text_buf.clear();
                if depth == 2 && name == "Items" {
                    current_item = Some(BTreeMap::new());
                }
                path.push(name);
            }
            Event::Text(t) => {
                let decoded = t
                    .unescape()
                    .map_err(|err| ProtocolError::ParseError(err.to_string()))?;
                text_buf.push_str(&decoded);
            }
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                if depth == 3 {
                    if let Some(item) = current_item.as_mut() {
                        item.insert(name, std::mem::take(&mut text_buf));
                    }
                } else if depth == 2 {
                    match name.as_str() {
                        "Time" => time = std::mem::take(&mut text_buf),
                        "Type" => {
                            let raw = text_buf.trim();
                            message_type_raw =
                                Some(raw.parse().map_err(|_| ProtocolError::InvalidInt {
                                    field: "Type",
                                    value: raw.to_string(),
                                })?);
                        }
                        "Items" => {
                            if let Some(item) = current_item.take() {
                                items.push(item);
                            }
                        }
                        _ => {}
                    }
                }
                depth -= 1;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let message_type_raw = message_type_raw.ok_or(ProtocolError::MissingField("Type"))?;
    Ok(ParsedEnvelope {
        message_type_raw,
        time,
        items,
    })
}

pub(crate) fn field_i32(item: &BTreeMap<String, String>, name: &'static str) -> Result<i32> {
    match item.get(name).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.parse().map_err(|_| ProtocolError::InvalidInt {
            field: name,
            value: v.to_string(),
        }),
        _ => Ok(0),
    }
}

pub(crate) fn field_f64(item: &BTreeMap<String, String>, name: &'static str) -> Result<f64> {
    match item.get(name).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.parse().map_err(|_| ProtocolError::InvalidFloat {
            field: name,
            value: v.to_string(),
        }),
        _ => Ok(0.0),
    }
}
