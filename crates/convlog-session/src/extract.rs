//! XML payload extraction.
//!
//! Client payloads are small XML fragments. Items pick individual attributes
//! out of them by path: `participant@displayName`, or with ancestors
//! `roster/participant@displayName`. Lookups are lenient: a malformed payload
//! still yields an item, just without the looked-up fields.

use crate::item::{ConversationItem, Direction, ItemDetail};
use convlog_core::{ConvlogError, ConvlogResult, CorrelationKeys};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

/// What kind of item a payload should become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    /// A participant joined. `supplied_name` is used when the payload carries
    /// no `displayName`.
    Participant {
        /// Name supplied by the client next to the payload.
        supplied_name: Option<String>,
    },
    /// Message content.
    Message(Direction),
    /// Context data.
    ContextExchange(Direction),
}

/// Attribute paths read by the extractor.
pub mod paths {
    /// Participant display name.
    pub const PARTICIPANT_NAME: &str = "participant@displayName";
    /// Message sender.
    pub const MESSAGE_SENDER: &str = "message@from";
    /// Message text.
    pub const MESSAGE_TEXT: &str = "message@text";
    /// Context application id.
    pub const CONTEXT_APP: &str = "context@appId";
}

/// Turns event payloads into [`ConversationItem`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationItemExtractor;

impl ConversationItemExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self
    }

    /// Build an item of `kind` from `payload` for the session with `session` keys.
    pub fn extract(
        &self,
        payload: &str,
        kind: &ItemKind,
        session: &CorrelationKeys,
    ) -> ConversationItem {
        let detail = match kind {
            ItemKind::Participant { supplied_name } => ItemDetail::Participant {
                display_name: lenient(payload, paths::PARTICIPANT_NAME)
                    .or_else(|| supplied_name.clone()),
            },
            ItemKind::Message(direction) => ItemDetail::Message {
                direction: *direction,
                sender: lenient(payload, paths::MESSAGE_SENDER),
                text: lenient(payload, paths::MESSAGE_TEXT),
            },
            ItemKind::ContextExchange(direction) => ItemDetail::ContextExchange {
                direction: *direction,
                application_id: lenient(payload, paths::CONTEXT_APP),
            },
        };
        ConversationItem::new(session.clone(), payload, detail)
    }
}

fn lenient(payload: &str, path: &str) -> Option<String> {
    match attribute_at(payload, path) {
        Ok(value) => value,
        Err(e) => {
            warn!(path, error = %e, "Could not read attribute from payload");
            None
        }
    }
}

/// Look up the first attribute matching `path` (`[ancestor/]*element@attribute`).
///
/// Element and attribute names are compared by local name, so namespace
/// prefixes are ignored. Returns `Ok(None)` if no element matches or it lacks
/// the attribute.
pub fn attribute_at(xml: &str, path: &str) -> ConvlogResult<Option<String>> {
    let (element_path, attribute) = path
        .rsplit_once('@')
        .ok_or_else(|| ConvlogError::Extraction(format!("Invalid attribute path '{path}'")))?;
    let segments: Vec<&str> = element_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || attribute.is_empty() {
        return Err(ConvlogError::Extraction(format!(
            "Invalid attribute path '{path}'"
        )));
    }

    let mut reader = Reader::from_str(xml);
    let mut open: Vec<Vec<u8>> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ConvlogError::Extraction(format!("Malformed payload: {e}")))?;
        match event {
            Event::Start(start) => {
                let name = start.local_name().as_ref().to_vec();
                if path_matches(&open, &name, &segments) {
                    if let Some(value) = attribute_value(&reader, &start, attribute)? {
                        return Ok(Some(value));
                    }
                }
                open.push(name);
            }
            Event::Empty(start) => {
                let name = start.local_name().as_ref().to_vec();
                if path_matches(&open, &name, &segments) {
                    if let Some(value) = attribute_value(&reader, &start, attribute)? {
                        return Ok(Some(value));
                    }
                }
            }
            Event::End(_) => {
                open.pop();
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// `segments` must equal the tail of the open-element stack plus `name`.
fn path_matches(open: &[Vec<u8>], name: &[u8], segments: &[&str]) -> bool {
    let Some((last, ancestors)) = segments.split_last() else {
        return false;
    };
    if last.as_bytes() != name || ancestors.len() > open.len() {
        return false;
    }
    open[open.len() - ancestors.len()..]
        .iter()
        .zip(ancestors)
        .all(|(have, wanted)| have.as_slice() == wanted.as_bytes())
}

fn attribute_value(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    attribute: &str,
) -> ConvlogResult<Option<String>> {
    for attr in start.attributes() {
        let attr =
            attr.map_err(|e| ConvlogError::Extraction(format!("Malformed attribute: {e}")))?;
        if attr.key.local_name().as_ref() == attribute.as_bytes() {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| ConvlogError::Extraction(format!("Bad attribute value: {e}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
