//! Pull-based XMLTV parser
//!
//! [`XmltvReader`] drives a `quick_xml` event loop over any [`BufRead`] and
//! yields one [`XmltvElement`] per completed `<channel>` or `<programme>`.
//! Only the fields the cache keeps are extracted; everything else is skipped
//! without being buffered, so memory stays bounded by the element currently
//! being assembled.

use crate::config::defaults::MAX_TRACKED_DEPTH;
use crate::ingestor::text_guard::TextGuard;
use crate::models::ProgramRecord;
use crate::utils::time::parse_xmltv_datetime;

use chrono::Duration as ChronoDuration;
use quick_xml::Reader;
use quick_xml::events::{BytesRef, BytesStart, Event};
use std::io::{self, BufRead};
use std::sync::Arc;
use tracing::debug;

/// Channel as it appears in the document, before projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmltvChannel {
    pub id: String,
    /// Every `display-name`, in document order
    pub display_names: Vec<String>,
    /// First `icon@src`
    pub icon: Option<String>,
}

/// A completed top-level element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmltvElement {
    Channel(XmltvChannel),
    Programme(ProgramRecord),
}

/// Counters kept while parsing one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub channels: usize,
    pub programmes: usize,
    pub skipped_channels: usize,
    pub skipped_programmes: usize,
    pub truncated_fields: usize,
    /// Programmes whose `stop` was missing, unparseable or before `start`
    pub repaired_stops: usize,
}

/// Terminal parser failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum XmltvParseError {
    /// The document is not well-formed
    #[error("{message} (at byte {position})")]
    Syntax { message: String, position: u64 },

    /// The underlying reader failed; the payload tells transfer and inflate failures apart
    #[error("read failed: {0}")]
    Io(Arc<io::Error>),
}

#[derive(Debug)]
enum Partial {
    Channel {
        id: Option<String>,
        display_names: Vec<String>,
        icon: Option<String>,
    },
    Programme {
        channel: Option<String>,
        start: Option<String>,
        stop: Option<String>,
        title: Option<String>,
        description: Option<String>,
        category: Option<String>,
    },
}

/// Iterator over the channels and programmes of an XMLTV document.
pub struct XmltvReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// Names of open elements, tracked up to `MAX_TRACKED_DEPTH`
    stack: Vec<String>,
    /// Open elements nested deeper than the tracked stack
    untracked_depth: usize,
    text: String,
    current: Option<Partial>,
    guard: TextGuard,
    stats: ParseStats,
    finished: bool,
}

impl<R: BufRead> XmltvReader<R> {
    pub fn new(input: R, guard: TextGuard) -> Self {
        let reader = Reader::from_reader(input);
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            stack: Vec::with_capacity(MAX_TRACKED_DEPTH),
            untracked_depth: 0,
            text: String::new(),
            current: None,
            guard,
            stats: ParseStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn into_stats(self) -> ParseStats {
        self.stats
    }

    /// Bytes consumed from the (decompressed) input so far.
    pub fn position(&self) -> u64 {
        self.reader.buffer_position()
    }

    fn syntax_error(&self, message: impl Into<String>) -> XmltvParseError {
        XmltvParseError::Syntax {
            message: message.into(),
            position: self.reader.error_position(),
        }
    }

    fn depth(&self) -> usize {
        self.stack.len() + self.untracked_depth
    }

    fn push_element(&mut self, name: String) {
        if self.stack.len() < MAX_TRACKED_DEPTH {
            self.stack.push(name);
        } else {
            self.untracked_depth += 1;
        }
    }

    fn pop_element(&mut self) {
        if self.untracked_depth > 0 {
            self.untracked_depth -= 1;
        } else {
            self.stack.pop();
        }
    }

    /// Take the accumulated text, trimmed and length-bounded.
    fn take_text(&mut self, field: &str) -> Option<String> {
        let raw = std::mem::take(&mut self.text);
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let value = if trimmed.len() == raw.len() {
            raw
        } else {
            trimmed.to_string()
        };
        let (value, truncated) = self.guard.apply(value, field);
        if truncated {
            self.stats.truncated_fields += 1;
        }
        Some(value)
    }

    fn append_text(&mut self, text: &str) {
        if self.current.is_some() {
            self.guard.push_bounded(&mut self.text, text);
        }
    }

    fn append_reference(&mut self, reference: &BytesRef<'_>) -> Result<(), XmltvParseError> {
        if self.current.is_none() {
            return Ok(());
        }
        let resolved = if reference.is_char_ref() {
            reference
                .resolve_char_ref()
                .map_err(|e| self.syntax_error(format!("invalid character reference: {e}")))?
                .map(String::from)
        } else {
            let name = String::from_utf8_lossy(reference);
            quick_xml::escape::resolve_predefined_entity(&name).map(str::to_string)
        };

        match resolved {
            Some(text) => self.append_text(&text),
            None => {
                // Undeclared entity: keep it literally rather than dropping text.
                let literal = format!("&{};", String::from_utf8_lossy(reference));
                self.append_text(&literal);
            }
        }
        Ok(())
    }

    fn open(&mut self, element: &BytesStart<'_>, name: &str) {
        match (name, self.current.as_mut()) {
            ("channel", None) => {
                self.current = Some(Partial::Channel {
                    id: attribute(element, "id"),
                    display_names: Vec::new(),
                    icon: None,
                });
            }
            ("programme", None) => {
                self.current = Some(Partial::Programme {
                    channel: attribute(element, "channel"),
                    start: attribute(element, "start"),
                    stop: attribute(element, "stop"),
                    title: None,
                    description: None,
                    category: None,
                });
            }
            ("icon", Some(Partial::Channel { icon, .. })) if icon.is_none() => {
                *icon = attribute(element, "src");
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &str) -> Option<XmltvElement> {
        match name {
            "channel" if matches!(self.current, Some(Partial::Channel { .. })) => {
                self.text.clear();
                let partial = self.current.take()?;
                self.finish(partial)
            }
            "programme" if matches!(self.current, Some(Partial::Programme { .. })) => {
                self.text.clear();
                let partial = self.current.take()?;
                self.finish(partial)
            }
            "display-name" | "title" | "desc" | "category" => {
                let value = self.take_text(name);
                match (name, self.current.as_mut(), value) {
                    ("display-name", Some(Partial::Channel { display_names, .. }), Some(v)) => {
                        display_names.push(v);
                    }
                    ("title", Some(Partial::Programme { title, .. }), Some(v)) if title.is_none() => {
                        *title = Some(v);
                    }
                    ("desc", Some(Partial::Programme { description, .. }), Some(v))
                        if description.is_none() =>
                    {
                        *description = Some(v);
                    }
                    ("category", Some(Partial::Programme { category, .. }), Some(v))
                        if category.is_none() =>
                    {
                        *category = Some(v);
                    }
                    _ => {}
                }
                None
            }
            _ => {
                self.text.clear();
                None
            }
        }
    }

    fn finish(&mut self, partial: Partial) -> Option<XmltvElement> {
        match partial {
            Partial::Channel {
                id,
                display_names,
                icon,
            } => match id.filter(|id| !id.is_empty()) {
                Some(id) => {
                    self.stats.channels += 1;
                    Some(XmltvElement::Channel(XmltvChannel {
                        id,
                        display_names,
                        icon,
                    }))
                }
                None => {
                    self.stats.skipped_channels += 1;
                    debug!("Skipping <channel> without an id");
                    None
                }
            },
            Partial::Programme {
                channel,
                start,
                stop,
                title,
                description,
                category,
            } => {
                let Some(channel_id) = channel.filter(|c| !c.is_empty()) else {
                    self.stats.skipped_programmes += 1;
                    debug!("Skipping <programme> without a channel attribute");
                    return None;
                };
                let Some(start) = start.as_deref().and_then(parse_xmltv_datetime) else {
                    self.stats.skipped_programmes += 1;
                    debug!(
                        "Skipping <programme> on '{}' with missing or invalid start {:?}",
                        channel_id, start
                    );
                    return None;
                };

                let stop = match stop.as_deref().and_then(parse_xmltv_datetime) {
                    Some(stop) if stop >= start => stop,
                    _ => {
                        self.stats.repaired_stops += 1;
                        start + ChronoDuration::hours(1)
                    }
                };

                self.stats.programmes += 1;
                Some(XmltvElement::Programme(ProgramRecord {
                    channel_id,
                    start,
                    stop,
                    title: title.unwrap_or_default(),
                    description,
                    category,
                }))
            }
        }
    }

    fn next_element(&mut self) -> Result<Option<XmltvElement>, XmltvParseError> {
        loop {
            self.buf.clear();
            let result = self
                .reader
                .read_event_into(&mut self.buf)
                .map(Event::into_owned);
            let event = match result {
                Ok(event) => event,
                Err(quick_xml::Error::Io(e)) => return Err(XmltvParseError::Io(e)),
                Err(e) => return Err(self.syntax_error(e.to_string())),
            };

            match event {
                Event::Start(e) => {
                    let name = element_name(&e);
                    self.open(&e, &name);
                    self.push_element(name);
                    self.text.clear();
                }
                Event::Empty(e) => {
                    let name = element_name(&e);
                    self.open(&e, &name);
                    if let Some(element) = self.close(&name) {
                        return Ok(Some(element));
                    }
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    self.pop_element();
                    if let Some(element) = self.close(&name) {
                        return Ok(Some(element));
                    }
                }
                Event::Text(e) => {
                    let text = String::from_utf8_lossy(&e);
                    self.append_text(&text);
                }
                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e);
                    self.append_text(&text);
                }
                Event::GeneralRef(e) => self.append_reference(&e)?,
                Event::Eof => {
                    if self.depth() > 0 {
                        let open = self.stack.last().cloned().unwrap_or_default();
                        return Err(self.syntax_error(format!(
                            "document ended inside <{open}>"
                        )));
                    }
                    return Ok(None);
                }
                // Declarations, comments, processing instructions, doctype
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for XmltvReader<R> {
    type Item = Result<XmltvElement, XmltvParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Unescaped value of the named attribute, if present.
fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.trim().to_string(),
            Err(_) => String::from_utf8_lossy(&attr.value).trim().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn parse_all(xml: &str) -> (Vec<XmltvElement>, ParseStats) {
        let mut reader = XmltvReader::new(xml.as_bytes(), TextGuard::default());
        let elements = reader.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
        (elements, reader.into_stats())
    }

    fn programmes(elements: &[XmltvElement]) -> Vec<&ProgramRecord> {
        elements
            .iter()
            .filter_map(|e| match e {
                XmltvElement::Programme(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_channels_and_programmes() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE tv SYSTEM "xmltv.dtd">
<tv generator-info-name="test">
  <channel id="bbc1.uk">
    <display-name lang="en">BBC One</display-name>
    <display-name>BBC1</display-name>
    <icon src="http://example.com/bbc1.png"/>
    <icon src="http://example.com/ignored.png"/>
  </channel>
  <programme start="20240101120000 +0000" stop="20240101130000 +0000" channel="bbc1.uk">
    <title lang="en">News &amp; Weather</title>
    <title lang="cy">Newyddion</title>
    <desc><![CDATA[Headlines <live>]]></desc>
    <category>News</category>
  </programme>
</tv>"#;

        let (elements, stats) = parse_all(xml);
        assert_eq!(elements.len(), 2);

        match &elements[0] {
            XmltvElement::Channel(channel) => {
                assert_eq!(channel.id, "bbc1.uk");
                assert_eq!(channel.display_names, vec!["BBC One", "BBC1"]);
                assert_eq!(channel.icon.as_deref(), Some("http://example.com/bbc1.png"));
            }
            other => panic!("expected channel, got {other:?}"),
        }

        let programme = programmes(&elements)[0];
        assert_eq!(programme.title, "News & Weather");
        assert_eq!(programme.description.as_deref(), Some("Headlines <live>"));
        assert_eq!(programme.category.as_deref(), Some("News"));
        assert_eq!(
            programme.start,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(stats.channels, 1);
        assert_eq!(stats.programmes, 1);
    }

    #[test]
    fn test_character_references_resolved() {
        let xml = r#"<tv><programme start="20240101120000" channel="a"><title>Caf&#233; &#x2013; &lt;Live&gt;</title></programme></tv>"#;
        let (elements, _) = parse_all(xml);
        assert_eq!(programmes(&elements)[0].title, "Café – <Live>");
    }

    #[test]
    fn test_malformed_elements_skipped_and_counted() {
        let xml = r#"<tv>
  <channel><display-name>No id</display-name></channel>
  <channel id="ok"/>
  <programme start="20240101120000"><title>No channel</title></programme>
  <programme channel="ok"><title>No start</title></programme>
  <programme channel="ok" start="garbage"><title>Bad start</title></programme>
  <programme channel="ok" start="20240101120000"/>
</tv>"#;

        let (elements, stats) = parse_all(xml);
        assert_eq!(elements.len(), 2);
        assert_eq!(stats.skipped_channels, 1);
        assert_eq!(stats.skipped_programmes, 3);

        let untitled = programmes(&elements)[0];
        assert_eq!(untitled.title, "");
    }

    #[test]
    fn test_missing_or_inverted_stop_defaults_to_one_hour() {
        let xml = r#"<tv>
  <programme channel="a" start="20240101120000 +0000"><title>Open</title></programme>
  <programme channel="a" start="20240101140000 +0000" stop="20240101130000 +0000"><title>Inverted</title></programme>
</tv>"#;

        let (elements, stats) = parse_all(xml);
        for programme in programmes(&elements) {
            assert_eq!(programme.stop, programme.start + ChronoDuration::hours(1));
        }
        assert_eq!(stats.repaired_stops, 2);
    }

    #[test]
    fn test_oversized_text_truncated() {
        let long = "y".repeat(200);
        let xml = format!(
            r#"<tv><programme channel="a" start="20240101120000"><title>T</title><desc>{long}</desc></programme></tv>"#
        );
        let mut reader = XmltvReader::new(xml.as_bytes(), TextGuard::new(64));
        let elements = reader.by_ref().collect::<Result<Vec<_>, _>>().unwrap();

        let description = programmes(&elements)[0].description.clone().unwrap();
        assert!(description.starts_with(&"y".repeat(64)));
        assert!(description.ends_with(crate::config::defaults::TRUNCATION_MARKER));
        assert_eq!(reader.stats().truncated_fields, 1);
    }

    #[test]
    fn test_deep_nesting_tracked_by_counter() {
        let mut xml = String::from(r#"<tv><programme channel="a" start="20240101120000"><title>Deep</title>"#);
        for _ in 0..40 {
            xml.push_str("<x>");
        }
        for _ in 0..40 {
            xml.push_str("</x>");
        }
        xml.push_str("</programme></tv>");

        let (elements, _) = parse_all(&xml);
        assert_eq!(programmes(&elements)[0].title, "Deep");
    }

    #[test]
    fn test_syntax_error_is_terminal() {
        let xml = r#"<tv><channel id="a"><display-name>A</channel></tv>"#;
        let mut reader = XmltvReader::new(xml.as_bytes(), TextGuard::default());

        let result: Result<Vec<_>, _> = reader.by_ref().collect();
        assert!(matches!(result, Err(XmltvParseError::Syntax { .. })));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        let xml = r#"<tv><channel id="a"><display-name>A</display-name></channel><programme channel="a" start="20240101120000"><title>Cut"#;
        let result: Result<Vec<_>, _> =
            XmltvReader::new(xml.as_bytes(), TextGuard::default()).collect();
        assert!(matches!(result, Err(XmltvParseError::Syntax { .. })));
    }
}
