//! Personal-message payloads.
//!
//! `UUX` publishes and `UBX` delivers a small XML document:
//!
//! ```text
//! <Data><PSM>out to lunch</PSM><CurrentMedia></CurrentMedia></Data>
//! ```

use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

/// Renders the `UUX` payload for a personal message.
pub fn render_personal_message(message: &str) -> Vec<u8> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Start(BytesStart::new("Data")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("PSM")))
        .unwrap();
    writer
        .write_event(Event::Text(BytesText::new(message)))
        .unwrap();
    writer.write_event(Event::End(BytesEnd::new("PSM"))).unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("CurrentMedia")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("CurrentMedia")))
        .unwrap();
    writer.write_event(Event::End(BytesEnd::new("Data"))).unwrap();

    writer.into_inner().into_inner()
}

/// Extracts the `PSM` text from a `UBX` payload. An empty or unparseable
/// payload means an empty personal message.
pub fn parse_personal_message(payload: &[u8]) -> String {
    let Ok(xml) = std::str::from_utf8(payload) else {
        return String::new();
    };

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_psm = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"PSM" => in_psm = true,
            Ok(Event::End(_)) => in_psm = false,
            Ok(Event::Text(e)) if in_psm => {
                return e.unescape().unwrap_or_default().to_string();
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_parse_roundtrip() {
        for message in ["", "out to lunch", "a < b & c", "日本語"] {
            let payload = render_personal_message(message);
            assert_eq!(parse_personal_message(&payload), message);
        }
    }

    #[test]
    fn render_shape() {
        let payload = render_personal_message("hi");
        let text = String::from_utf8(payload).unwrap();
        assert_eq!(
            text,
            "<Data><PSM>hi</PSM><CurrentMedia></CurrentMedia></Data>"
        );
    }

    #[test]
    fn parse_garbage_is_empty() {
        assert_eq!(parse_personal_message(b"not xml"), "");
        assert_eq!(parse_personal_message(&[0xff, 0xfe]), "");
    }
}
