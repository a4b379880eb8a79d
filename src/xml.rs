use std::collections::HashMap;
use std::fmt::{Display, Formatter, Write};

use quick_xml::events::BytesStart;

/// Escapes text for use inside an XML attribute or text node.
pub(crate) struct XmlSafe<'a>(pub &'a str);

impl Display for XmlSafe<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                _ => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Collects every attribute of an element, unescaped.
pub(crate) fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, quick_xml::Error> {
    let mut map = HashMap::new();

    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }

    Ok(map)
}

/// Lenient boolean reading; the front-end writes `true`/`True`/`1`.
pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Appends ` Name="value"` to an element being written.
pub(crate) fn write_attr(buf: &mut String, name: &str, value: &str) {
    let _ = write!(buf, r#" {}="{}""#, name, XmlSafe(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_safe() {
        let text = format!("{}", XmlSafe(r#"/Fp"a<b>&'c'""#));
        assert_eq!(text, "/Fp&quot;a&lt;b&gt;&amp;&apos;c&apos;&quot;");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("True"));
        assert!(parse_bool(" 1 "));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_attributes_unescape() {
        let mut reader = quick_xml::Reader::from_str(r#"<Tool Name="a" Params="/Fo&quot;x&quot;"/>"#);
        match reader.read_event().unwrap() {
            quick_xml::events::Event::Empty(e) => {
                let attrs = attributes(&e).unwrap();
                assert_eq!(attrs["Name"], "a");
                assert_eq!(attrs["Params"], r#"/Fo"x""#);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
