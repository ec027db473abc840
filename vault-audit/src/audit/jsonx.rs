//! JSON to JSONx conversion
//!
//! JSONx is IBM's XML rendering of JSON. Objects become `json:object`, arrays
//! `json:array` and scalars `json:string`, `json:number`, `json:boolean` or
//! `json:null`. Members of an object carry their key in a `name` attribute and
//! are emitted in key order so output is deterministic.

use serde_json::Value;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const JSONX_NAMESPACE: &str = "http://www.ibm.com/xmlns/prod/2009/jsonx";

/// Render a JSON value as a JSONx document
pub fn value_to_jsonx(value: &Value) -> String {
    let mut out = String::from(XML_HEADER);
    write_element(&mut out, value, None, true);
    out
}

fn write_element(out: &mut String, value: &Value, name: Option<&str>, root: bool) {
    let tag = match value {
        Value::Object(_) => "json:object",
        Value::Array(_) => "json:array",
        Value::String(_) => "json:string",
        Value::Number(_) => "json:number",
        Value::Bool(_) => "json:boolean",
        Value::Null => "json:null",
    };

    out.push('<');
    out.push_str(tag);
    if root {
        out.push_str(" xmlns:json=\"");
        out.push_str(JSONX_NAMESPACE);
        out.push('"');
    }
    if let Some(name) = name {
        out.push_str(" name=\"");
        out.push_str(&escape(name));
        out.push('"');
    }

    match value {
        Value::Null => {
            out.push_str("/>");
            return;
        }
        Value::Object(map) => {
            out.push('>');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                write_element(out, &map[key.as_str()], Some(key), false);
            }
        }
        Value::Array(items) => {
            out.push('>');
            for item in items {
                write_element(out, item, None, false);
            }
        }
        Value::String(s) => {
            out.push('>');
            out.push_str(&escape(s));
        }
        Value::Number(n) => {
            out.push('>');
            out.push_str(&n.to_string());
        }
        Value::Bool(b) => {
            out.push('>');
            out.push_str(if *b { "true" } else { "false" });
        }
    }

    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\t' => escaped.push_str("&#x9;"),
            '\n' => escaped.push_str("&#xA;"),
            '\r' => escaped.push_str("&#xD;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_members_sorted() {
        let xml = value_to_jsonx(&json!({"type": "request", "auth": {"policies": ["root"]}}));
        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<json:object xmlns:json="http://www.ibm.com/xmlns/prod/2009/jsonx">"#,
                r#"<json:object name="auth"><json:array name="policies"><json:string>root</json:string></json:array></json:object>"#,
                r#"<json:string name="type">request</json:string>"#,
                r#"</json:object>"#
            )
        );
    }

    #[test]
    fn test_scalars_and_escaping() {
        let xml = value_to_jsonx(&json!({"n": 60, "b": false, "z": null, "s": "<a & b>"}));
        assert!(xml.contains(r#"<json:number name="n">60</json:number>"#));
        assert!(xml.contains(r#"<json:boolean name="b">false</json:boolean>"#));
        assert!(xml.contains(r#"<json:null name="z"/>"#));
        assert!(xml.contains(r#"<json:string name="s">&lt;a &amp; b&gt;</json:string>"#));
    }

    #[test]
    fn test_deep_nesting() {
        let mut value = json!("leaf");
        for _ in 0..300 {
            value = json!({ "deep": value });
        }
        let xml = value_to_jsonx(&value);
        assert_eq!(xml.matches(r#"<json:object name="deep">"#).count(), 299);
        assert!(xml.contains(r#"<json:string name="deep">leaf</json:string>"#));
    }
}
