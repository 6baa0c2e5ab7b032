//! SOAP envelope codec.
//!
//! The gateway's SOAP lane needs three things: recognizing an envelope by
//! its namespace, pulling the operation name and flat parameters out of
//! `Body`, and answering with a `<op>Response` wrapper or a `soap:Fault`.
//! A compact tag scanner covers that; document-level XML fidelity is the
//! upstream toolchain's business.

use serde_json::{Map, Value};

use crate::call::Call;
use crate::error::{GatewayError, Result};
use crate::registry::ProtocolKind;

/// SOAP 1.1 envelope namespace.
pub const SOAP11_NS: &str = "schemas.xmlsoap.org/soap/envelope";
/// SOAP 1.2 envelope namespace.
pub const SOAP12_NS: &str = "www.w3.org/2003/05/soap-envelope";

/// Whether a request body is an XML document whose root element declares
/// a SOAP envelope namespace. Only the root tag is inspected, so a
/// namespace URL quoted in element text elsewhere never matches.
pub fn is_soap_envelope(body: &[u8]) -> bool {
    let text = match std::str::from_utf8(body) {
        Ok(t) => t,
        Err(_) => return false,
    };
    let mut rest = text.trim_start();
    loop {
        if !rest.starts_with('<') {
            return false;
        }
        let Some(end) = rest.find('>') else {
            return false;
        };
        let inner = &rest[1..end];
        if inner.starts_with('?') || inner.starts_with('!') {
            rest = rest[end + 1..].trim_start();
            continue;
        }
        return inner.contains(SOAP11_NS) || inner.contains(SOAP12_NS);
    }
}

/// One scanned XML tag.
#[derive(Debug, PartialEq)]
enum Tag<'a> {
    Open(&'a str),
    Close(&'a str),
    Empty(&'a str),
}

/// Iterate tags in document order, yielding local names (prefix and
/// attributes stripped). Declarations and comments are skipped.
struct TagScanner<'a> {
    xml: &'a str,
    pos: usize,
}

impl<'a> TagScanner<'a> {
    fn new(xml: &'a str) -> Self {
        Self { xml, pos: 0 }
    }

    /// Text between the current position and the next tag.
    fn text_until_next_tag(&self) -> &'a str {
        let rest = &self.xml[self.pos..];
        match rest.find('<') {
            Some(i) => &rest[..i],
            None => rest,
        }
    }
}

fn local_name(raw: &str) -> &str {
    let name = raw.split_whitespace().next().unwrap_or(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

impl<'a> Iterator for TagScanner<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let open = self.xml[self.pos..].find('<')? + self.pos;
            let close = self.xml[open..].find('>')? + open;
            let inner = &self.xml[open + 1..close];
            self.pos = close + 1;

            if inner.starts_with('?') || inner.starts_with('!') {
                continue; // declaration or comment
            }
            if let Some(name) = inner.strip_prefix('/') {
                return Some(Tag::Close(local_name(name)));
            }
            if let Some(name) = inner.strip_suffix('/') {
                return Some(Tag::Empty(local_name(name)));
            }
            return Some(Tag::Open(local_name(inner)));
        }
    }
}

/// Decode a SOAP request into a [`Call`] addressed at the Body's first
/// operation element. Direct children of the operation become string
/// arguments.
pub fn decode_request(path: &str, body: &[u8]) -> Result<Call> {
    let xml = std::str::from_utf8(body)
        .map_err(|_| GatewayError::Protocol("SOAP body is not UTF-8".into()))?;

    let mut scanner = TagScanner::new(xml);

    // Walk to the Body element.
    loop {
        match scanner.next() {
            Some(Tag::Open(name)) if name == "Body" => break,
            Some(_) => continue,
            None => return Err(GatewayError::Protocol("SOAP envelope has no Body".into())),
        }
    }

    // The next open tag is the operation.
    let operation = loop {
        match scanner.next() {
            Some(Tag::Open(name)) => break name.to_string(),
            Some(Tag::Empty(name)) => {
                return Ok(Call::new(ProtocolKind::Soap, path, name));
            }
            Some(Tag::Close(_)) | None => {
                return Err(GatewayError::Protocol("SOAP Body has no operation".into()))
            }
        }
    };

    // Flat parameter elements until the operation closes.
    let mut args = Map::new();
    let mut depth = 0usize;
    loop {
        match scanner.next() {
            Some(Tag::Open(name)) if depth == 0 && name != operation => {
                let text = scanner.text_until_next_tag().trim().to_string();
                args.insert(name.to_string(), Value::String(text));
                depth = 1;
            }
            Some(Tag::Open(_)) => depth += 1,
            Some(Tag::Empty(name)) if depth == 0 => {
                args.insert(name.to_string(), Value::String(String::new()));
            }
            Some(Tag::Empty(_)) => {}
            Some(Tag::Close(name)) if name == operation && depth == 0 => break,
            Some(Tag::Close(_)) => depth = depth.saturating_sub(1),
            None => {
                return Err(GatewayError::Protocol(format!(
                    "unterminated SOAP operation {operation}"
                )))
            }
        }
    }

    Ok(Call::new(ProtocolKind::Soap, path, operation).with_args(args))
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Payload rendered as element text: strings raw, everything else as its
/// JSON serialization.
fn payload_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode a success envelope wrapping the payload in `<op>Response`.
pub fn encode_success(operation: &str, value: &Value) -> Vec<u8> {
    format!(
        "<?xml version=\"1.0\"?>\
         <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
         <soap:Body><{operation}Response><result>{}</result></{operation}Response>\
         </soap:Body></soap:Envelope>",
        xml_escape(&payload_text(value))
    )
    .into_bytes()
}

/// Encode a `soap:Fault` envelope.
pub fn encode_fault(error: &GatewayError) -> Vec<u8> {
    let code = match error {
        GatewayError::MethodNotFound { .. } | GatewayError::Protocol(_) => "soap:Client",
        _ => "soap:Server",
    };
    format!(
        "<?xml version=\"1.0\"?>\
         <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
         <soap:Body><soap:Fault><faultcode>{code}</faultcode>\
         <faultstring>{}</faultstring></soap:Fault>\
         </soap:Body></soap:Envelope>",
        xml_escape(&error.to_string())
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REQUEST: &[u8] = br#"<?xml version="1.0"?>
        <soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
          <soap:Body>
            <ns:Greet xmlns:ns="urn:example">
              <ns:name>Alice</ns:name>
              <ns:lang>en</ns:lang>
            </ns:Greet>
          </soap:Body>
        </soap:Envelope>"#;

    #[test]
    fn test_envelope_detection() {
        assert!(is_soap_envelope(REQUEST));
        assert!(!is_soap_envelope(br#"{"jsonrpc":"2.0"}"#));
        assert!(!is_soap_envelope(b"<root>not soap</root>"));
    }

    #[test]
    fn test_envelope_namespace_must_be_on_root() {
        let body = br#"<doc><note>see http://schemas.xmlsoap.org/soap/envelope/</note></doc>"#;
        assert!(!is_soap_envelope(body));
    }

    #[test]
    fn test_envelope_detected_past_declaration() {
        let body = br#"<?xml version="1.0"?>
            <!-- generated -->
            <env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
            </env:Envelope>"#;
        assert!(is_soap_envelope(body));
    }

    #[test]
    fn test_decode_operation_and_params() {
        let call = decode_request("/soap", REQUEST).unwrap();
        assert_eq!(call.method, "Greet");
        assert_eq!(call.arg("name"), Some(&json!("Alice")));
        assert_eq!(call.arg("lang"), Some(&json!("en")));
        assert!(call.correlation.is_none());
    }

    #[test]
    fn test_decode_empty_operation() {
        let body = br#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body><Ping/></soap:Body></soap:Envelope>"#;
        let call = decode_request("/soap", body).unwrap();
        assert_eq!(call.method, "Ping");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_decode_missing_body_rejected() {
        let body = b"<soap:Envelope></soap:Envelope>";
        assert!(decode_request("/soap", body).is_err());
    }

    #[test]
    fn test_success_envelope_shape() {
        let bytes = encode_success("Greet", &json!("Hello Alice"));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("<GreetResponse><result>Hello Alice</result></GreetResponse>"));
    }

    #[test]
    fn test_success_escapes_markup() {
        let bytes = encode_success("Echo", &json!("<b>&</b>"));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("&lt;b&gt;&amp;&lt;/b&gt;"));
    }

    #[test]
    fn test_fault_envelope() {
        let err = GatewayError::MethodNotFound {
            kind: ProtocolKind::Soap,
            path: "/soap".into(),
            method: "Nope".into(),
        };
        let text = String::from_utf8(encode_fault(&err)).unwrap();
        assert!(text.contains("<faultcode>soap:Client</faultcode>"));
        assert!(text.contains("Nope"));
    }

    #[test]
    fn test_fault_server_side() {
        let text = String::from_utf8(encode_fault(&GatewayError::DeadlineExceeded)).unwrap();
        assert!(text.contains("<faultcode>soap:Server</faultcode>"));
    }
}
