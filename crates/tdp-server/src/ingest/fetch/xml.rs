//! Raw XML fetch strategy and the XML to JSON conversion shared with the
//! SOAP strategy.
//!
//! Vendor XML has no schema we control, so documents are converted to a
//! generic JSON tree the path resolver can address: elements become
//! objects, repeated sibling elements become arrays, attributes become
//! `@name` keys and element text becomes either the value itself or a
//! `#text` key when attributes are present. Namespace prefixes are
//! stripped, so a `soap:Envelope` is addressed as `Envelope`.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use tracing::debug;

use tdp_common::fingerprint::payload_fingerprint;

use super::api::http_get;
use super::{
    extract_records, render_placeholders, FetchError, FetchWindow, FetchedPayload, VendorFetcher,
};
use crate::ingest::config::VendorConfiguration;

pub struct XmlFetcher {
    http: reqwest::Client,
}

impl XmlFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl VendorFetcher for XmlFetcher {
    async fn fetch(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
    ) -> Result<FetchedPayload, FetchError> {
        let template = config
            .endpoint_url
            .as_deref()
            .ok_or_else(|| FetchError::Config("endpoint_url is not set".to_string()))?;
        let url = render_placeholders(template, config, window, None);

        let body = http_get(&self.http, &url, config).await?;
        let tree = xml_to_json(&String::from_utf8_lossy(&body))?;

        let records = extract_records(tree, config.records_path.as_deref())?;
        debug!(vendor = %config.label(), records = records.len(), "Fetched XML payload");

        Ok(FetchedPayload {
            fingerprint: Some(payload_fingerprint(&body)),
            records,
        })
    }
}

/// Convert an XML document to a JSON tree rooted at the document element:
/// `<Sales><Sale .../></Sales>` becomes `{"Sales": {"Sale": ...}}`.
pub(crate) fn xml_to_json(xml: &str) -> Result<Value, FetchError> {
    let mut reader = Reader::from_str(xml);
    // (element name, children and attributes, accumulated text)
    let mut stack: Vec<(String, Map<String, Value>, String)> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let map = attribute_map(&e)?;
                stack.push((name, map, String::new()));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let map = attribute_map(&e)?;
                let value = if map.is_empty() {
                    Value::Null
                } else {
                    Value::Object(map)
                };
                attach(&mut stack, &mut root, name, value)?;
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| FetchError::Malformed(format!("invalid XML text: {}", err)))?;
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let Some((name, map, text)) = stack.pop() else {
                    return Err(FetchError::Malformed("unexpected closing tag".to_string()));
                };
                let trimmed = text.trim();
                let value = if map.is_empty() {
                    if trimmed.is_empty() {
                        Value::Null
                    } else {
                        Value::String(trimmed.to_string())
                    }
                } else {
                    let mut map = map;
                    if !trimmed.is_empty() {
                        map.insert("#text".to_string(), Value::String(trimmed.to_string()));
                    }
                    Value::Object(map)
                };
                attach(&mut stack, &mut root, name, value)?;
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions, doctypes.
            Ok(_) => {}
            Err(e) => return Err(FetchError::Malformed(format!("invalid XML: {}", e))),
        }
    }

    if !stack.is_empty() {
        return Err(FetchError::Malformed("unclosed XML elements".to_string()));
    }

    match root {
        Some((name, value)) => {
            let mut doc = Map::new();
            doc.insert(name, value);
            Ok(Value::Object(doc))
        }
        None => Err(FetchError::Malformed("empty XML document".to_string())),
    }
}

fn attribute_map(e: &quick_xml::events::BytesStart<'_>) -> Result<Map<String, Value>, FetchError> {
    let mut map = Map::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| FetchError::Malformed(format!("invalid XML attribute: {}", err)))?;
        let key = format!("@{}", String::from_utf8_lossy(attr.key.local_name().as_ref()));
        let value = attr
            .unescape_value()
            .map_err(|err| FetchError::Malformed(format!("invalid XML attribute: {}", err)))?
            .to_string();
        map.insert(key, Value::String(value));
    }
    Ok(map)
}

fn attach(
    stack: &mut [(String, Map<String, Value>, String)],
    root: &mut Option<(String, Value)>,
    name: String,
    value: Value,
) -> Result<(), FetchError> {
    if let Some(parent) = stack.last_mut() {
        match parent.1.get_mut(&name) {
            None => {
                parent.1.insert(name, value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = std::mem::take(existing);
                *existing = Value::Array(vec![first, value]);
            }
        }
        Ok(())
    } else if root.is_none() {
        *root = Some((name, value));
        Ok(())
    } else {
        Err(FetchError::Malformed(
            "multiple XML root elements".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_elements() {
        let tree = xml_to_json("<Sale><Invoice>INV-1</Invoice><Net>10.50</Net></Sale>").unwrap();
        assert_eq!(tree, json!({"Sale": {"Invoice": "INV-1", "Net": "10.50"}}));
    }

    #[test]
    fn test_repeated_siblings_become_an_array() {
        let tree = xml_to_json(
            "<Sales><Sale><Id>1</Id></Sale><Sale><Id>2</Id></Sale><Sale><Id>3</Id></Sale></Sales>",
        )
        .unwrap();
        assert_eq!(
            tree,
            json!({"Sales": {"Sale": [{"Id": "1"}, {"Id": "2"}, {"Id": "3"}]}})
        );
    }

    #[test]
    fn test_attributes_use_at_prefix() {
        let tree = xml_to_json(r#"<Sale id="7" outlet="OUT1"><Net>5</Net></Sale>"#).unwrap();
        assert_eq!(
            tree,
            json!({"Sale": {"@id": "7", "@outlet": "OUT1", "Net": "5"}})
        );
    }

    #[test]
    fn test_text_with_attributes_lands_in_text_key() {
        let tree = xml_to_json(r#"<Total currency="AED">99.00</Total>"#).unwrap();
        assert_eq!(
            tree,
            json!({"Total": {"@currency": "AED", "#text": "99.00"}})
        );
    }

    #[test]
    fn test_namespace_prefixes_are_stripped() {
        let tree = xml_to_json(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><Result>ok</Result></soap:Body></soap:Envelope>"#,
        )
        .unwrap();
        assert_eq!(
            tree["Envelope"]["Body"]["Result"],
            json!("ok")
        );
    }

    #[test]
    fn test_empty_and_self_closing_elements() {
        let tree = xml_to_json("<Sale><Note/><Discount></Discount></Sale>").unwrap();
        assert_eq!(tree, json!({"Sale": {"Note": null, "Discount": null}}));
    }

    #[test]
    fn test_cdata_text() {
        let tree = xml_to_json("<Note><![CDATA[7 < 9 & true]]></Note>").unwrap();
        assert_eq!(tree, json!({"Note": "7 < 9 & true"}));
    }

    #[test]
    fn test_escaped_entities() {
        let tree = xml_to_json("<Name>Fish &amp; Chips</Name>").unwrap();
        assert_eq!(tree, json!({"Name": "Fish & Chips"}));
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(matches!(
            xml_to_json("<Sale><Open></Sale>"),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(xml_to_json(""), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_resolves_with_path_syntax() {
        let tree = xml_to_json(
            "<Sales><Sale><Items><Item><Sku>A</Sku></Item><Item><Sku>B</Sku></Item></Items></Sale></Sales>",
        )
        .unwrap();
        let skus = crate::ingest::path::resolve(&tree, "Sales.Sale.Items.Item[*].Sku");
        assert_eq!(
            skus,
            crate::ingest::path::Resolution::Many(vec![json!("A"), json!("B")])
        );
    }
}
