use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xmlparser::Error as XmlError;

#[derive(Debug)]
pub enum XmlParseError {
    /// Tokenizer error, the position is part of the message
    ParseError(XmlError),
    /// Invalid hierarchy close tags, i.e `<wfs:member></gml:Point>`
    MalformedHierarchy(String, String),
}

impl std::fmt::Display for XmlParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XmlParseError::ParseError(e) => write!(f, "{e}"),
            XmlParseError::MalformedHierarchy(found, expected) => {
                write!(f, "malformed hierarchy: found </{found}>, expected </{expected}>")
            }
        }
    }
}

impl std::error::Error for XmlParseError {}

/// One XML element. Names are stored without namespace prefix
/// (`gml:posList` becomes `posList`).
#[derive(Default, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XmlNode {
    pub node_type: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlNode>,
    /// Text content, i.e the "Hello" in `<p>Hello</p>`, entities decoded
    pub text: Option<String>,
}

pub fn get_all_nodes_in_subtree<'a>(xml: &'a [XmlNode], node_type_searched: &str) -> Vec<&'a XmlNode> {
    get_all_nodes_in_subtree_comparator(xml, |node| node.node_type.as_str() == node_type_searched)
}

pub fn get_all_nodes_in_subtree_comparator<'a, F: Fn(&XmlNode) -> bool>(
    xml: &'a [XmlNode],
    search_fn: F,
) -> Vec<&'a XmlNode> {
    let mut nodes = Vec::new();
    get_all_nodes_in_subtree_comparator_internal(xml, &search_fn, &mut nodes);
    nodes
}

// depth first, document order
fn get_all_nodes_in_subtree_comparator_internal<'a, F: Fn(&XmlNode) -> bool>(
    xml: &'a [XmlNode],
    search_fn: &F,
    target: &mut Vec<&'a XmlNode>,
) {
    for xml_node in xml.iter() {
        if (search_fn)(xml_node) {
            target.push(xml_node);
        }
        get_all_nodes_in_subtree_comparator_internal(&xml_node.children, search_fn, target);
    }
}

impl XmlNode {
    pub fn get_all_children_of_type<'a>(&'a self, node_type: &str) -> Vec<&'a XmlNode> {
        self.children
            .iter()
            .filter(|n| n.node_type.as_str() == node_type)
            .collect()
    }

    pub fn first_child_of_type<'a>(&'a self, node_type: &str) -> Option<&'a XmlNode> {
        self.children.iter().find(|n| n.node_type.as_str() == node_type)
    }

    /// Leaf elements have neither children nor are they empty containers.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub fn parse_xml_string(xml: &str) -> Result<Vec<XmlNode>, XmlParseError> {
    use xmlparser::ElementEnd::*;
    use xmlparser::Token::*;
    use xmlparser::Tokenizer;

    use self::XmlParseError::*;

    let mut root_node = XmlNode::default();

    let tokenizer = Tokenizer::from(xml.trim());

    // index path from the root to the currently open element
    let mut current_hierarchy: Vec<usize> = Vec::new();

    for token in tokenizer {
        let token = token.map_err(ParseError)?;
        match token {
            ElementStart { local, .. } => {
                if let Some(current_parent) = get_item(&current_hierarchy, &mut root_node) {
                    let children_len = current_parent.children.len();
                    current_parent.children.push(XmlNode {
                        node_type: local.to_string(),
                        attributes: BTreeMap::new(),
                        children: Vec::new(),
                        text: None,
                    });
                    current_hierarchy.push(children_len);
                }
            }
            ElementEnd { end: Empty, .. } => {
                current_hierarchy.pop();
            }
            ElementEnd {
                end: Close(_, close_value),
                ..
            } => {
                if let Some(last) = get_item(&current_hierarchy, &mut root_node) {
                    if last.node_type != close_value.as_str() {
                        return Err(MalformedHierarchy(close_value.to_string(), last.node_type.clone()));
                    }
                }
                current_hierarchy.pop();
            }
            Attribute { local, value, .. } => {
                if let Some(last) = get_item(&current_hierarchy, &mut root_node) {
                    last.attributes.insert(
                        local.to_string(),
                        html_escape::decode_html_entities(value.as_str()).to_string(),
                    );
                }
            }
            Text { text } => append_text(&current_hierarchy, &mut root_node, text.as_str(), true),
            Cdata { text, .. } => append_text(&current_hierarchy, &mut root_node, text.as_str(), false),
            _ => {}
        }
    }

    Ok(root_node.children)
}

fn append_text(hierarchy: &[usize], root_node: &mut XmlNode, text: &str, decode: bool) {
    let text = text.trim();
    if text.is_empty() || hierarchy.is_empty() {
        return;
    }
    let text = if decode {
        html_escape::decode_html_entities(text).to_string()
    } else {
        text.to_string()
    };
    if let Some(last) = get_item(hierarchy, root_node) {
        match last.text.as_mut() {
            Some(s) => s.push_str(&text),
            None => last.text = Some(text),
        }
    }
}

/// Walks the index path down from the root node.
fn get_item<'a>(hierarchy: &[usize], root_node: &'a mut XmlNode) -> Option<&'a mut XmlNode> {
    let mut node = root_node;
    for i in hierarchy {
        node = node.children.get_mut(*i)?;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_without_prefixes() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <wfs:FeatureCollection numberMatched="2" xmlns:wfs="http://www.opengis.net/wfs/2.0">
                <wfs:member><app:school gml:id="s.1"><app:name>Nord &amp; Süd</app:name></app:school></wfs:member>
                <wfs:member><app:school gml:id="s.2"><app:name><![CDATA[A < B]]></app:name><app:empty/></app:school></wfs:member>
            </wfs:FeatureCollection>"#;
        let nodes = parse_xml_string(xml).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_type, "FeatureCollection");
        assert_eq!(nodes[0].attributes.get("numberMatched").map(|s| s.as_str()), Some("2"));

        let schools = get_all_nodes_in_subtree(&nodes, "school");
        assert_eq!(schools.len(), 2);
        assert_eq!(schools[0].attributes.get("id").map(|s| s.as_str()), Some("s.1"));
        assert_eq!(schools[0].children[0].text.as_deref(), Some("Nord & Süd"));
        assert_eq!(schools[1].children[0].text.as_deref(), Some("A < B"));
        assert!(schools[1].first_child_of_type("empty").unwrap().is_leaf());
    }

    #[test]
    fn rejects_mismatched_close_tags() {
        let err = parse_xml_string("<a><b></a></b>").unwrap_err();
        assert!(err.to_string().contains("malformed hierarchy") || matches!(err, XmlParseError::ParseError(_)));
    }
}
