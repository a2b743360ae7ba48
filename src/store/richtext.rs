//! Contentful rich-text nodes, limited to what a plain-text testimonial needs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A text mark such as bold or italic. Testimonials never carry any, but
/// the field is part of every text node on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub mark_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "nodeType", rename_all = "lowercase")]
pub enum Node {
    Document {
        data: Map<String, Value>,
        content: Vec<Node>,
    },
    Paragraph {
        data: Map<String, Value>,
        content: Vec<Node>,
    },
    Text {
        value: String,
        marks: Vec<Mark>,
        data: Map<String, Value>,
    },
}

impl Node {
    /// Wrap plain text as a document holding one paragraph with one unmarked text node.
    pub fn document_from_plain_text(text: &str) -> Self {
        Node::Document {
            data: Map::new(),
            content: vec![Node::Paragraph {
                data: Map::new(),
                content: vec![Node::Text {
                    value: text.to_string(),
                    marks: Vec::new(),
                    data: Map::new(),
                }],
            }],
        }
    }

    /// Concatenate every text node under this one, depth first.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Document { content, .. } | Node::Paragraph { content, .. } => {
                for child in content {
                    child.collect_text(out);
                }
            }
            Node::Text { value, .. } => out.push_str(value),
        }
    }
}
