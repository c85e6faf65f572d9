//! An ordered, tag-preserving YAML value tree.
//!
//! Registry exports lean on custom tags (`!uuid`, `!lsst.daf.butler.Timespan`,
//! `!butler_time/tai/iso8601`) that the ingesting side insists on seeing again,
//! and on mappings whose key order matters to human readers. So we parse into
//! our own tree that keeps both.

use serde_yaml::Value;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Node>),
    Map(Mapping),

    /// A node with an explicit tag; the tag is stored without its leading `!`.
    Tagged(String, Box<Node>),
}

/// A mapping with string keys that remembers insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mapping {
    entries: Vec<(String, Node)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Set `key`, keeping its position if it's already present.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: Node) {
        let key = key.into();

        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up a string-valued field, seeing through tags.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Node::as_str)
    }
}

impl<K: Into<String>> FromIterator<(K, Node)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, Node)>>(iter: I) -> Self {
        let mut m = Mapping::new();

        for (k, v) in iter {
            m.insert(k, v);
        }

        m
    }
}

impl Node {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Node::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Node::Float(f)
                } else {
                    return Err(Error::ExportFormat(format!("unrepresentable number {n}")));
                }
            }
            Value::String(s) => Node::Str(s),
            Value::Sequence(items) => Node::Seq(
                items
                    .into_iter()
                    .map(Node::from_value)
                    .collect::<Result<_>>()?,
            ),
            Value::Mapping(map) => {
                let mut m = Mapping::new();

                for (k, v) in map {
                    m.insert(key_text(k)?, Node::from_value(v)?);
                }

                Node::Map(m)
            }
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                Node::Tagged(
                    tag.trim_start_matches('!').to_owned(),
                    Box::new(Node::from_value(tagged.value)?),
                )
            }
        })
    }

    pub fn tagged<S: Into<String>>(tag: S, inner: Node) -> Self {
        Node::Tagged(tag.into(), Box::new(inner))
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Node::Tagged(tag, _) => Some(tag),
            _ => None,
        }
    }

    /// The node with any tags peeled off.
    pub fn untagged(&self) -> &Node {
        match self {
            Node::Tagged(_, inner) => inner.untagged(),
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.untagged(), Node::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.untagged() {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value. Exports loaded without type resolution carry integers as
    /// strings, so numeric text counts too.
    pub fn as_i64(&self) -> Option<i64> {
        match self.untagged() {
            Node::Int(i) => Some(*i),
            Node::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&Vec<Node>> {
        match self.untagged() {
            Node::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Mapping> {
        match self.untagged() {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The textual form used to compare identifiers (dataset ids, filter
    /// names) regardless of whether the export typed them.
    pub fn scalar_text(&self) -> Option<String> {
        match self.untagged() {
            Node::Str(s) => Some(s.clone()),
            Node::Int(i) => Some(i.to_string()),
            Node::Bool(b) => Some(b.to_string()),
            Node::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }
}

fn key_text(key: Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_owned()),
        other => Err(Error::ExportFormat(format!(
            "unsupported mapping key {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Node {
        Node::from_value(serde_yaml::from_str(text).unwrap()).unwrap()
    }

    #[test]
    fn keeps_key_order() {
        let node = parse("zeta: 1\nalpha: 2\nmid: 3\n");
        let keys: Vec<_> = node.as_map().unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn keeps_tags() {
        let node = parse("id: !uuid 'abc-123'\nspan: !lsst.daf.butler.Timespan\n  begin: null\n");
        let m = node.as_map().unwrap();

        let id = m.get("id").unwrap();
        assert_eq!(id.tag(), Some("uuid"));
        assert_eq!(id.as_str(), Some("abc-123"));

        let span = m.get("span").unwrap();
        assert_eq!(span.tag(), Some("lsst.daf.butler.Timespan"));
        assert!(span.as_map().unwrap().get("begin").unwrap().is_null());
    }

    #[test]
    fn lenient_integers() {
        assert_eq!(parse("'42'").as_i64(), Some(42));
        assert_eq!(parse("42").as_i64(), Some(42));
        assert_eq!(parse("S42").as_i64(), None);
        assert_eq!(parse("42").scalar_text().as_deref(), Some("42"));
    }

    #[test]
    fn insert_keeps_position() {
        let mut m: Mapping = [("a", Node::Int(1)), ("b", Node::Int(2))].into_iter().collect();
        m.insert("a", Node::Null);
        m.insert("c", Node::Int(3));
        let keys: Vec<_> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert!(m.get("a").unwrap().is_null());
    }
}
