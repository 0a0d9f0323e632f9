//! Small accessors over `kdl` documents shared by the balance-table loader
//! and the order-language parser. All lookups are by node/property name;
//! callers decide whether absence is an error.

use anyhow::{anyhow, Result};
use kdl::{KdlDocument, KdlNode, KdlValue};

pub fn child<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlNode> {
    doc.nodes().iter().find(|n| n.name().value() == name)
}

pub fn require_child<'a>(doc: &'a KdlDocument, name: &str) -> Result<&'a KdlNode> {
    child(doc, name).ok_or_else(|| anyhow!("missing node \"{name}\""))
}

pub fn children(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|d| d.nodes()).unwrap_or(&[])
}

pub fn prop<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .map(|e| e.value())
}

/// Positional (unnamed) arguments of a node.
pub fn args(node: &KdlNode) -> Vec<&KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
        .collect()
}

pub fn prop_i64(node: &KdlNode, key: &str) -> Option<i64> {
    prop(node, key).and_then(|v| v.as_integer()).map(|v| v as i64)
}

pub fn prop_str<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    prop(node, key).and_then(|v| v.as_string())
}

pub fn prop_bool(node: &KdlNode, key: &str) -> Option<bool> {
    prop(node, key).and_then(|v| v.as_bool())
}

pub fn require_prop_i64(node: &KdlNode, key: &str) -> Result<i64> {
    prop_i64(node, key).ok_or_else(|| anyhow!("node \"{}\" missing integer property \"{key}\"", node.name().value()))
}

pub fn first_arg_i64(node: &KdlNode) -> Result<i64> {
    args(node)
        .first()
        .and_then(|v| v.as_integer())
        .map(|v| v as i64)
        .ok_or_else(|| anyhow!("node \"{}\" missing integer argument", node.name().value()))
}

pub fn first_arg_str<'a>(node: &'a KdlNode) -> Result<&'a str> {
    args(node)
        .first()
        .and_then(|v| v.as_string())
        .ok_or_else(|| anyhow!("node \"{}\" missing string argument", node.name().value()))
}
