pub mod ids;
pub mod template;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const TAB: &str = "tab";
pub const TTN_UPLINK: &str = "ttn uplink";
pub const TTN_APP: &str = "ttn app";
pub const FUNCTION: &str = "function";
pub const INFLUXDB_OUT: &str = "influxdb out";

/// One node of a flow graph. Kind-specific properties are kept untyped and
/// pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<String>,
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl FlowNode {
    pub fn is_tab(&self) -> bool {
        self.kind == TAB
    }

    pub fn label(&self) -> Option<&str> {
        self.props.get("label").and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.props
            .insert(key.to_string(), Value::String(value.into()));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
}

impl FlowGraph {
    pub fn tab(&self) -> Option<&FlowNode> {
        self.nodes.iter().find(|node| node.is_tab())
    }

    /// Removes and returns the first tab node, leaving the flat node list.
    pub fn take_tab(&mut self) -> Option<FlowNode> {
        let index = self.nodes.iter().position(FlowNode::is_tab)?;
        Some(self.nodes.remove(index))
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|node| node.id.as_str()).collect()
    }

    pub fn nodes_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a FlowNode> + 'a {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> FlowGraph {
        serde_json::from_value(json!([
            { "id": "aaaa0001.000001", "type": "function", "z": "aaaa0000.000001", "func": "" },
            { "id": "aaaa0000.000001", "type": "tab", "label": "s1" },
            { "id": "aaaa0002.000001", "type": "ttn app", "appId": "" }
        ]))
        .unwrap()
    }

    #[test]
    fn node_properties_round_trip_untouched() {
        let graph = graph();
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value[0]["func"], "");
        assert_eq!(value[0]["z"], "aaaa0000.000001");
        assert!(value[2].get("z").is_none());
    }

    #[test]
    fn take_tab_removes_only_the_tab() {
        let mut graph = graph();
        let tab = graph.take_tab().unwrap();
        assert_eq!(tab.label(), Some("s1"));
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.tab().is_none());
        assert!(graph.take_tab().is_none());
    }

    #[test]
    fn nodes_of_kind_filters_by_type() {
        let graph = graph();
        let kinds: Vec<&str> = graph
            .nodes_of_kind(TTN_APP)
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(kinds, vec!["aaaa0002.000001"]);
    }
}
