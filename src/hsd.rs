//! Minimal HSD (Human-readable Structured Data) document model for DFTB+.
//!
//! DFTB+ reads its input from `dftb_in.hsd`, a tree of nested
//! `Key = Value { ... }` groups. The DFTB+ facade builds an [`HsdDocument`]
//! and serializes it with [`HsdDocument::to_text`]; nothing in this module
//! knows about DFTB+ semantics.
//!
//! ```
//! use qcflow::hsd::{HsdDocument, HsdNode};
//!
//! let mut doc = HsdDocument::new();
//! doc.push(HsdNode::group("ParserOptions", vec![HsdNode::assign("ParserVersion", "11")]));
//! assert_eq!(doc.to_text(), "ParserOptions {\n  ParserVersion = 11\n}\n");
//! ```

/// Indentation unit of the serialized document.
const INDENT: &str = "  ";

/// One node of an HSD tree.
#[derive(Debug, Clone, PartialEq)]
pub enum HsdNode {
    /// `key = value`
    Assign {
        /// Left hand side, may carry a unit such as `TimeStep [fs]`
        key: String,
        /// Right hand side, written verbatim
        value: String,
    },
    /// `header {` children `}`
    Group {
        /// Text before the opening brace, e.g. `Driver = VelocityVerlet`
        header: String,
        /// Nested nodes
        children: Vec<HsdNode>,
    },
    /// Verbatim line, e.g. `<<< "mol.gen"` or `constant 1 300.0`
    Line(String),
}

impl HsdNode {
    /// Builds an assignment node.
    pub fn assign(key: impl Into<String>, value: impl ToString) -> Self {
        HsdNode::Assign {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Builds a group node.
    pub fn group(header: impl Into<String>, children: Vec<HsdNode>) -> Self {
        HsdNode::Group {
            header: header.into(),
            children,
        }
    }

    /// Builds a verbatim line.
    pub fn line(text: impl Into<String>) -> Self {
        HsdNode::Line(text.into())
    }

    fn write(&self, depth: usize, out: &mut String) {
        let pad = INDENT.repeat(depth);
        match self {
            HsdNode::Assign { key, value } => {
                out.push_str(&format!("{}{} = {}\n", pad, key, value));
            }
            HsdNode::Line(text) => out.push_str(&format!("{}{}\n", pad, text)),
            HsdNode::Group { header, children } => {
                out.push_str(&format!("{}{} {{\n", pad, header));
                for child in children {
                    child.write(depth + 1, out);
                }
                out.push_str(&format!("{}}}\n", pad));
            }
        }
    }

    /// Finds a direct child group or assignment by its header/key.
    pub fn child(&self, name: &str) -> Option<&HsdNode> {
        match self {
            HsdNode::Group { children, .. } => children.iter().find(|c| c.name() == Some(name)),
            _ => None,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            HsdNode::Assign { key, .. } => Some(key.as_str()),
            HsdNode::Group { header, .. } => Some(header.as_str()),
            HsdNode::Line(_) => None,
        }
    }
}

/// Top level sequence of HSD nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HsdDocument {
    /// Top level nodes in file order
    pub nodes: Vec<HsdNode>,
}

impl HsdDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a top level node.
    pub fn push(&mut self, node: HsdNode) {
        self.nodes.push(node);
    }

    /// Finds a top level node by header or key.
    pub fn get(&self, name: &str) -> Option<&HsdNode> {
        self.nodes.iter().find(|n| n.name() == Some(name))
    }

    /// Serializes the document; top level nodes are separated by a blank line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            node.write(0, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_indentation() {
        let mut doc = HsdDocument::new();
        doc.push(HsdNode::group(
            "Geometry = GenFormat",
            vec![HsdNode::line("<<< \"water.gen\"")],
        ));
        doc.push(HsdNode::group(
            "Driver = VelocityVerlet",
            vec![
                HsdNode::assign("TimeStep [fs]", 1.0),
                HsdNode::group(
                    "Thermostat = NoseHoover",
                    vec![HsdNode::assign("Temperature [K]", 298.0)],
                ),
            ],
        ));

        let expected = "Geometry = GenFormat {\n  <<< \"water.gen\"\n}\n\n\
Driver = VelocityVerlet {\n  TimeStep [fs] = 1\n  Thermostat = NoseHoover {\n    Temperature [K] = 298\n  }\n}\n";
        assert_eq!(doc.to_text(), expected);
    }

    #[test]
    fn test_lookup() {
        let node = HsdNode::group("Hamiltonian = DFTB", vec![HsdNode::assign("Charge", 0)]);
        let mut doc = HsdDocument::new();
        doc.push(node);
        let ham = doc.get("Hamiltonian = DFTB").unwrap();
        assert_eq!(ham.child("Charge"), Some(&HsdNode::assign("Charge", "0")));
        assert!(ham.child("Filling").is_none());
    }
}
