//! Required child elements declared by a RELAX NG grammar.
//!
//! libxml2 compiles simple RELAX NG content models to automata. When such a
//! content model ends too early the engine reports "Expecting an element ,
//! got nothing" and leaves the expected name blank. [`RequiredChildren`]
//! reads the grammar's own element declarations so that the name can be
//! filled in afterwards.

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{DiagnosticCollector, Severity};
use crate::libxml2::XmlElement;
use crate::schema_loader::RELAX_NG_NAMESPACE;

const BLANK_EXPECTATION: &str = "Expecting an element , got nothing";

/// Child elements each declared element must contain at least once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredChildren {
    by_element: HashMap<String, Vec<String>>,
}

impl RequiredChildren {
    /// Read the element declarations of a grammar in XML syntax.
    ///
    /// Only plain element names are understood. References are followed
    /// into definitions of the same document; definitions that live in
    /// included grammars are not visible here and contribute nothing.
    pub fn from_grammar(root: XmlElement<'_>) -> Self {
        let all = root.descendants();

        let mut defines: HashMap<String, Vec<XmlElement<'_>>> = HashMap::new();
        for define in all.iter().filter(|e| e.is(Some(RELAX_NG_NAMESPACE), "define")) {
            if let Some(name) = define.attribute("name") {
                defines.entry(name).or_default().push(*define);
            }
        }

        let mut by_element = HashMap::new();
        for element in all.iter().filter(|e| e.is(Some(RELAX_NG_NAMESPACE), "element")) {
            let Some((name, content)) = declared_name(element) else {
                continue;
            };
            let mut required = Vec::new();
            collect_required(&content, &defines, &mut HashSet::new(), &mut required);
            by_element.entry(name).or_insert(required);
        }

        Self { by_element }
    }

    pub fn required(&self, element: &str) -> &[String] {
        self.by_element
            .get(element)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Required children `element` does not have, in declaration order.
    pub fn missing(&self, element: XmlElement<'_>) -> Vec<String> {
        let present: HashSet<String> = element
            .children()
            .iter()
            .map(|child| child.name().local_name)
            .collect();
        let mut missing: Vec<String> = Vec::new();
        for name in self.required(&element.name().local_name) {
            if !present.contains(name) && !missing.contains(name) {
                missing.push(name.clone());
            }
        }
        missing
    }

    /// Rewrite blank "Expecting an element" messages with the names of the
    /// elements missing at the reported line.
    pub fn name_missing_elements(&self, root: XmlElement<'_>, collector: &mut DiagnosticCollector) {
        let incomplete: Vec<(Option<u32>, Vec<String>)> = root
            .descendants()
            .into_iter()
            .map(|element| (element.line(), self.missing(element)))
            .filter(|(_, missing)| !missing.is_empty())
            .collect();
        if incomplete.is_empty() {
            return;
        }

        for diagnostic in collector.iter_mut() {
            if diagnostic.severity == Severity::Warning
                || !diagnostic.message.contains(BLANK_EXPECTATION)
            {
                continue;
            }
            let found = incomplete
                .iter()
                .find(|(line, _)| diagnostic.line.is_none() || *line == diagnostic.line);
            if let Some((_, missing)) = found {
                diagnostic.message = diagnostic.message.replace(
                    BLANK_EXPECTATION,
                    &format!("Expecting an element {}, got nothing", missing.join(" or ")),
                );
            }
        }
    }
}

/// Local name and content patterns of an `element` declaration.
fn declared_name<'a>(element: &XmlElement<'a>) -> Option<(String, Vec<XmlElement<'a>>)> {
    if let Some(name) = element.attribute("name") {
        return Some((local_part(&name), element.children()));
    }
    let children = element.children();
    let (first, rest) = children.split_first()?;
    first
        .is(Some(RELAX_NG_NAMESPACE), "name")
        .then(|| (local_part(first.text().trim()), rest.to_vec()))
}

fn local_part(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_string()
}

fn collect_required<'a>(
    content: &[XmlElement<'a>],
    defines: &HashMap<String, Vec<XmlElement<'a>>>,
    visited: &mut HashSet<String>,
    required: &mut Vec<String>,
) {
    for pattern in content {
        let name = pattern.name();
        if name.namespace.as_deref() != Some(RELAX_NG_NAMESPACE) {
            continue;
        }
        match name.local_name.as_str() {
            "element" => {
                if let Some((child, _)) = declared_name(pattern) {
                    required.push(child);
                }
            }
            "group" | "oneOrMore" | "interleave" | "mixed" => {
                collect_required(&pattern.children(), defines, visited, required);
            }
            "ref" => {
                let Some(target) = pattern.attribute("name") else {
                    continue;
                };
                if !visited.insert(target.clone()) {
                    continue;
                }
                // Combined definitions are ambiguous; only a single one is followed.
                if let Some([define]) = defines.get(&target).map(Vec::as_slice) {
                    collect_required(&define.children(), defines, visited, required);
                }
            }
            _ => {}
        }
    }
}
