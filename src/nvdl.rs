//! NVDL scripts.
//!
//! An NVDL script splits a document into sections, one per run of elements
//! sharing a namespace, and decides per section what to do with it: validate
//! it against a grammar, allow it, reject it, or attach it to the section it
//! sits in. The grammars are compiled by the regular engines when the script
//! is loaded; validation copies each section into a document of its own and
//! hands it to them.
//!
//! Element sections only. Rules that match attributes alone are ignored, and
//! scripts using `trigger` or `context` are refused.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::diagnostics::{Diagnostic, Severity};
use crate::error::LibXml2Result;
use crate::libxml2::{
    DiagnosticSink, ElementName, LibXml2Wrapper, ValidationResult, XmlDocPtr, XmlElement,
    build_uri,
};
use crate::resolver::ResolutionScope;
use crate::schema_loader::{
    Grammar, NVDL_NAMESPACE, Schema, SchemaLanguage, SchemaLoad, SchemaLoader,
};

const DEFAULT_MODE: &str = "#default";
const DEFAULT_WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
enum NamespacePattern {
    /// `namespace ns="..."`, with its wildcard character
    Namespace { pattern: String, wildcard: char },
    AnyNamespace,
}

impl NamespacePattern {
    fn matches(&self, namespace: &str) -> bool {
        match self {
            NamespacePattern::AnyNamespace => true,
            NamespacePattern::Namespace { pattern, wildcard } => {
                wildcard_match(pattern, *wildcard, namespace)
            }
        }
    }
}

/// Glob match where `wildcard` stands for any run of characters.
fn wildcard_match(pattern: &str, wildcard: char, text: &str) -> bool {
    let mut parts = pattern.split(wildcard);
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ActionKind {
    /// Index into the compiled grammars of the script
    Validate(usize),
    Allow,
    Reject,
    Attach,
    Unwrap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Action {
    kind: ActionKind,
    use_mode: Option<String>,
}

#[derive(Debug, Clone)]
struct Rule {
    namespace: NamespacePattern,
    actions: Vec<Action>,
}

#[derive(Debug, Clone, Default)]
struct Mode {
    rules: Vec<Rule>,
}

impl Mode {
    /// Actions of the first rule matching `namespace`; namespace rules take
    /// precedence over `anyNamespace`.
    fn actions_for(&self, namespace: &str) -> Option<&[Action]> {
        let specific = self.rules.iter().find(|rule| {
            !matches!(rule.namespace, NamespacePattern::AnyNamespace)
                && rule.namespace.matches(namespace)
        });
        specific
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|rule| rule.namespace == NamespacePattern::AnyNamespace)
            })
            .map(|rule| rule.actions.as_slice())
    }
}

/// A loaded NVDL script together with the grammars it validates against.
#[derive(Debug)]
pub struct NvdlSchema {
    start_mode: String,
    modes: HashMap<String, Mode>,
    grammars: Vec<Grammar>,
}

/// Why a script could not be loaded
enum ScriptError {
    /// A referenced grammar could not be read.
    Unavailable,
    Rejected(Option<String>),
}

impl From<ScriptError> for SchemaLoad {
    fn from(error: ScriptError) -> Self {
        match error {
            ScriptError::Unavailable => SchemaLoad::Unavailable,
            ScriptError::Rejected(reason) => SchemaLoad::Rejected { reason },
        }
    }
}

fn rejected<T>(reason: impl Into<String>) -> Result<T, ScriptError> {
    Err(ScriptError::Rejected(Some(reason.into())))
}

fn is_nvdl(element: &XmlElement<'_>, local_name: &str) -> bool {
    element.is(Some(NVDL_NAMESPACE), local_name)
}

fn namespace_of(name: &ElementName) -> &str {
    name.namespace.as_deref().unwrap_or_default()
}

/// Reads the script tree, compiling referenced grammars as it goes.
struct ScriptReader<'s, 'l> {
    loader: &'s SchemaLoader<'l>,
    script_ref: &'s str,
    scope: &'s ResolutionScope,
    sink: &'s DiagnosticSink<'s>,
    modes: HashMap<String, Mode>,
    grammars: Vec<Grammar>,
    anonymous_modes: usize,
}

impl ScriptReader<'_, '_> {
    fn mode(&mut self, element: XmlElement<'_>) -> LibXml2Result<Result<Mode, ScriptError>> {
        let mut mode = Mode::default();
        for child in element.children() {
            let namespace = if is_nvdl(&child, "namespace") {
                let Some(pattern) = child.attribute("ns") else {
                    return Ok(rejected("NVDL namespace rule without an ns attribute"));
                };
                let wildcard = child
                    .attribute("wildCard")
                    .and_then(|value| value.chars().next())
                    .unwrap_or(DEFAULT_WILDCARD);
                NamespacePattern::Namespace { pattern, wildcard }
            } else if is_nvdl(&child, "anyNamespace") {
                NamespacePattern::AnyNamespace
            } else if is_nvdl(&child, "cancelNestedActions") {
                return Ok(rejected("NVDL cancelNestedActions is not supported"));
            } else {
                continue;
            };

            let matches_elements = child
                .attribute("match")
                .is_none_or(|value| value.split_whitespace().any(|token| token == "elements"));
            if !matches_elements {
                trace!(line = ?child.line(), "skipping attribute-only NVDL rule");
                continue;
            }

            let actions = match self.actions(child)? {
                Ok(actions) => actions,
                Err(error) => return Ok(Err(error)),
            };
            mode.rules.push(Rule { namespace, actions });
        }
        Ok(Ok(mode))
    }

    fn actions(&mut self, rule: XmlElement<'_>) -> LibXml2Result<Result<Vec<Action>, ScriptError>> {
        let mut actions = Vec::new();
        for child in rule.children() {
            if child.name().namespace.as_deref() != Some(NVDL_NAMESPACE) {
                continue;
            }
            let kind = match child.name().local_name.as_str() {
                "validate" => match self.validate_action(child)? {
                    Ok(index) => ActionKind::Validate(index),
                    Err(error) => return Ok(Err(error)),
                },
                "allow" => ActionKind::Allow,
                "reject" => ActionKind::Reject,
                "attach" => ActionKind::Attach,
                "unwrap" => ActionKind::Unwrap,
                "attachPlaceholder" => {
                    return Ok(rejected("NVDL attachPlaceholder is not supported"));
                }
                _ => continue,
            };
            let use_mode = match self.use_mode(child)? {
                Ok(use_mode) => use_mode,
                Err(error) => return Ok(Err(error)),
            };
            actions.push(Action { kind, use_mode });
        }
        if actions.is_empty() {
            return Ok(rejected(format!(
                "NVDL rule at line {} has no action",
                rule.line().unwrap_or_default()
            )));
        }
        Ok(Ok(actions))
    }

    /// `useMode` attribute, or a mode declared inline in the action.
    fn use_mode(
        &mut self,
        action: XmlElement<'_>,
    ) -> LibXml2Result<Result<Option<String>, ScriptError>> {
        for child in action.children() {
            if is_nvdl(&child, "context") {
                return Ok(rejected("NVDL context is not supported"));
            }
        }
        if let Some(name) = action.attribute("useMode") {
            return Ok(Ok(Some(name)));
        }
        let Some(inline) = action.children().into_iter().find(|c| is_nvdl(c, "mode")) else {
            return Ok(Ok(None));
        };
        self.anonymous_modes += 1;
        let name = format!("#inline-{}", self.anonymous_modes);
        match self.mode(inline)? {
            Ok(mode) => {
                self.modes.insert(name.clone(), mode);
                Ok(Ok(Some(name)))
            }
            Err(error) => Ok(Err(error)),
        }
    }

    fn validate_action(
        &mut self,
        action: XmlElement<'_>,
    ) -> LibXml2Result<Result<usize, ScriptError>> {
        let loaded = if let Some(href) = action.attribute("schema") {
            let resolved = build_uri(&href, self.script_ref)?.unwrap_or(href);
            debug!(script = %self.script_ref, schema = %resolved, "loading NVDL validation grammar");
            self.loader.load_nested(&resolved, self.scope, self.sink)?
        } else {
            let inline = action
                .children()
                .into_iter()
                .find(|child| is_nvdl(child, "schema"))
                .and_then(|schema| schema.children().into_iter().next());
            let Some(inline) = inline else {
                return Ok(rejected("NVDL validate action names no schema"));
            };
            let doc = inline.copy_as_document(|_| false)?;
            self.loader
                .compile_nested(self.script_ref, doc, self.scope, self.sink)?
        };

        Ok(match loaded {
            SchemaLoad::Compiled {
                schema: Schema::Grammar(grammar),
                ..
            } => {
                self.grammars.push(grammar);
                Ok(self.grammars.len() - 1)
            }
            SchemaLoad::Compiled {
                schema: Schema::Nvdl(_),
                ..
            } => rejected("NVDL scripts cannot validate against other NVDL scripts"),
            SchemaLoad::Unavailable => Err(ScriptError::Unavailable),
            SchemaLoad::Rejected { reason } => Err(ScriptError::Rejected(reason)),
        })
    }
}

impl NvdlSchema {
    /// Read the script rooted at `doc` and compile the grammars it refers
    /// to. References resolve against `script_ref`.
    pub fn compile(
        loader: &SchemaLoader<'_>,
        script_ref: &str,
        doc: &XmlDocPtr,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<SchemaLoad> {
        Ok(match Self::read(loader, script_ref, doc, scope, sink)? {
            Ok(schema) => SchemaLoad::Compiled {
                schema: Schema::Nvdl(schema),
                language: SchemaLanguage::Nvdl,
            },
            Err(error) => error.into(),
        })
    }

    fn read(
        loader: &SchemaLoader<'_>,
        script_ref: &str,
        doc: &XmlDocPtr,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<Result<Self, ScriptError>> {
        let Some(root) = doc.root().filter(|root| is_nvdl(root, "rules")) else {
            return Ok(rejected("NVDL script root must be rules"));
        };
        if root.descendants().iter().any(|e| is_nvdl(e, "trigger")) {
            return Ok(rejected("NVDL trigger is not supported"));
        }

        let mut reader = ScriptReader {
            loader,
            script_ref,
            scope,
            sink,
            modes: HashMap::new(),
            grammars: Vec::new(),
            anonymous_modes: 0,
        };

        let named_modes: Vec<XmlElement<'_>> = root
            .children()
            .into_iter()
            .filter(|child| is_nvdl(child, "mode"))
            .collect();
        let start_mode = if named_modes.is_empty() {
            match reader.mode(root)? {
                Ok(mode) => reader.modes.insert(DEFAULT_MODE.to_string(), mode),
                Err(error) => return Ok(Err(error)),
            };
            DEFAULT_MODE.to_string()
        } else {
            for element in named_modes {
                let Some(name) = element.attribute("name") else {
                    return Ok(rejected("NVDL mode without a name"));
                };
                match reader.mode(element)? {
                    Ok(mode) => reader.modes.insert(name, mode),
                    Err(error) => return Ok(Err(error)),
                };
            }
            match root.attribute("startMode") {
                Some(start) => start,
                None => return Ok(rejected("NVDL rules with modes need a startMode")),
            }
        };

        let referenced = reader
            .modes
            .values()
            .flat_map(|mode| &mode.rules)
            .flat_map(|rule| &rule.actions)
            .filter_map(|action| action.use_mode.as_ref())
            .chain(std::iter::once(&start_mode));
        for name in referenced {
            if !reader.modes.contains_key(name) {
                return Ok(rejected(format!("NVDL mode {} is not declared", name)));
            }
        }

        debug!(
            script = %script_ref,
            modes = reader.modes.len(),
            grammars = reader.grammars.len(),
            "NVDL script loaded"
        );
        Ok(Ok(Self {
            start_mode,
            modes: reader.modes,
            grammars: reader.grammars,
        }))
    }

    /// Validate every section of `doc`, reporting violations to `sink`.
    pub fn validate(
        &self,
        libxml2: &LibXml2Wrapper,
        doc: &XmlDocPtr,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<ValidationResult> {
        let Some(root) = doc.root() else {
            return Ok(ValidationResult::Invalid { error_count: None });
        };
        let mut verdict = ValidationResult::Valid;
        self.validate_section(libxml2, root, &self.start_mode, sink, &mut verdict)?;
        Ok(verdict)
    }

    fn actions(&self, mode: &str, namespace: &str) -> &[Action] {
        self.modes
            .get(mode)
            .and_then(|mode| mode.actions_for(namespace))
            .unwrap_or_default()
    }

    /// Whether a section in `namespace` stays part of its parent section
    /// when its parent is processed in `mode`.
    fn attaches(&self, mode: &str, namespace: &str) -> bool {
        let actions = self.actions(mode, namespace);
        !actions.is_empty()
            && actions
                .iter()
                .all(|action| action.kind == ActionKind::Attach)
    }

    fn validate_section(
        &self,
        libxml2: &LibXml2Wrapper,
        section: XmlElement<'_>,
        mode: &str,
        sink: &DiagnosticSink<'_>,
        verdict: &mut ValidationResult,
    ) -> LibXml2Result<()> {
        let name = section.name();
        let namespace = namespace_of(&name);
        let actions = self.actions(mode, namespace);
        if actions.is_empty() {
            reject(&section, &name, sink, verdict);
            return Ok(());
        }

        let child_mode = actions
            .iter()
            .find_map(|action| action.use_mode.as_deref())
            .unwrap_or(mode);
        trace!(element = %name.expanded_name(), mode, child_mode, "processing NVDL section");

        for action in actions {
            match &action.kind {
                ActionKind::Validate(index) => {
                    let Some(grammar) = self.grammars.get(*index) else {
                        continue;
                    };
                    let copy = section.copy_as_document(|child| {
                        !self.attaches(child_mode, namespace_of(child))
                    })?;
                    combine(verdict, grammar.validate(libxml2, &copy, sink)?);
                }
                ActionKind::Reject => reject(&section, &name, sink, verdict),
                ActionKind::Allow | ActionKind::Attach | ActionKind::Unwrap => {}
            }
        }

        for child in nested_sections(section, |child| self.attaches(child_mode, namespace_of(child))) {
            self.validate_section(libxml2, child, child_mode, sink, verdict)?;
        }
        Ok(())
    }
}

fn reject(
    section: &XmlElement<'_>,
    name: &ElementName,
    sink: &DiagnosticSink<'_>,
    verdict: &mut ValidationResult,
) {
    sink.report(
        Diagnostic::new(
            Severity::Error,
            format!(
                "element {} is not allowed in namespace \"{}\" here",
                name.qualified_name(),
                namespace_of(name)
            ),
        )
        .with_location(None, section.line()),
    );
    combine(verdict, ValidationResult::Invalid { error_count: None });
}

/// Keep the worse of two results: internal errors over violations over
/// success.
fn combine(verdict: &mut ValidationResult, result: ValidationResult) {
    let rank = |result: &ValidationResult| match result {
        ValidationResult::Valid => 0,
        ValidationResult::Invalid { .. } => 1,
        ValidationResult::InternalError { .. } => 2,
    };
    if rank(&result) > rank(verdict) {
        *verdict = result;
    }
}

/// Roots of the sections directly below `section`. Sections that `attached`
/// accepts belong to `section` and are searched through instead.
fn nested_sections<'a>(
    section: XmlElement<'a>,
    mut attached: impl FnMut(&ElementName) -> bool,
) -> Vec<XmlElement<'a>> {
    let mut found = Vec::new();
    let mut pending = vec![section];
    while let Some(element) = pending.pop() {
        let namespace = element.name().namespace;
        for child in element.children() {
            let name = child.name();
            if name.namespace != namespace && !attached(&name) {
                found.push(child);
            } else {
                pending.push(child);
            }
        }
    }
    found.sort_by_key(|element| element.line());
    found
}
