use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::content_model::RequiredChildren;
use crate::error::LibXml2Result;
use crate::libxml2::{
    CompiledSchema, DiagnosticSink, GrammarEngine, LibXml2Wrapper, ValidationResult,
    XML_PARSE_NONET, XmlDocPtr,
};
use crate::nvdl::NvdlSchema;
use crate::resolver::ResolutionScope;
use crate::resource::ResourceLocator;

pub const XML_SCHEMA_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
pub const RELAX_NG_NAMESPACE: &str = "http://relaxng.org/ns/structure/1.0";
pub const ISO_SCHEMATRON_NAMESPACE: &str = "http://purl.oclc.org/dsdl/schematron";
pub const SCHEMATRON_1_5_NAMESPACE: &str = "http://www.ascc.net/xml/schematron";
pub const NVDL_NAMESPACE: &str = "http://purl.oclc.org/dsdl/nvdl/ns/structure/1.0";

/// Grammar languages a schema reference may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaLanguage {
    XmlSchema,
    RelaxNg,
    RelaxNgCompact,
    Schematron,
    Nvdl,
}

impl SchemaLanguage {
    /// Detect the language from the namespace of a grammar's root element.
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            XML_SCHEMA_NAMESPACE => Some(SchemaLanguage::XmlSchema),
            RELAX_NG_NAMESPACE => Some(SchemaLanguage::RelaxNg),
            ISO_SCHEMATRON_NAMESPACE | SCHEMATRON_1_5_NAMESPACE => Some(SchemaLanguage::Schematron),
            NVDL_NAMESPACE => Some(SchemaLanguage::Nvdl),
            _ => None,
        }
    }

    /// Guess the language from a reference's file extension.
    pub fn from_extension(schema_ref: &str) -> Option<Self> {
        let extension = Path::new(schema_ref).extension()?.to_str()?;
        match extension.to_ascii_lowercase().as_str() {
            "xsd" => Some(SchemaLanguage::XmlSchema),
            "rng" => Some(SchemaLanguage::RelaxNg),
            "rnc" => Some(SchemaLanguage::RelaxNgCompact),
            "sch" => Some(SchemaLanguage::Schematron),
            "nvdl" => Some(SchemaLanguage::Nvdl),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchemaLanguage::XmlSchema => "W3C XML Schema",
            SchemaLanguage::RelaxNg => "RELAX NG",
            SchemaLanguage::RelaxNgCompact => "RELAX NG compact syntax",
            SchemaLanguage::Schematron => "Schematron",
            SchemaLanguage::Nvdl => "NVDL",
        }
    }

    /// The libxml2 engine able to compile this language. NVDL scripts are
    /// not grammars of their own and have none.
    pub fn engine(&self) -> Option<GrammarEngine> {
        match self {
            SchemaLanguage::XmlSchema => Some(GrammarEngine::XmlSchema),
            SchemaLanguage::RelaxNg | SchemaLanguage::RelaxNgCompact => {
                Some(GrammarEngine::RelaxNg)
            }
            SchemaLanguage::Schematron => Some(GrammarEngine::Schematron),
            SchemaLanguage::Nvdl => None,
        }
    }
}

/// Where a schema reference points
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// Bundled resource (`cp:` URI)
    Resource(String),
    Local(PathBuf),
    /// Network URI; only loadable when a catalog maps it elsewhere
    Remote(String),
}

impl SchemaSource {
    pub fn classify(schema_ref: &str) -> Self {
        if ResourceLocator::is_resource_uri(schema_ref) {
            return SchemaSource::Resource(schema_ref.to_string());
        }
        let lower = schema_ref.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("ftp://")
        {
            return SchemaSource::Remote(schema_ref.to_string());
        }
        match schema_ref.strip_prefix("file://") {
            Some(path) => SchemaSource::Local(PathBuf::from(path)),
            None => SchemaSource::Local(PathBuf::from(schema_ref)),
        }
    }
}

/// A grammar compiled by one of the libxml2 engines.
#[derive(Debug)]
pub struct Grammar {
    compiled: CompiledSchema,
    required: Option<RequiredChildren>,
}

impl Grammar {
    pub fn engine(&self) -> GrammarEngine {
        self.compiled.engine()
    }

    /// Validate `doc`, reporting every violation to `sink`.
    pub fn validate(
        &self,
        libxml2: &LibXml2Wrapper,
        doc: &XmlDocPtr,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<ValidationResult> {
        let result = libxml2.validate_doc(&self.compiled, doc, sink)?;
        if let (true, Some(required), Some(root)) = (result.is_invalid(), &self.required, doc.root())
        {
            sink.amend(|collector| required.name_missing_elements(root, collector));
        }
        Ok(result)
    }
}

/// A loaded model, ready to validate documents.
#[derive(Debug)]
pub enum Schema {
    Grammar(Grammar),
    Nvdl(NvdlSchema),
}

impl Schema {
    pub fn validate(
        &self,
        libxml2: &LibXml2Wrapper,
        doc: &XmlDocPtr,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<ValidationResult> {
        match self {
            Schema::Grammar(grammar) => grammar.validate(libxml2, doc, sink),
            Schema::Nvdl(nvdl) => nvdl.validate(libxml2, doc, sink),
        }
    }
}

/// Outcome of loading and compiling a model
#[derive(Debug)]
pub enum SchemaLoad {
    Compiled {
        schema: Schema,
        language: SchemaLanguage,
    },
    /// The model itself could not be read.
    Unavailable,
    /// The model was read but could not be compiled.
    Rejected { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nesting {
    TopLevel,
    InsideNvdl,
}

/// Loads non-DTD models and compiles them with the matching libxml2 engine.
///
/// The language is taken from the namespace of the model's root element,
/// never from the file name. Compact syntax grammars reach this point
/// already translated to RELAX NG.
pub struct SchemaLoader<'a> {
    libxml2: &'a LibXml2Wrapper,
}

impl<'a> SchemaLoader<'a> {
    pub fn new(libxml2: &'a LibXml2Wrapper) -> Self {
        Self { libxml2 }
    }

    pub fn libxml2(&self) -> &'a LibXml2Wrapper {
        self.libxml2
    }

    /// Read `schema_ref` through libxml2 and compile it.
    ///
    /// Loads go through the resolution `scope` so that `cp:` URIs and
    /// catalogs apply; engine messages go to `sink`.
    pub fn load(
        &self,
        schema_ref: &str,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<SchemaLoad> {
        self.read_and_compile(schema_ref, scope, sink, Nesting::TopLevel)
    }

    /// Like [`SchemaLoader::load`], for grammars referenced from an NVDL
    /// script. NVDL scripts are refused here.
    pub fn load_nested(
        &self,
        schema_ref: &str,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<SchemaLoad> {
        self.read_and_compile(schema_ref, scope, sink, Nesting::InsideNvdl)
    }

    fn read_and_compile(
        &self,
        schema_ref: &str,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
        nesting: Nesting,
    ) -> LibXml2Result<SchemaLoad> {
        let source = SchemaSource::classify(schema_ref);
        if let SchemaSource::Remote(uri) = &source {
            warn!(schema = %uri, "network access is disabled; the schema must be mapped by a catalog");
        }
        debug!(schema = %schema_ref, source = ?source, "loading schema");

        let doc = self.libxml2.read_uri(schema_ref, XML_PARSE_NONET)?;
        if let Some(reason) = scope.syntax_errors().into_iter().next() {
            return Ok(SchemaLoad::Rejected {
                reason: Some(reason),
            });
        }
        match doc {
            Some(doc) => self.compile_with(schema_ref, doc, scope, sink, nesting),
            None if !scope.failed_loads().is_empty() => Ok(SchemaLoad::Unavailable),
            None => Ok(SchemaLoad::Rejected { reason: None }),
        }
    }

    /// Compile an already parsed model. `schema_ref` names it in messages
    /// and is the base for the references it makes.
    pub fn compile(
        &self,
        schema_ref: &str,
        doc: XmlDocPtr,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<SchemaLoad> {
        self.compile_with(schema_ref, doc, scope, sink, Nesting::TopLevel)
    }

    /// [`SchemaLoader::compile`] for a grammar embedded in an NVDL script.
    pub fn compile_nested(
        &self,
        schema_ref: &str,
        doc: XmlDocPtr,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<SchemaLoad> {
        self.compile_with(schema_ref, doc, scope, sink, Nesting::InsideNvdl)
    }

    fn compile_with(
        &self,
        schema_ref: &str,
        doc: XmlDocPtr,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
        nesting: Nesting,
    ) -> LibXml2Result<SchemaLoad> {
        let root = doc.root_element();
        let language = root
            .as_ref()
            .and_then(|root| root.namespace.as_deref())
            .and_then(SchemaLanguage::from_namespace);
        let Some(language) = language else {
            let root_name = root.map(|root| root.expanded_name()).unwrap_or_default();
            return Ok(SchemaLoad::Rejected {
                reason: Some(format!(
                    "root element {} does not belong to a known schema language",
                    root_name
                )),
            });
        };

        let Some(engine) = language.engine() else {
            if nesting == Nesting::InsideNvdl {
                return Ok(SchemaLoad::Rejected {
                    reason: Some(format!(
                        "{} is an NVDL script; NVDL scripts cannot validate against other NVDL scripts",
                        schema_ref
                    )),
                });
            }
            debug!(schema = %schema_ref, "compiling NVDL script");
            return NvdlSchema::compile(self, schema_ref, &doc, scope, sink);
        };
        let language = match (language, SchemaLanguage::from_extension(schema_ref)) {
            (SchemaLanguage::RelaxNg, Some(SchemaLanguage::RelaxNgCompact)) => {
                SchemaLanguage::RelaxNgCompact
            }
            (language, _) => language,
        };

        // The RELAX NG compiler rewrites its source tree, so the declared
        // content models are read first.
        let required = (engine == GrammarEngine::RelaxNg)
            .then(|| doc.root().map(RequiredChildren::from_grammar))
            .flatten();

        debug!(schema = %schema_ref, language = language.name(), "compiling schema");
        let compiled = self.libxml2.compile_schema(engine, doc, sink)?;
        Ok(match compiled {
            Some(compiled) => SchemaLoad::Compiled {
                schema: Schema::Grammar(Grammar { compiled, required }),
                language,
            },
            None => SchemaLoad::Rejected {
                reason: scope.syntax_errors().into_iter().next(),
            },
        })
    }
}
