use clap::Parser;
use std::path::PathBuf;

/// Validate one XML document against a DTD, XML Schema, RELAX NG or
/// Schematron model
#[derive(Parser, Debug, Clone)]
#[command(name = "xml-model-validator")]
#[command(about = "Validate an XML document against a schema model")]
#[command(version)]
pub struct Cli {
    /// XML document to validate
    #[arg(help = "Path of the XML document")]
    pub document: PathBuf,

    /// Schema reference: a path, a URI, or a cp:/ bundled resource
    #[arg(help = "Schema to validate against (.dtd selects DTD validation)")]
    pub schema: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
