use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use xml_model_validator::{
    Cli, ConfigError, ConfigManager, ErrorReporter, ValidationError, XmlValidator,
};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse_args();
    let reporter = ErrorReporter::new();

    match run(&cli) {
        Ok(()) => {
            reporter.report_success(&cli.document.display().to_string(), &cli.schema);
            ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(failure) = err
                .downcast_ref::<ValidationError>()
                .filter(|failure| !matches!(failure, ValidationError::Io(_)))
            {
                reporter.report_failure(failure);
            } else if let Some(failure) = err.downcast_ref::<ConfigError>() {
                reporter.report_config_error(failure);
            } else {
                tracing::error!("{:#}", err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ConfigManager::load_config()?;
    let validator = XmlValidator::new(config.locator());

    let xml = std::fs::read(&cli.document)
        .map_err(ValidationError::Io)
        .with_context(|| format!("Failed to read {}", cli.document.display()))?;

    validator.validate(&xml, &cli.schema, Some(config.catalogs.as_slice()))?;
    Ok(())
}
