use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::template::Template;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Could not write {0}: {1}")]
    WriteError(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

pub fn render(template: &Template, format: Format) -> Result<String, Error> {
    let contents = match format {
        Format::Json => serde_json::to_string_pretty(template).map_err(|error| error.to_string()),
        Format::Yaml => serde_yaml::to_string(template).map_err(|error| error.to_string()),
    };

    contents.map_err(Error::SerializationError)
}

/// Writes the rendered template to `path`, or to stdout when no path is given.
pub fn write(template: &Template, format: Format, path: Option<&Path>) -> Result<(), Error> {
    let file_contents = render(template, format)?;

    match path {
        Some(path) => fs::write(path, file_contents)
            .map_err(|error| Error::WriteError(path.display().to_string(), error.to_string())),
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", file_contents)
                .map_err(|error| Error::WriteError(String::from("stdout"), error.to_string()))
        }
    }
}
