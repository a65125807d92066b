// # Template Publisher
//
// Rewrites a widget file with the current total.
//
// ## Purpose
//
// The template is read once at startup and kept in memory. Every publish
// substitutes the placeholder token with the total and writes the result
// to the output path.
//
// ## Failure Behavior
//
// - Template missing or unreadable: construction fails (startup failure)
// - Template without the placeholder: construction fails (startup failure)
// - Output write fails: `publish` returns an error; the orchestrator logs
//   it and retries on the next tick while the total still differs
//
// ## Atomicity
//
// Output is written to a sibling `.tmp` file and renamed into place, so a
// reader of the output never sees a half-written widget.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::traits::Publisher;

/// Template-based publisher
///
/// # Example
///
/// ```rust,no_run
/// use tally_core::publish::TemplatePublisher;
/// use tally_core::traits::Publisher;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let publisher =
///         TemplatePublisher::new("widget.template.html", "widget.html", "{{count}}").await?;
///
///     publisher.publish(42).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct TemplatePublisher {
    template: String,
    placeholder: String,
    output_path: PathBuf,
}

impl TemplatePublisher {
    /// Load the template and prepare the publisher
    ///
    /// This will:
    /// 1. Read the template file
    /// 2. Verify it contains the placeholder
    /// 3. Create the output's parent directory if needed
    pub async fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        template_path: P,
        output_path: Q,
        placeholder: impl Into<String>,
    ) -> Result<Self, Error> {
        let template_path = template_path.as_ref();
        let output_path = output_path.as_ref().to_path_buf();
        let placeholder = placeholder.into();

        if placeholder.is_empty() {
            return Err(Error::template("Placeholder cannot be empty"));
        }

        let template = fs::read_to_string(template_path).await.map_err(|e| {
            Error::template(format!(
                "Failed to read template {}: {}",
                template_path.display(),
                e
            ))
        })?;

        if !template.contains(&placeholder) {
            return Err(Error::template(format!(
                "Template {} does not contain placeholder {}",
                template_path.display(),
                placeholder
            )));
        }

        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::template(format!(
                    "Failed to create output directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tracing::debug!(
            "Loaded template {} ({} bytes), output {}",
            template_path.display(),
            template.len(),
            output_path.display()
        );

        Ok(Self {
            template,
            placeholder,
            output_path,
        })
    }

    /// Render the template for `total`
    pub fn render(&self, total: u64) -> String {
        self.template.replace(&self.placeholder, &total.to_string())
    }

    /// Path the publisher writes to
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.output_path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    async fn write_temp(temp_path: &Path, content: &str) -> Result<(), Error> {
        let mut file = fs::File::create(temp_path).await.map_err(|e| {
            Error::publish(format!(
                "Failed to create temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            Error::publish(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.flush().await.map_err(|e| {
            Error::publish(format!(
                "Failed to flush temp file {}: {}",
                temp_path.display(),
                e
            ))
        })
    }

    /// Write `content` to a sibling temp file, then rename it over the output
    ///
    /// On any failure the temp file is removed and the output is untouched.
    async fn write_atomically(&self, content: &str) -> Result<(), Error> {
        let temp_path = self.temp_path();

        let result = match Self::write_temp(&temp_path, content).await {
            Ok(()) => fs::rename(&temp_path, &self.output_path).await.map_err(|e| {
                Error::publish(format!(
                    "Failed to rename {} to {}: {}",
                    temp_path.display(),
                    self.output_path.display(),
                    e
                ))
            }),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path).await {
                tracing::debug!("Could not remove {}: {}", temp_path.display(), e);
            }
        }

        result
    }
}

#[async_trait]
impl Publisher for TemplatePublisher {
    async fn publish(&self, total: u64) -> Result<(), Error> {
        let rendered = self.render(total);
        self.write_atomically(&rendered).await?;
        tracing::trace!("Wrote total {} to {}", total, self.output_path.display());
        Ok(())
    }
}
