// # Publisher Implementations
//
// This module provides implementations of the Publisher trait for
// different output targets.

pub mod memory;
pub mod template;

pub use memory::MemoryPublisher;
pub use template::TemplatePublisher;

use crate::config::PublisherConfig;
use crate::error::Result;
use crate::traits::Publisher;

/// Create a publisher from configuration
///
/// For the template publisher this reads the template, so an unreadable
/// template surfaces here as a startup failure.
pub async fn create_publisher(config: &PublisherConfig) -> Result<Box<dyn Publisher>> {
    config.validate()?;

    match config {
        PublisherConfig::Template {
            template_path,
            output_path,
            placeholder,
        } => {
            let publisher =
                TemplatePublisher::new(template_path, output_path, placeholder.as_str()).await?;
            Ok(Box::new(publisher))
        }
        PublisherConfig::Memory => Ok(Box::new(MemoryPublisher::new())),
    }
}
