mod dataset;

pub use dataset::DatasetWriter;

use crate::error::Result;
use crate::raster::MaskImage;

/// Trait for mask export destinations
pub trait MaskSink {
    /// Write every layer of `mask` under the file stem `stem`
    fn write_mask(&mut self, stem: &str, mask: &MaskImage) -> Result<()>;

    /// Write the caption text accompanying the item `stem`
    fn write_caption(&mut self, stem: &str, caption: &str) -> Result<()>;
}
