use super::MaskSink;
use crate::config::OverlapPolicy;
use crate::error::Result;
use crate::raster::MaskImage;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Writes masks as PNG files and captions as text files into one directory
///
/// A flattened mask becomes `<stem>.png`; separate layers become
/// `<stem>_<label>.png`. Captions go to `<stem>.txt`.
pub struct DatasetWriter {
    dir: PathBuf,
    files_written: usize,
}

impl DatasetWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!("Exporting dataset to {}", dir.display());
        Ok(Self {
            dir,
            files_written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files_written(&self) -> usize {
        self.files_written
    }

    /// One file name per layer. Labels that sanitize to the same fragment
    /// get `_2`, `_3`, ... so no layer overwrites another.
    fn layer_paths(&self, stem: &str, mask: &MaskImage) -> Vec<PathBuf> {
        if mask.overlap() == OverlapPolicy::Flatten {
            return mask
                .layers()
                .iter()
                .map(|_| self.dir.join(format!("{}.png", stem)))
                .collect();
        }

        let mut used = HashSet::new();
        mask.layers()
            .iter()
            .map(|layer| {
                let base = sanitize(&layer.label);
                let mut name = base.clone();
                let mut n = 2;
                while !used.insert(name.clone()) {
                    name = format!("{}_{}", base, n);
                    n += 1;
                }
                if name != base {
                    tracing::warn!("Layer '{}' written as '{}_{}.png'", layer.label, stem, name);
                }
                self.dir.join(format!("{}_{}.png", stem, name))
            })
            .collect()
    }
}

/// Keep labels usable as file name fragments
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

impl MaskSink for DatasetWriter {
    fn write_mask(&mut self, stem: &str, mask: &MaskImage) -> Result<()> {
        let paths = self.layer_paths(stem, mask);
        for (layer, path) in mask.layers().iter().zip(&paths) {
            layer.mask.save(path)?;
            tracing::debug!("Wrote mask {}", path.display());
            self.files_written += 1;
        }
        Ok(())
    }

    fn write_caption(&mut self, stem: &str, caption: &str) -> Result<()> {
        let path = self.dir.join(format!("{}.txt", stem));
        std::fs::write(&path, caption)?;
        self.files_written += 1;
        Ok(())
    }
}
