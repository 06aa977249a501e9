//! The backend-artifact boundary.
//!
//! The core hands a traced computation and its boundary sequence to an
//! exporter; serializing the graph itself is the exporter's business.
//! [`publish`] enforces the artifact discipline: nothing lands at the target
//! path unless the exporter ran to completion, so a failed export never
//! leaves a partial artifact in place.

use std::io::Write;
use std::path::Path;

use crate::internal::*;

pub trait GraphExporter {
    fn format(&self) -> &'static str;
    fn write(&self, trace: &Trace, w: &mut dyn Write) -> PortResult<()>;
}

/// Writes the trace to a temporary sibling of `path` and renames it into
/// place once the exporter has finished.
pub fn publish(exporter: &dyn GraphExporter, trace: &Trace, path: &Path) -> PortResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid artifact path {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{file_name}.partial"));
    let result = (|| -> PortResult<()> {
        let mut file = fs_err::File::create(&tmp)?;
        exporter.write(trace, &mut file)?;
        file.flush()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs_err::remove_file(&tmp);
        return Err(e.context(format!("exporting {} artifact", exporter.format())));
    }
    fs_err::rename(&tmp, path)?;
    log::info!("published {} artifact to {}", exporter.format(), path.display());
    Ok(())
}
