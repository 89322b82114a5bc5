//! Final assembly of component PDFs into the export artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use bindery_shared::{BinderyError, Result};

use crate::tools::PdfMerger;

/// Merge `components`, in order, into `output`.
///
/// A single component is copied without any tool. `configured` names the
/// tools that were looked for, for the error message when none was found.
#[instrument(skip_all, fields(components = components.len(), output = %output.display()))]
pub async fn merge_components(
    mergers: &[Arc<dyn PdfMerger>],
    configured: &[String],
    components: &[PathBuf],
    output: &Path,
) -> Result<()> {
    match components {
        [] => Err(BinderyError::validation(
            "nothing to assemble: no item produced any content",
        )),
        [single] => {
            tokio::fs::copy(single, output)
                .await
                .map_err(|e| BinderyError::io(single, e))?;
            Ok(())
        }
        _ if mergers.is_empty() => Err(BinderyError::MergeToolUnavailable {
            components: components.len(),
            tried: configured.join(", "),
        }),
        _ => {
            let mut failures = Vec::with_capacity(mergers.len());
            for merger in mergers {
                match merger.merge(components, output).await {
                    Ok(()) if output.is_file() => {
                        info!(tool = merger.name(), "components merged");
                        return Ok(());
                    }
                    Ok(()) => failures.push(format!("{}: produced no output", merger.name())),
                    Err(e) => {
                        warn!(tool = merger.name(), error = %e, "merge tool failed, trying next");
                        failures.push(e.to_string());
                    }
                }
            }
            Err(BinderyError::MergeFailure(failures.join("; ")))
        }
    }
}
