//! Filesystem finalizer: after an engine writes an output file, its times are
//! synchronized to the capture instant.

use std::path::Path;

use chrono::{DateTime, Local};
use filetime::FileTime;
use tracing::debug;

use crate::error::{ConvertError, Result};

/// Sets the access and modification times of `path` to `instant`. Unix offers
/// no portable birth-time write, so mtime is the authoritative field for
/// downstream date-based tooling.
///
/// A failure here fails the whole item even though the converted file stays on
/// disk: the contract promises timestamp fidelity, so partial success is not
/// reported as success.
pub fn stamp(path: &Path, instant: &DateTime<Local>) -> Result<()> {
    let ft = FileTime::from_unix_time(instant.timestamp(), instant.timestamp_subsec_nanos());
    filetime::set_file_times(path, ft, ft)
        .map_err(|e| ConvertError::TimestampUpdateFailed(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), "stamped file times to capture instant");
    Ok(())
}
