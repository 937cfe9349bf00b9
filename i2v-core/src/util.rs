use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

#[inline]
pub fn to_absolute_path(path: &Path) -> Result<PathBuf> {
    Ok(path_abs::PathAbs::new(path)?.as_path().to_path_buf())
}

/// Serialize `data` as pretty JSON into a sibling temp file, then rename it
/// into place. Readers never observe a torn file.
#[inline]
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let temp = path.extension().map_or_else(
        || path.with_extension("temp"),
        |extension| path.with_extension(format!("temp.{}", extension.to_string_lossy())),
    );
    let mut buffer = vec![];
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    data.serialize(&mut serializer)?;
    fs::write(&temp, buffer)
        .with_context(|| format!("Failed to write {temp}", temp = temp.display()))?;
    fs::rename(&temp, path)?;

    Ok(())
}
