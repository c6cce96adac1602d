//! Stable per-installation identifier attached to mirrored session rows.
//!
//! Stored as a single line `pomodoro-<uuid>` in `device_id` under the data
//! directory. A file that does not hold a valid id is replaced.

use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::Result;
use crate::storage::data_dir;

const DEVICE_ID_FILE: &str = "device_id";
const DEVICE_ID_PREFIX: &str = "pomodoro-";

fn parse_device_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    let uuid = id.strip_prefix(DEVICE_ID_PREFIX)?;
    Uuid::parse_str(uuid).ok()?;
    Some(id.to_string())
}

/// Read the device id stored in `dir`, creating (or replacing) it when
/// missing or malformed.
pub fn device_id_at(dir: &Path) -> Result<String> {
    let path = dir.join(DEVICE_ID_FILE);

    match fs::read_to_string(&path) {
        Ok(content) => {
            if let Some(id) = parse_device_id(&content) {
                return Ok(id);
            }
            tracing::warn!(path = %path.display(), "replacing malformed device id");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    fs::create_dir_all(dir)?;
    let id = format!("{DEVICE_ID_PREFIX}{}", Uuid::new_v4());
    fs::write(&path, format!("{id}\n"))?;
    Ok(id)
}

/// Device id in the default data directory.
pub fn device_id() -> Result<String> {
    device_id_at(&data_dir()?)
}
