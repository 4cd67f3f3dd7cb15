use std::path::PathBuf;

use anyhow::Result;

/// Root directory holding the database, uploads, backups and logs.
///
/// `LAWDESK_DATA_DIR` overrides everything (tests point it at a tempdir);
/// otherwise the platform data dir is used with a working-directory
/// fallback for stripped-down environments.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LAWDESK_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }

    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("failed to resolve application data directory"))?;
    Ok(base.join("lawdesk"))
}

pub fn db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("LAWDESK_DB") {
        return Ok(PathBuf::from(path));
    }
    Ok(data_dir()?.join("lawdesk.sqlite3"))
}

pub fn uploads_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LAWDESK_UPLOADS") {
        return Ok(PathBuf::from(dir));
    }
    Ok(data_dir()?.join("uploads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_lives_under_data_dir() {
        // Avoid env mutation; just check the derived layout when no
        // overrides are present in the child path computation.
        if std::env::var("LAWDESK_DB").is_err() && std::env::var("LAWDESK_DATA_DIR").is_err() {
            let data = data_dir().expect("data dir");
            let db = db_path().expect("db path");
            assert!(db.starts_with(&data));
            assert_eq!(db.file_name().unwrap(), "lawdesk.sqlite3");
        }
    }
}
