use std::path::Path;

/// Resolve the user's home directory, or error if unset.
pub fn home_dir() -> anyhow::Result<std::path::PathBuf> {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .map_err(|_| anyhow::anyhow!("HOME environment variable is not set"))
}

/// Create `path` (and parents) with owner-only permissions.
pub fn ensure_private_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", path.display()))?;
        set_secure_dir_permissions(path)?;
    }
    Ok(())
}

/// Write `contents` to a sibling temp file and rename it over `path`,
/// so readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_private_dir(parent)?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, contents)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", tmp.display()))?;
    set_secure_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        anyhow::anyhow!(
            "failed to move {} to {}: {e}",
            tmp.display(),
            path.display()
        )
    })
}

#[cfg(unix)]
pub fn set_secure_dir_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| anyhow::anyhow!("failed to chmod 700 {}: {e}", path.display()))
}

#[cfg(not(unix))]
pub fn set_secure_dir_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn set_secure_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| anyhow::anyhow!("failed to chmod 600 {}: {e}", path.display()))
}

#[cfg(not(unix))]
pub fn set_secure_file_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
