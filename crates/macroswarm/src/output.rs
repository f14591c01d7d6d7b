use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use macroswarm_models::CompositeReport;

/// Replace `path` with `content` so readers never see a partial file.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file =
        fs::File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Write `report.json` plus a dated copy under `archive/`.
/// Returns the path of the latest report.
pub fn write_report(dir: &Path, report: &CompositeReport) -> Result<PathBuf> {
    let archive_dir = dir.join("archive");
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("Failed to create {}", archive_dir.display()))?;

    let json = serde_json::to_string_pretty(report)?;

    let latest = dir.join("report.json");
    atomic_write(&latest, &json)?;

    let archive = archive_dir.join(format!(
        "report_{}.json",
        report.generated_at.format("%Y%m%d")
    ));
    atomic_write(&archive, &json)?;

    tracing::info!(report = %latest.display(), archive = %archive.display(), "Report written");
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use macroswarm_agents::synthesize;
    use macroswarm_models::SignalBands;

    #[test]
    fn writes_latest_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let report = synthesize(vec![], &SignalBands::default(), Duration::ZERO);

        let latest = write_report(dir.path(), &report).unwrap();

        let parsed: CompositeReport =
            serde_json::from_str(&fs::read_to_string(&latest).unwrap()).unwrap();
        assert_eq!(parsed.id, report.id);

        let archived = dir
            .path()
            .join("archive")
            .join(format!("report_{}.json", report.generated_at.format("%Y%m%d")));
        assert!(archived.exists());
        assert!(!dir.path().join("report.json.tmp").exists());
    }

    #[test]
    fn same_day_archive_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let first = synthesize(vec![], &SignalBands::default(), Duration::ZERO);
        let second = synthesize(vec![], &SignalBands::default(), Duration::ZERO);

        write_report(dir.path(), &first).unwrap();
        write_report(dir.path(), &second).unwrap();

        let latest: CompositeReport = serde_json::from_str(
            &fs::read_to_string(dir.path().join("report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(latest.id, second.id);
    }
}
