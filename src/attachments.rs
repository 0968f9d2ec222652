//! Files written next to the database: rendered job specs and downloaded
//! candidate resumes, all under `{data_dir}`.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

/// Keep a path segment to `[A-Za-z0-9._-]`, never empty or dot-only.
fn safe_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Write via a uuid-named temp file in the same directory, then rename over
/// the destination so readers never see a half-written file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", path.display()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("failed to move file into {}", path.display()));
    }
    Ok(())
}

pub fn job_spec_path(data_dir: &str, org_id: i64, external_job_id: &str) -> PathBuf {
    Path::new(data_dir)
        .join("job_specs")
        .join(format!("org_{}", org_id))
        .join(format!("{}.md", safe_segment(external_job_id)))
}

/// `{data_dir}/job_specs/org_{org_id}/{external_job_id}.md`
pub async fn write_job_spec(
    data_dir: &str,
    org_id: i64,
    external_job_id: &str,
    markdown: &str,
) -> Result<PathBuf> {
    let path = job_spec_path(data_dir, org_id, external_job_id);
    write_atomic(&path, markdown.as_bytes()).await?;
    Ok(path)
}

/// `{data_dir}/resumes/org_{org_id}/{candidate_id}/{file_name}`
pub async fn store_resume(
    data_dir: &str,
    org_id: i64,
    candidate_id: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let path = Path::new(data_dir)
        .join("resumes")
        .join(format!("org_{}", org_id))
        .join(safe_segment(candidate_id))
        .join(safe_segment(file_name));
    write_atomic(&path, bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_sanitized() {
        assert_eq!(safe_segment("GROOV005"), "GROOV005");
        assert_eq!(safe_segment("../etc/passwd"), ".._etc_passwd");
        assert_eq!(safe_segment(".."), "_");
        assert_eq!(safe_segment("cv (final).pdf"), "cv__final_.pdf");
    }

    #[tokio::test]
    async fn job_spec_is_written_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let path = write_job_spec(data_dir, 3, "AB12", "# One\n").await.unwrap();
        assert!(path.ends_with("job_specs/org_3/AB12.md"));
        write_job_spec(data_dir, 3, "AB12", "# Two\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Two\n");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn resume_lands_under_candidate_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let path = store_resume(data_dir, 1, "c/9", "cv.pdf", b"%PDF").await.unwrap();
        assert!(path.ends_with("resumes/org_1/c_9/cv.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");
    }
}
