use anyhow::{anyhow, bail, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::{db_path, DB_FILE_NAME};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/schoolportal.sqlite3";
pub const BUNDLE_FORMAT: &str = "schoolportal-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
    pub db_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format: String,
    pub app_version: String,
    pub db_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let src = db_path(workspace);
    if !src.is_file() {
        bail!("workspace database not found: {}", src.to_string_lossy());
    }
    let db_bytes = std::fs::read(&src)
        .with_context(|| format!("failed to read database {}", src.to_string_lossy()))?;
    let digest = sha256_hex(&db_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "dbEntry": DB_ENTRY,
        "dbSha256": digest,
        "dbBytes": db_bytes.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())
        .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    info!(out = %out_path.display(), bytes = db_bytes.len(), "workspace bundle exported");
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        db_sha256: digest,
        db_bytes: db_bytes.len() as u64,
    })
}

/// The caller must drop any open connection to the workspace database first.
/// The existing database is only replaced once the bundle checks out.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
    if format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", format);
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest missing dbSha256"))?
        .to_string();
    let app_version = manifest
        .get("appVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .with_context(|| format!("bundle missing {}", DB_ENTRY))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        bail!("database checksum mismatch: expected {}, got {}", expected, actual);
    }

    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let tmp = workspace.join(format!("{}.importing", DB_FILE_NAME));
    {
        let mut out = File::create(&tmp)
            .with_context(|| format!("failed to create temp database {}", tmp.to_string_lossy()))?;
        out.write_all(&db_bytes)
            .context("failed to write extracted database")?;
        out.flush().context("failed to flush extracted database")?;
    }
    let dst = db_path(workspace);
    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("failed to remove existing database {}", dst.to_string_lossy()))?;
    }
    std::fs::rename(&tmp, &dst)
        .with_context(|| format!("failed to move extracted database to {}", dst.to_string_lossy()))?;

    info!(src = %in_path.display(), app_version = %app_version, "workspace bundle imported");
    Ok(ImportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        app_version,
        db_sha256: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn tampered_bundle_is_refused_and_workspace_kept() {
        let src = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(src.path()).expect("open");
        db::settings_set_json(&conn, "probe", &json!(1)).expect("set");
        drop(conn);

        let bundle = src.path().join("out").join("ws.zip");
        let summary = export_workspace_bundle(src.path(), &bundle).expect("export");
        assert_eq!(summary.bundle_format, BUNDLE_FORMAT);

        // Rewrite the db entry with different bytes but the old manifest.
        let mut manifest = String::new();
        {
            let mut archive = ZipArchive::new(File::open(&bundle).expect("open")).expect("zip");
            archive
                .by_name(MANIFEST_ENTRY)
                .expect("manifest")
                .read_to_string(&mut manifest)
                .expect("read");
        }
        let bad = src.path().join("bad.zip");
        {
            let mut zip = ZipWriter::new(File::create(&bad).expect("create"));
            let opts = FileOptions::default();
            zip.start_file(MANIFEST_ENTRY, opts).expect("start");
            zip.write_all(manifest.as_bytes()).expect("write");
            zip.start_file(DB_ENTRY, opts).expect("start");
            zip.write_all(b"not a database").expect("write");
            zip.finish().expect("finish");
        }

        let dst = tempfile::tempdir().expect("tempdir");
        let err = import_workspace_bundle(&bad, dst.path()).expect_err("checksum");
        assert!(err.to_string().contains("checksum"));
        assert!(!db_path(dst.path()).exists());

        let ok = import_workspace_bundle(&bundle, dst.path()).expect("import");
        assert_eq!(ok.db_sha256, summary.db_sha256);
        let conn = db::open_db(dst.path()).expect("reopen");
        assert_eq!(db::settings_get_json(&conn, "probe").expect("get"), Some(json!(1)));
    }
}
