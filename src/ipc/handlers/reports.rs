use super::{get_opt_str, get_range, get_required_str, setup, to_json, with_conn};
use crate::error::PortalError;
use crate::ipc::error::{err, ok, portal_err};
use crate::ipc::types::{AppState, Request};
use crate::pdf::PdfRenderer;
use crate::reports::{self, ReportDocument, ReportKind, ReportRequest};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::warn;

fn parse_request(params: &Value) -> Result<ReportRequest, PortalError> {
    let kind_raw = get_required_str(params, "kind")?;
    let kind = ReportKind::parse(&kind_raw).ok_or_else(|| PortalError::Rejected {
        code: "bad_params",
        message: "unknown report kind".to_string(),
        details: Some(json!({
            "kind": kind_raw,
            "expected": ["attendance", "directory", "leave", "portalActivity", "studentProgress", "examResult"],
        })),
    })?;
    Ok(ReportRequest {
        kind,
        school_id: get_required_str(params, "schoolId")?,
        range: get_range(params)?,
        class_name: get_opt_str(params, "className"),
        exam_id: get_opt_str(params, "examId"),
    })
}

fn build_document(conn: &Connection, params: &Value) -> Result<ReportDocument, PortalError> {
    let request = parse_request(params)?;
    let mut doc = reports::gather(&SqliteStore::new(conn), &request)?;
    if setup::report_settings(conn)?.show_generated_at {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M");
        doc.subtitle = format!("{} | Generated {}", doc.subtitle, stamp);
    }
    Ok(doc)
}

fn reports_build(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let doc = build_document(conn, params)?;
    Ok(json!({ "document": to_json(&doc)? }))
}

fn handle_reports_export(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let doc = match build_document(conn, &req.params) {
        Ok(d) => d,
        Err(e @ PortalError::Rejected { code: "bad_params", .. }) => return portal_err(&req.id, &e),
        Err(e) => {
            warn!(error = %e, "report data could not be gathered");
            return err(
                &req.id,
                "report_failed",
                "Failed to generate report",
                Some(json!({ "stage": "gather", "cause": e.code(), "message": e.to_string() })),
            );
        }
    };

    let configured = match setup::report_settings(conn) {
        Ok(s) => s.output_dir,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let out_dir = req
        .params
        .get("outDir")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .or(configured)
        .or_else(|| state.workspace.as_ref().map(|w| w.join("reports")));
    let Some(out_dir) = out_dir else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match reports::export_report(&doc, &PdfRenderer, &out_dir, &chrono::Local::now()) {
        Ok(path) => ok(
            &req.id,
            json!({
                "path": path.to_string_lossy(),
                "fileName": path.file_name().map(|n| n.to_string_lossy().to_string()),
                "kind": doc.kind,
                "rows": doc.rows.len(),
                "orientation": doc.orientation,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "report export failed");
            err(
                &req.id,
                "report_failed",
                "Failed to generate report",
                Some(json!({ "stage": "export", "message": e.to_string() })),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.build" => Some(with_conn(state, req, reports_build)),
        "reports.export" => Some(handle_reports_export(state, req)),
        _ => None,
    }
}
