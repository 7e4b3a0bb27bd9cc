//! Minimal PDF 1.4 writer for report documents.
//!
//! Uses the two standard Helvetica faces, so no fonts are embedded. Text
//! outside printable ASCII is replaced with `?`.

use crate::reports::{DocumentRenderer, Orientation, ReportDocument, Tone};
use std::fmt::Write as _;

const MARGIN: f64 = 40.0;
const TITLE_SIZE: f64 = 18.0;
const SUBTITLE_SIZE: f64 = 10.0;
const BODY_SIZE: f64 = 9.0;
const ROW_HEIGHT: f64 = 16.0;
const HEADER_HEIGHT: f64 = 20.0;
const METRIC_HEIGHT: f64 = 44.0;
const METRIC_GAP: f64 = 8.0;
const FOOTER_SIZE: f64 = 8.0;
// Helvetica averages about half an em per glyph.
const CHAR_WIDTH_EM: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn a4(orientation: Orientation) -> Self {
        match orientation {
            Orientation::Portrait => Self {
                width: 595.0,
                height: 842.0,
            },
            Orientation::Landscape => Self {
                width: 842.0,
                height: 595.0,
            },
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfRenderer;

impl DocumentRenderer for PdfRenderer {
    fn render(&self, doc: &ReportDocument) -> anyhow::Result<Vec<u8>> {
        let page = PageSize::a4(doc.orientation);
        let pages = layout_pages(doc, page);
        Ok(assemble(&pages, page))
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn fit_text(s: &str, width: f64, size: f64) -> String {
    let max = ((width / (size * CHAR_WIDTH_EM)).floor() as usize).max(1);
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

fn tone_fill(tone: Option<Tone>) -> (f64, f64, f64) {
    match tone {
        Some(Tone::Positive) => (0.88, 0.96, 0.89),
        Some(Tone::Warning) => (1.0, 0.95, 0.82),
        Some(Tone::Negative) => (0.99, 0.89, 0.89),
        Some(Tone::Neutral) | None => (0.93, 0.94, 0.97),
    }
}

struct Canvas {
    ops: String,
}

impl Canvas {
    fn new() -> Self {
        Self { ops: String::new() }
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, rgb: (f64, f64, f64)) {
        let _ = writeln!(
            self.ops,
            "{:.3} {:.3} {:.3} rg {:.2} {:.2} {:.2} {:.2} re f",
            rgb.0, rgb.1, rgb.2, x, y, w, h
        );
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let _ = writeln!(self.ops, "0.75 G 0.5 w {:.2} {:.2} {:.2} {:.2} re S", x, y, w, h);
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        let _ = writeln!(
            self.ops,
            "0.85 G 0.5 w {:.2} {:.2} m {:.2} {:.2} l S",
            x1, y1, x2, y2
        );
    }

    fn text(&mut self, font: &str, size: f64, x: f64, y: f64, s: &str) {
        let _ = writeln!(
            self.ops,
            "0 g BT /{} {:.1} Tf {:.2} {:.2} Td ({}) Tj ET",
            font,
            size,
            x,
            y,
            escape_text(s)
        );
    }
}

fn column_widths(doc: &ReportDocument, usable: f64) -> Vec<f64> {
    let n = doc.headers.len().max(1);
    let mut weights = vec![0usize; n];
    for (i, h) in doc.headers.iter().enumerate() {
        weights[i] = h.chars().count();
    }
    for row in &doc.rows {
        for (i, cell) in row.iter().enumerate().take(n) {
            weights[i] = weights[i].max(cell.chars().count());
        }
    }
    let weights: Vec<f64> = weights.into_iter().map(|w| w.clamp(4, 40) as f64).collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| usable * w / total).collect()
}

fn draw_table_header(c: &mut Canvas, doc: &ReportDocument, widths: &[f64], top: f64) {
    let usable: f64 = widths.iter().sum();
    c.fill_rect(MARGIN, top - HEADER_HEIGHT, usable, HEADER_HEIGHT, (0.85, 0.87, 0.9));
    let mut x = MARGIN;
    for (h, w) in doc.headers.iter().zip(widths) {
        c.text("F2", BODY_SIZE, x + 3.0, top - 14.0, &fit_text(h, w - 6.0, BODY_SIZE));
        x += w;
    }
}

fn draw_row(c: &mut Canvas, row: &[String], widths: &[f64], top: f64) {
    let mut x = MARGIN;
    for (cell, w) in row.iter().zip(widths) {
        c.text("F1", BODY_SIZE, x + 3.0, top - 11.5, &fit_text(cell, w - 6.0, BODY_SIZE));
        x += w;
    }
    let usable: f64 = widths.iter().sum();
    c.line(MARGIN, top - ROW_HEIGHT, MARGIN + usable, top - ROW_HEIGHT);
}

fn draw_summary(c: &mut Canvas, doc: &ReportDocument, usable: f64, top: f64) -> f64 {
    if doc.summary.is_empty() {
        return top;
    }
    let n = doc.summary.len() as f64;
    let w = (usable - METRIC_GAP * (n - 1.0)) / n;
    for (i, m) in doc.summary.iter().enumerate() {
        let x = MARGIN + i as f64 * (w + METRIC_GAP);
        let y = top - METRIC_HEIGHT;
        c.fill_rect(x, y, w, METRIC_HEIGHT, tone_fill(m.tone));
        c.stroke_rect(x, y, w, METRIC_HEIGHT);
        c.text("F1", 8.0, x + 6.0, top - 14.0, &fit_text(&m.label, w - 12.0, 8.0));
        c.text("F2", 14.0, x + 6.0, top - 34.0, &fit_text(&m.value, w - 12.0, 14.0));
    }
    top - METRIC_HEIGHT - 16.0
}

/// Returns one content stream per page.
fn layout_pages(doc: &ReportDocument, page: PageSize) -> Vec<String> {
    let usable = page.width - 2.0 * MARGIN;
    let widths = column_widths(doc, usable);
    let floor = MARGIN + FOOTER_SIZE + 8.0;

    let mut pages: Vec<Canvas> = Vec::new();
    let mut rows = doc.rows.iter().peekable();
    loop {
        let mut c = Canvas::new();
        let mut top = page.height - MARGIN;
        if pages.is_empty() {
            c.text("F2", TITLE_SIZE, MARGIN, top - TITLE_SIZE, &doc.title);
            top -= TITLE_SIZE + 8.0;
            c.text("F1", SUBTITLE_SIZE, MARGIN, top - SUBTITLE_SIZE, &doc.subtitle);
            top -= SUBTITLE_SIZE + 18.0;
            top = draw_summary(&mut c, doc, usable, top);
        } else {
            c.text("F2", SUBTITLE_SIZE, MARGIN, top - SUBTITLE_SIZE, &doc.title);
            top -= SUBTITLE_SIZE + 14.0;
        }

        draw_table_header(&mut c, doc, &widths, top);
        top -= HEADER_HEIGHT;

        if doc.rows.is_empty() {
            c.text("F1", BODY_SIZE, MARGIN + 3.0, top - 11.5, "No records");
        }
        while rows.peek().is_some() && top - ROW_HEIGHT >= floor {
            if let Some(row) = rows.next() {
                draw_row(&mut c, row, &widths, top);
            }
            top -= ROW_HEIGHT;
        }

        pages.push(c);
        if rows.peek().is_none() {
            break;
        }
    }

    let count = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            let label = format!("Page {} of {}", i + 1, count);
            let x = page.width - MARGIN - label.len() as f64 * FOOTER_SIZE * CHAR_WIDTH_EM;
            c.text("F1", FOOTER_SIZE, x, MARGIN, &label);
            c.ops
        })
        .collect()
}

fn assemble(contents: &[String], page: PageSize) -> Vec<u8> {
    // 1 catalog, 2 page tree, 3-4 fonts, then (page, content) pairs.
    let mut objects: Vec<String> = Vec::new();
    let kids: Vec<String> = (0..contents.len())
        .map(|i| format!("{} 0 R", 5 + 2 * i))
        .collect();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        contents.len()
    ));
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );
    for (i, ops) in contents.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.0} {:.0}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
            page.width,
            page.height,
            6 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            ops.len(),
            ops
        ));
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for off in offsets {
        let _ = writeln!(xref, "{:010} 00000 n ", off);
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    );
    out.extend_from_slice(xref.as_bytes());
    out
}
