//! services/api/src/adapters/pdf.rs
//!
//! Encodes a laid-out `ReportDocument` into PDF bytes with `printpdf`, and picks
//! the right encoder for each download variant.

use exam_report_core::domain::ExamAnalysis;
use exam_report_core::report::{
    layout_report, render_text_report, report_file_name, DrawOp, FontWeight, LayoutConfig,
    ReportDocument, ReportError, ReportVariant, Rgb as ReportRgb, PT_TO_MM,
};
use printpdf::path::PaintMode;
use printpdf::{
    Actions, BuiltinFont, Color, LinkAnnotation, Mm, PdfDocument, PdfLayerReference, Rect, Rgb,
};
use std::io::BufWriter;

/// A finished download.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn color(rgb: ReportRgb) -> Color {
    let ReportRgb(r, g, b) = rgb;
    Color::Rgb(Rgb::new(
        f32::from(r) / 255.0,
        f32::from(g) / 255.0,
        f32::from(b) / 255.0,
        None,
    ))
}

/// Converts a top-left based rectangle into page coordinates.
fn page_rect(page_height: f32, x: f32, top: f32, width: f32, height: f32) -> Rect {
    Rect::new(
        Mm(x),
        Mm(page_height - top - height),
        Mm(x + width),
        Mm(page_height - top),
    )
}

/// Writes every drawing operation of the document onto a single page.
pub fn render_pdf(document: &ReportDocument) -> Result<Vec<u8>, ReportError> {
    let (doc, page1, layer1) = PdfDocument::new(
        &document.title,
        Mm(document.width_mm),
        Mm(document.height_mm),
        "Layer 1",
    );
    let layer: PdfLayerReference = doc.get_page(page1).get_layer(layer1);
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReportError::Render(format!("PDF font error: {e}")))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ReportError::Render(format!("PDF font error: {e}")))?;

    let h = document.height_mm;
    for op in &document.ops {
        match op {
            DrawOp::Rect {
                x,
                y,
                width,
                height,
                fill,
                stroke,
            } => {
                layer.set_fill_color(color(*fill));
                let mode = match stroke {
                    Some(stroke) => {
                        layer.set_outline_color(color(*stroke));
                        layer.set_outline_thickness(0.5);
                        PaintMode::FillStroke
                    }
                    None => PaintMode::Fill,
                };
                layer.add_rect(page_rect(h, *x, *y, *width, *height).with_mode(mode));
            }
            DrawOp::Text {
                x,
                y,
                size_pt,
                weight,
                color: text_color,
                text,
            } => {
                let font = match weight {
                    FontWeight::Regular => &regular,
                    FontWeight::Bold => &bold,
                };
                layer.set_fill_color(color(*text_color));
                layer.use_text(text.as_str(), *size_pt, Mm(*x), Mm(h - *y), font);
            }
            DrawOp::Link {
                x,
                y,
                width,
                size_pt,
                color: link_color,
                text,
                url,
            } => {
                layer.set_fill_color(color(*link_color));
                layer.use_text(text.as_str(), *size_pt, Mm(*x), Mm(h - *y), &regular);
                let text_height = size_pt * PT_TO_MM;
                layer.add_link_annotation(LinkAnnotation::new(
                    page_rect(h, *x, *y - text_height, *width, text_height + 1.0),
                    None,
                    None,
                    Actions::uri(url.clone()),
                    None,
                ));
            }
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| ReportError::Render(format!("PDF save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| ReportError::Render(format!("PDF buffer error: {e}")))
}

/// Produces the download for one variant of a stored analysis.
pub fn export_report(
    analysis: &ExamAnalysis,
    variant: ReportVariant,
    config: &LayoutConfig,
) -> Result<RenderedReport, ReportError> {
    let bytes = match variant {
        ReportVariant::PlainText => render_text_report(analysis).into_bytes(),
        _ => render_pdf(&layout_report(analysis, variant, config)?)?,
    };
    Ok(RenderedReport {
        file_name: report_file_name(variant, analysis),
        content_type: variant.content_type(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use exam_report_core::domain::{AnalysisStatus, Patient};
    use uuid::Uuid;

    fn analysis() -> ExamAnalysis {
        ExamAnalysis {
            id: Uuid::new_v4(),
            patient: Patient {
                name: "Maria Silva".to_string(),
                age: 45,
                symptoms: Some("dor torácica".to_string()),
            },
            image_url: "https://storage.test/u/1_torax.png".to_string(),
            analysis: "**Achado** principal X\n1. item".to_string(),
            recommendations: "- acompanhar Y".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
            status: AnalysisStatus::Completed,
        }
    }

    #[test]
    fn combined_export_is_a_pdf_with_the_expected_name() {
        let config = LayoutConfig::default();
        let report = export_report(&analysis(), ReportVariant::Combined, &config).unwrap();
        assert_eq!(report.file_name, "Laudo_Completo_Maria_Silva_2024-03-05.pdf");
        assert_eq!(report.content_type, "application/pdf");
        assert!(report.bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn single_section_variants_render() {
        for variant in [ReportVariant::AnalysisOnly, ReportVariant::RecommendationsOnly] {
            let report = export_report(&analysis(), variant, &LayoutConfig::default()).unwrap();
            assert!(report.bytes.starts_with(b"%PDF"));
        }
    }

    #[test]
    fn text_export_is_plain_utf8() {
        let config = LayoutConfig::default();
        let report = export_report(&analysis(), ReportVariant::PlainText, &config).unwrap();
        assert_eq!(report.file_name, "laudo_Maria_Silva_2024-03-05.txt");
        let text = String::from_utf8(report.bytes).unwrap();
        assert!(text.contains("Nome: Maria Silva"));
        assert!(text.contains("Data do Exame: 05/03/2024"));
    }
}
