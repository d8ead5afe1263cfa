//! crates/exam_report_core/src/report.rs
//!
//! Page layout for the exported exam reports.
//!
//! Layout works on an A4 page in millimetres with y growing downwards from the top
//! edge, and produces a list of drawing operations. Turning those into PDF bytes is
//! left to an adapter, so the arithmetic here can be tested without a PDF library.
//! Every variant fits on a single page: lines that do not fit their vertical budget
//! are dropped.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::domain::ExamAnalysis;
use crate::text::format_for_document;

/// Millimetres per typographic point.
pub const PT_TO_MM: f32 = 0.352_778;

const PLATFORM_NAME: &str = "ALIA";
const PLATFORM_TAGLINE: &str = "Plataforma de Análise Médica com IA";
const ATTRIBUTION_TEXT: &str = "Desenvolvido por Axiomind.space";
const ATTRIBUTION_URL: &str = "https://axiomind.space";

const COMBINED_DISCLAIMER: &str = "Esta análise foi gerada por IA e serve apenas como auxílio diagnóstico. NÃO substitui a avaliação médica especializada.";
const RECOMMENDATIONS_DISCLAIMER: &str = "Estas recomendações foram geradas por IA e servem apenas como auxílio médico. Sempre consulte um profissional médico qualificado.";

struct DisclaimerBox {
    height: f32,
    label: &'static str,
    label_pt: f32,
    label_offset: f32,
    body: &'static str,
    body_pt: f32,
    body_offset: f32,
}

const COMBINED_DISCLAIMER_BOX: DisclaimerBox = DisclaimerBox {
    height: 15.0,
    label: "AVISO:",
    label_pt: 7.0,
    label_offset: 5.0,
    body: COMBINED_DISCLAIMER,
    body_pt: 6.0,
    body_offset: 8.0,
};

const RECOMMENDATIONS_DISCLAIMER_BOX: DisclaimerBox = DisclaimerBox {
    height: 20.0,
    label: "AVISO IMPORTANTE",
    label_pt: 8.0,
    label_offset: 6.0,
    body: RECOMMENDATIONS_DISCLAIMER,
    body_pt: 7.0,
    body_offset: 10.0,
};

/// Two section headings (6 mm each) and the 5 mm gap between the sections.
const COMBINED_SECTION_CHROME: f32 = 17.0;

const HEADER_BLUE: Rgb = Rgb(59, 130, 246);
const WHITE: Rgb = Rgb(255, 255, 255);
const BLACK: Rgb = Rgb(0, 0, 0);
const FOOTER_GREY: Rgb = Rgb(107, 114, 128);
const BOX_BORDER: Rgb = Rgb(200, 200, 200);
const BOX_FILL: Rgb = Rgb(248, 250, 252);
const WARN_BORDER: Rgb = Rgb(239, 68, 68);
const WARN_FILL: Rgb = Rgb(254, 242, 242);
const WARN_TEXT: Rgb = Rgb(185, 28, 28);

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Invalid layout configuration: {0}")]
    InvalidLayout(String),
    #[error("The {0:?} variant is not a paginated document")]
    NotPaginated(ReportVariant),
    #[error("Failed to render document: {0}")]
    Render(String),
}

//=========================================================================================
// Configuration
//=========================================================================================

/// Layout constants. The body split and the patient-box line limit are product
/// defaults, not invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    pub page_width_mm: f32,
    pub page_height_mm: f32,
    pub margin_mm: f32,
    /// Share of the combined body given to the analysis block.
    pub analysis_share: f32,
    pub patient_info_max_lines: usize,
    /// Average glyph advance as a fraction of the font size.
    pub glyph_width_em: f32,
    pub line_height_factor: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page_width_mm: 210.0,
            page_height_mm: 297.0,
            margin_mm: 10.0,
            analysis_share: 0.55,
            patient_info_max_lines: 2,
            glyph_width_em: 0.5,
            line_height_factor: 1.2,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<(), ReportError> {
        if !(self.analysis_share > 0.0 && self.analysis_share < 1.0) {
            return Err(ReportError::InvalidLayout(format!(
                "analysis_share must be between 0 and 1, got {}",
                self.analysis_share
            )));
        }
        if self.glyph_width_em <= 0.0 || self.line_height_factor <= 0.0 {
            return Err(ReportError::InvalidLayout(
                "glyph width and line height must be positive".to_string(),
            ));
        }
        if self.content_width() <= 0.0 || self.page_height_mm <= 100.0 {
            return Err(ReportError::InvalidLayout(format!(
                "page {}x{} mm leaves no room for content",
                self.page_width_mm, self.page_height_mm
            )));
        }
        Ok(())
    }

    pub fn content_width(&self) -> f32 {
        self.page_width_mm - 2.0 * self.margin_mm
    }

    pub fn line_height(&self, size_pt: f32) -> f32 {
        size_pt * PT_TO_MM * self.line_height_factor
    }

    /// Approximate rendered width of `text` at `size_pt`.
    pub fn text_width(&self, text: &str, size_pt: f32) -> f32 {
        text.chars().count() as f32 * self.glyph_width(size_pt)
    }

    fn glyph_width(&self, size_pt: f32) -> f32 {
        size_pt * PT_TO_MM * self.glyph_width_em
    }
}

//=========================================================================================
// Document Model
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Rgb,
        stroke: Option<Rgb>,
    },
    /// `y` is the text baseline.
    Text {
        x: f32,
        y: f32,
        size_pt: f32,
        weight: FontWeight,
        color: Rgb,
        text: String,
    },
    Link {
        x: f32,
        y: f32,
        width: f32,
        size_pt: f32,
        color: Rgb,
        text: String,
        url: String,
    },
}

/// Where a body block was placed and how much of it fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPlacement {
    pub top: f32,
    pub limit: f32,
    pub lines_total: usize,
    pub lines_placed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub title: String,
    pub width_mm: f32,
    pub height_mm: f32,
    pub ops: Vec<DrawOp>,
    pub analysis_block: Option<BlockPlacement>,
    pub recommendations_block: Option<BlockPlacement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportVariant {
    Combined,
    AnalysisOnly,
    RecommendationsOnly,
    /// The plain-text download, not paginated.
    PlainText,
}

impl ReportVariant {
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "combined" => Some(Self::Combined),
            "analysis" => Some(Self::AnalysisOnly),
            "recommendations" => Some(Self::RecommendationsOnly),
            "text" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::AnalysisOnly => "analysis",
            Self::RecommendationsOnly => "recommendations",
            Self::PlainText => "text",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Combined => "LAUDO MÉDICO COMPLETO",
            Self::AnalysisOnly => "ANÁLISE TÉCNICA DO EXAME",
            Self::RecommendationsOnly => "RECOMENDAÇÕES MÉDICAS",
            Self::PlainText => "LAUDO MÉDICO - ANÁLISE POR IA",
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            Self::Combined => "Laudo_Completo",
            Self::AnalysisOnly => "Analise",
            Self::RecommendationsOnly => "Recomendacoes",
            Self::PlainText => "laudo",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::PlainText => "txt",
            _ => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::PlainText => "text/plain; charset=utf-8",
            _ => "application/pdf",
        }
    }
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// `<Prefix>_<name with whitespace runs as '_'>_<YYYY-MM-DD>.<ext>`
pub fn report_file_name(variant: ReportVariant, analysis: &ExamAnalysis) -> String {
    format!(
        "{}_{}_{}.{}",
        variant.file_prefix(),
        whitespace_run().replace_all(&analysis.patient.name, "_"),
        analysis.created_at.format("%Y-%m-%d"),
        variant.extension()
    )
}

fn display_date(at: &DateTime<Utc>) -> String {
    at.format("%d/%m/%Y").to_string()
}

//=========================================================================================
// Text Wrapping
//=========================================================================================

/// Word-wraps `text` to `width_mm`. Explicit newlines start new lines and words
/// longer than a full line are split.
pub fn wrap_text(text: &str, width_mm: f32, size_pt: f32, config: &LayoutConfig) -> Vec<String> {
    let max_chars = ((width_mm / config.glyph_width(size_pt)).floor() as usize).max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            let needed = if current_len == 0 { word_len } else { current_len + 1 + word_len };

            if needed <= max_chars {
                if current_len > 0 {
                    current.push(' ');
                }
                current.push_str(word);
                current_len = needed;
                continue;
            }

            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }

            if word_len <= max_chars {
                current.push_str(word);
                current_len = word_len;
            } else {
                let chars: Vec<char> = word.chars().collect();
                let mut chunks = chars.chunks(max_chars).peekable();
                while let Some(chunk) = chunks.next() {
                    let piece: String = chunk.iter().collect();
                    if chunks.peek().is_some() {
                        lines.push(piece);
                    } else {
                        current_len = chunk.len();
                        current = piece;
                    }
                }
            }
        }

        lines.push(current);
    }

    lines
}

//=========================================================================================
// Layout
//=========================================================================================

struct Canvas<'a> {
    config: &'a LayoutConfig,
    ops: Vec<DrawOp>,
}

impl<'a> Canvas<'a> {
    fn new(config: &'a LayoutConfig) -> Self {
        Self {
            config,
            ops: Vec::new(),
        }
    }

    fn rect(&mut self, x: f32, y: f32, width: f32, height: f32, fill: Rgb, stroke: Option<Rgb>) {
        self.ops.push(DrawOp::Rect {
            x,
            y,
            width,
            height,
            fill,
            stroke,
        });
    }

    fn text(
        &mut self,
        text: impl Into<String>,
        x: f32,
        y: f32,
        size_pt: f32,
        weight: FontWeight,
        color: Rgb,
    ) {
        self.ops.push(DrawOp::Text {
            x,
            y,
            size_pt,
            weight,
            color,
            text: text.into(),
        });
    }

    /// Places wrapped lines from `top` while the baseline is above `limit`.
    /// Returns the y after the last placed line and the placement record.
    fn block(
        &mut self,
        text: &str,
        x: f32,
        top: f32,
        width: f32,
        size_pt: f32,
        limit: f32,
    ) -> (f32, BlockPlacement) {
        let lines = wrap_text(text, width, size_pt, self.config);
        let line_height = self.config.line_height(size_pt);
        let mut y = top;
        let mut placed = 0;

        for line in &lines {
            if y >= limit {
                break;
            }
            if !line.is_empty() {
                self.text(line.as_str(), x, y, size_pt, FontWeight::Regular, BLACK);
            }
            y += line_height;
            placed += 1;
        }

        let placement = BlockPlacement {
            top,
            limit,
            lines_total: lines.len(),
            lines_placed: placed,
        };
        (y, placement)
    }

    fn header(&mut self, title: &str) -> f32 {
        let margin = self.config.margin_mm;
        self.rect(0.0, 0.0, self.config.page_width_mm, 25.0, HEADER_BLUE, None);
        self.text(PLATFORM_NAME, margin, 15.0, 16.0, FontWeight::Bold, WHITE);
        self.text(PLATFORM_TAGLINE, margin, 21.0, 8.0, FontWeight::Regular, WHITE);
        self.text(title, margin, 38.0, 12.0, FontWeight::Bold, BLACK);
        48.0
    }

    fn patient_box(&mut self, analysis: &ExamAnalysis, mut y: f32) -> f32 {
        let margin = self.config.margin_mm;
        let width = self.config.content_width();
        self.rect(margin, y, width, 18.0, BOX_FILL, Some(BOX_BORDER));

        y += 6.0;
        self.text("PACIENTE:", margin + 3.0, y, 8.0, FontWeight::Bold, BLACK);
        y += 4.0;

        let patient = &analysis.patient;
        let info = format!(
            "{} | {} anos | Sintomas: {}",
            patient.name,
            patient.age,
            patient.symptoms_or_default()
        );
        let lines = wrap_text(&info, width - 6.0, 7.0, self.config);
        for line in lines.into_iter().take(self.config.patient_info_max_lines) {
            self.text(line, margin + 3.0, y, 7.0, FontWeight::Regular, BLACK);
            y += 4.0;
        }
        y
    }

    fn disclaimer(&mut self, top: f32, notice: &DisclaimerBox) {
        let margin = self.config.margin_mm;
        let width = self.config.content_width();
        self.rect(margin, top, width, notice.height, WARN_FILL, Some(WARN_BORDER));
        self.text(
            notice.label,
            margin + 3.0,
            top + notice.label_offset,
            notice.label_pt,
            FontWeight::Bold,
            WARN_TEXT,
        );

        let lines = wrap_text(notice.body, width - 6.0, notice.body_pt, self.config);
        for (i, line) in lines.into_iter().take(2).enumerate() {
            let y = top + notice.body_offset + i as f32 * 3.0;
            self.text(line, margin + 3.0, y, notice.body_pt, FontWeight::Regular, WARN_TEXT);
        }
    }

    fn footer(&mut self, analysis: &ExamAnalysis) {
        let margin = self.config.margin_mm;
        let footer_y = self.config.page_height_mm - 15.0;
        let patient = &analysis.patient;

        self.text(
            format!(
                "{} | {} anos | {}",
                patient.name,
                patient.age,
                display_date(&analysis.created_at)
            ),
            margin,
            footer_y,
            7.0,
            FontWeight::Regular,
            FOOTER_GREY,
        );

        let link_width = self.config.text_width(ATTRIBUTION_TEXT, 7.0);
        self.ops.push(DrawOp::Link {
            x: (self.config.page_width_mm - link_width) / 2.0,
            y: footer_y + 5.0,
            width: link_width,
            size_pt: 7.0,
            color: HEADER_BLUE,
            text: ATTRIBUTION_TEXT.to_string(),
            url: ATTRIBUTION_URL.to_string(),
        });
    }
}

/// Lays out one paginated report variant.
pub fn layout_report(
    analysis: &ExamAnalysis,
    variant: ReportVariant,
    config: &LayoutConfig,
) -> Result<ReportDocument, ReportError> {
    config.validate()?;

    let mut canvas = Canvas::new(config);
    let page_height = config.page_height_mm;
    let margin = config.margin_mm;
    let content_width = config.content_width();

    let mut y = canvas.header(variant.title());
    y = canvas.patient_box(analysis, y);

    let mut analysis_block = None;
    let mut recommendations_block = None;

    match variant {
        ReportVariant::Combined => {
            y += 5.0;
            let footer_space = 25.0;
            let disclaimer_space = 20.0;
            let available =
                page_height - y - footer_space - disclaimer_space - COMBINED_SECTION_CHROME;
            if available <= 0.0 {
                return Err(ReportError::InvalidLayout(
                    "no vertical space left for the report body".to_string(),
                ));
            }
            let analysis_height = available * config.analysis_share;
            let recommendations_height = available - analysis_height;

            canvas.text("ANÁLISE TÉCNICA", margin, y, 9.0, FontWeight::Bold, BLACK);
            y += 6.0;
            let body = format_for_document(&analysis.analysis);
            let (end, placement) =
                canvas.block(&body, margin + 2.0, y, content_width - 2.0, 7.0, y + analysis_height);
            analysis_block = Some(placement);
            y = (end + 5.0).min(y + analysis_height + 5.0);

            canvas.text("RECOMENDAÇÕES", margin, y, 9.0, FontWeight::Bold, BLACK);
            y += 6.0;
            let body = format_for_document(&analysis.recommendations);
            let (_, placement) = canvas.block(
                &body,
                margin + 2.0,
                y,
                content_width - 2.0,
                7.0,
                y + recommendations_height,
            );
            recommendations_block = Some(placement);

            let disclaimer_top = page_height - footer_space - disclaimer_space;
            canvas.disclaimer(disclaimer_top, &COMBINED_DISCLAIMER_BOX);
        }
        ReportVariant::AnalysisOnly => {
            y += 8.0;
            canvas.text("ANÁLISE TÉCNICA DETALHADA", margin, y, 10.0, FontWeight::Bold, BLACK);
            y += 8.0;
            let footer_space = 20.0;
            let body = format_for_document(&analysis.analysis);
            let (_, placement) =
                canvas.block(&body, margin, y, content_width, 8.0, page_height - footer_space);
            analysis_block = Some(placement);
        }
        ReportVariant::RecommendationsOnly => {
            y += 8.0;
            canvas.text("RECOMENDAÇÕES DETALHADAS", margin, y, 10.0, FontWeight::Bold, BLACK);
            y += 8.0;
            let footer_space = 20.0;
            let disclaimer_space = 25.0;
            let body = format_for_document(&analysis.recommendations);
            let (_, placement) = canvas.block(
                &body,
                margin,
                y,
                content_width,
                8.0,
                page_height - disclaimer_space - footer_space,
            );
            recommendations_block = Some(placement);

            let disclaimer_top = page_height - footer_space - disclaimer_space;
            canvas.disclaimer(disclaimer_top, &RECOMMENDATIONS_DISCLAIMER_BOX);
        }
        ReportVariant::PlainText => return Err(ReportError::NotPaginated(variant)),
    }

    canvas.footer(analysis);

    Ok(ReportDocument {
        title: variant.title().to_string(),
        width_mm: config.page_width_mm,
        height_mm: page_height,
        ops: canvas.ops,
        analysis_block,
        recommendations_block,
    })
}

/// The plain-text report download.
pub fn render_text_report(analysis: &ExamAnalysis) -> String {
    let patient = &analysis.patient;
    format!(
        "{title}\n\
         ================================\n\
         \n\
         DADOS DO PACIENTE:\n\
         Nome: {name}\n\
         Idade: {age} anos\n\
         Sintomas: {symptoms}\n\
         Data do Exame: {date}\n\
         \n\
         ANÁLISE TÉCNICA:\n\
         {analysis}\n\
         \n\
         RECOMENDAÇÕES:\n\
         {recommendations}\n\
         \n\
         ________________________________\n\
         IMPORTANTE: Esta análise foi gerada por inteligência artificial e serve apenas como auxílio diagnóstico.\n\
         NÃO substitui a avaliação de um médico especialista. Sempre consulte um profissional médico qualificado\n\
         para diagnóstico e tratamento definitivos.\n\
         \n\
         Gerado pela Plataforma {platform}\n",
        title = ReportVariant::PlainText.title(),
        name = patient.name,
        age = patient.age,
        symptoms = patient.symptoms_or_default(),
        date = display_date(&analysis.created_at),
        analysis = analysis.analysis,
        recommendations = analysis.recommendations,
        platform = PLATFORM_NAME,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisStatus, Patient};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn sample(analysis: &str, recommendations: &str) -> ExamAnalysis {
        ExamAnalysis {
            id: Uuid::new_v4(),
            patient: Patient {
                name: "Maria Silva".to_string(),
                age: 45,
                symptoms: Some("dor torácica".to_string()),
            },
            image_url: "https://storage.example/exam.png".to_string(),
            analysis: analysis.to_string(),
            recommendations: recommendations.to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
            status: AnalysisStatus::Completed,
        }
    }

    fn texts(doc: &ReportDocument) -> Vec<&str> {
        doc.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn long_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!("Parágrafo {i}: estrutura anatômica preservada sem alterações significativas.")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn file_names_follow_variant_patient_and_date() {
        let analysis = sample("a", "b");
        assert_eq!(
            report_file_name(ReportVariant::Combined, &analysis),
            "Laudo_Completo_Maria_Silva_2025-03-14.pdf"
        );
        assert_eq!(
            report_file_name(ReportVariant::AnalysisOnly, &analysis),
            "Analise_Maria_Silva_2025-03-14.pdf"
        );
        assert_eq!(
            report_file_name(ReportVariant::RecommendationsOnly, &analysis),
            "Recomendacoes_Maria_Silva_2025-03-14.pdf"
        );
        assert_eq!(
            report_file_name(ReportVariant::PlainText, &analysis),
            "laudo_Maria_Silva_2025-03-14.txt"
        );
    }

    #[test]
    fn whitespace_runs_collapse_to_one_underscore() {
        let mut analysis = sample("a", "b");
        analysis.patient.name = "Ana  Maria\tCosta".to_string();
        assert_eq!(
            report_file_name(ReportVariant::Combined, &analysis),
            "Laudo_Completo_Ana_Maria_Costa_2025-03-14.pdf"
        );
    }

    #[test]
    fn wrap_respects_width_and_newlines() {
        let config = LayoutConfig::default();
        // 7pt at 0.5em gives roughly 1.23 mm per glyph, so 20 mm holds 16 glyphs.
        let lines = wrap_text("um dois tres quatro cinco\nseis", 20.0, 7.0, &config);
        assert_eq!(lines, vec!["um dois tres", "quatro cinco", "seis"]);

        let lines = wrap_text("abcdefghijklmnopqrstuvwxyz", 20.0, 7.0, &config);
        assert_eq!(lines, vec!["abcdefghijklmnop", "qrstuvwxyz"]);
    }

    #[test]
    fn combined_splits_body_55_45() {
        let config = LayoutConfig::default();
        let doc =
            layout_report(&sample("curto", "curto"), ReportVariant::Combined, &config).unwrap();

        let a = doc.analysis_block.as_ref().unwrap();
        let r = doc.recommendations_block.as_ref().unwrap();
        let a_height = a.limit - a.top;
        let r_height = r.limit - r.top;
        let ratio = a_height / (a_height + r_height);
        assert!((ratio - 0.55).abs() < 1e-3, "ratio was {ratio}");
        assert!(texts(&doc).contains(&"AVISO:"));
    }

    #[test]
    fn overflowing_text_is_dropped_within_budget() {
        let config = LayoutConfig::default();
        let doc = layout_report(
            &sample(&long_text(200), &long_text(200)),
            ReportVariant::Combined,
            &config,
        )
        .unwrap();

        let a = doc.analysis_block.as_ref().unwrap();
        assert!(a.lines_placed < a.lines_total);
        let r = doc.recommendations_block.as_ref().unwrap();
        assert!(r.lines_placed < r.lines_total);

        let disclaimer_top = config.page_height_mm - 45.0;
        for op in &doc.ops {
            if let DrawOp::Text { text, y, .. } = op {
                if text.starts_with("Parágrafo") {
                    assert!(*y < disclaimer_top, "body line at {y} overlaps the disclaimer");
                }
            }
        }
    }

    #[test]
    fn patient_info_is_truncated_to_configured_lines() {
        let mut analysis = sample("a", "b");
        analysis.patient.symptoms = Some("tosse ".repeat(200));

        let config = LayoutConfig::default();
        let doc = layout_report(&analysis, ReportVariant::AnalysisOnly, &config).unwrap();
        let info_lines = texts(&doc)
            .into_iter()
            .filter(|t| t.contains("tosse"))
            .count();
        assert_eq!(info_lines, 2);

        let config = LayoutConfig {
            patient_info_max_lines: 3,
            ..LayoutConfig::default()
        };
        let doc = layout_report(&analysis, ReportVariant::AnalysisOnly, &config).unwrap();
        let info_lines = texts(&doc)
            .into_iter()
            .filter(|t| t.contains("tosse"))
            .count();
        assert_eq!(info_lines, 3);
    }

    #[test]
    fn single_section_variants_use_the_whole_body() {
        let config = LayoutConfig::default();
        let analysis = sample(&long_text(3), "acompanhar Y");

        let doc = layout_report(&analysis, ReportVariant::AnalysisOnly, &config).unwrap();
        assert!(doc.recommendations_block.is_none());
        let block = doc.analysis_block.as_ref().unwrap();
        assert_eq!(block.limit, config.page_height_mm - 20.0);
        assert_eq!(block.lines_placed, block.lines_total);
        assert!(!texts(&doc).iter().any(|t| t.starts_with("AVISO")));

        let doc = layout_report(&analysis, ReportVariant::RecommendationsOnly, &config).unwrap();
        assert!(doc.analysis_block.is_none());
        assert_eq!(doc.recommendations_block.as_ref().unwrap().limit, config.page_height_mm - 45.0);
        assert!(texts(&doc).contains(&"AVISO IMPORTANTE"));
        assert!(texts(&doc).contains(&"acompanhar Y"));
    }

    #[test]
    fn footer_carries_patient_date_and_attribution() {
        let config = LayoutConfig::default();
        let doc = layout_report(&sample("a", "b"), ReportVariant::Combined, &config).unwrap();
        assert!(texts(&doc).contains(&"Maria Silva | 45 anos | 14/03/2025"));
        assert!(doc.ops.iter().any(|op| matches!(
            op,
            DrawOp::Link { url, .. } if url == "https://axiomind.space"
        )));
    }

    #[test]
    fn body_text_is_plain_normalized() {
        let analysis = sample("**Achado** *leve*", "b");
        let doc = layout_report(&analysis, ReportVariant::AnalysisOnly, &LayoutConfig::default())
            .unwrap();
        assert!(texts(&doc).contains(&"Achado leve"));
    }

    #[test]
    fn invalid_split_is_rejected() {
        let config = LayoutConfig {
            analysis_share: 1.5,
            ..LayoutConfig::default()
        };
        let err = layout_report(&sample("a", "b"), ReportVariant::Combined, &config).unwrap_err();
        assert!(matches!(err, ReportError::InvalidLayout(_)));
    }

    #[test]
    fn plain_text_variant_is_not_laid_out() {
        let config = LayoutConfig::default();
        let err = layout_report(&sample("a", "b"), ReportVariant::PlainText, &config).unwrap_err();
        assert!(matches!(err, ReportError::NotPaginated(ReportVariant::PlainText)));
    }

    #[test]
    fn text_report_lists_patient_and_sections() {
        let report = render_text_report(&sample("achado X", "acompanhar Y"));
        assert!(report.contains("Nome: Maria Silva"));
        assert!(report.contains("Idade: 45 anos"));
        assert!(report.contains("Sintomas: dor torácica"));
        assert!(report.contains("Data do Exame: 14/03/2025"));
        assert!(report.contains("ANÁLISE TÉCNICA:\nachado X"));
        assert!(report.contains("RECOMENDAÇÕES:\nacompanhar Y"));
    }
}
