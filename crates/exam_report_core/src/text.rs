//! crates/exam_report_core/src/text.rs
//!
//! Post-processing of the model's free-text answer.
//!
//! `split_sections` is a best-effort heuristic: the model is asked to answer with a
//! "1. ANÁLISE TÉCNICA" and a "2. RECOMENDAÇÕES" section, but nothing guarantees the
//! markers come back verbatim. It is not a grammar, and callers can tell the two
//! outcomes apart through `SplitOutcome`.
//!
//! The lightweight markup in the answer is tokenized once into a small IR and then
//! rendered per target: HTML for on-screen display, plain text for documents.

use regex::Regex;
use std::sync::OnceLock;

/// Used when the answer carries no recommendations section.
pub const FALLBACK_RECOMMENDATIONS: &str =
    "Consulte um médico especialista para orientações específicas.";

fn section_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:2\.\s*)?RECOMENDAÇÕES:?").expect("valid regex"))
}

fn analysis_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)1\.\s*ANÁLISE\s+TÉCNICA:?").expect("valid regex"))
}

fn numbered_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+\.)\s").expect("valid regex"))
}

fn bullet_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-\s").expect("valid regex"))
}

fn inline_markup() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.*?)\*\*|\*(.*?)\*").expect("valid regex"))
}

//=========================================================================================
// Section Splitting
//=========================================================================================

/// Result of splitting a model answer into its two sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutcome {
    /// A recommendations marker was found.
    Split {
        analysis: String,
        recommendations: String,
    },
    /// No marker: the whole answer is the analysis.
    Fallback {
        analysis: String,
        recommendations: String,
    },
}

impl SplitOutcome {
    pub fn is_split(&self) -> bool {
        matches!(self, SplitOutcome::Split { .. })
    }

    pub fn analysis(&self) -> &str {
        match self {
            SplitOutcome::Split { analysis, .. } | SplitOutcome::Fallback { analysis, .. } => {
                analysis
            }
        }
    }

    pub fn recommendations(&self) -> &str {
        match self {
            SplitOutcome::Split {
                recommendations, ..
            }
            | SplitOutcome::Fallback {
                recommendations, ..
            } => recommendations,
        }
    }

    /// Consumes the outcome, returning `(analysis, recommendations)`.
    pub fn into_sections(self) -> (String, String) {
        match self {
            SplitOutcome::Split {
                analysis,
                recommendations,
            }
            | SplitOutcome::Fallback {
                analysis,
                recommendations,
            } => (analysis, recommendations),
        }
    }
}

/// Splits the model's answer on the first recommendations marker.
pub fn split_sections(raw: &str) -> SplitOutcome {
    let Some(marker) = section_marker().find(raw) else {
        return SplitOutcome::Fallback {
            analysis: raw.trim().to_string(),
            recommendations: FALLBACK_RECOMMENDATIONS.to_string(),
        };
    };

    let before = &raw[..marker.start()];
    let after = raw[marker.end()..].trim();

    let analysis = analysis_label().replace(before, "").trim().to_string();
    let analysis = if analysis.is_empty() {
        raw.trim().to_string()
    } else {
        analysis
    };
    let recommendations = if after.is_empty() {
        FALLBACK_RECOMMENDATIONS.to_string()
    } else {
        after.to_string()
    };

    SplitOutcome::Split {
        analysis,
        recommendations,
    }
}

//=========================================================================================
// Markup Tokens
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    Bold(String),
    Emphasis(String),
    LineBreak,
    /// A leading `N. ` on a line. Holds the raw prefix, indentation included.
    NumberedItem(String),
    /// A leading `- ` on a line. Holds the raw prefix, indentation included.
    Bullet(String),
}

pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            tokens.push(Token::LineBreak);
        }
        let line = line.strip_suffix('\r').unwrap_or(line);

        let rest = if let Some(m) = numbered_prefix().find(line) {
            tokens.push(Token::NumberedItem(m.as_str().to_string()));
            &line[m.end()..]
        } else if let Some(m) = bullet_prefix().find(line) {
            tokens.push(Token::Bullet(m.as_str().to_string()));
            &line[m.end()..]
        } else {
            line
        };

        tokenize_inline(rest, &mut tokens);
    }

    tokens
}

fn tokenize_inline(line: &str, tokens: &mut Vec<Token>) {
    let mut last = 0;
    for caps in inline_markup().captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Text(line[last..whole.start()].to_string()));
        }
        if let Some(inner) = caps.get(1) {
            tokens.push(Token::Bold(inner.as_str().to_string()));
        } else {
            let inner = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            tokens.push(Token::Emphasis(inner.to_string()));
        }
        last = whole.end();
    }
    if last < line.len() {
        tokens.push(Token::Text(line[last..].to_string()));
    }
}

//=========================================================================================
// Renderers
//=========================================================================================

/// Escapes characters that are significant in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn to_html(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(t) => out.push_str(&escape_html(t)),
            Token::Bold(t) => {
                out.push_str("<strong>");
                out.push_str(&escape_html(t));
                out.push_str("</strong>");
            }
            Token::Emphasis(t) => {
                out.push_str("<em>");
                out.push_str(&escape_html(t));
                out.push_str("</em>");
            }
            Token::LineBreak => out.push_str("<br>"),
            Token::NumberedItem(prefix) => {
                out.push_str("<br><strong>");
                out.push_str(&escape_html(prefix.trim()));
                out.push_str("</strong> ");
            }
            Token::Bullet(_) => out.push_str("<br>• "),
        }
    }
    out
}

/// Plain rendering: markers dropped, blank-line runs collapsed, trimmed.
pub fn to_plain(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut pending_break = false;

    for token in tokens {
        let piece: std::borrow::Cow<'_, str> = match token {
            Token::LineBreak => {
                pending_break = !out.is_empty();
                continue;
            }
            Token::Text(t) => t.as_str().into(),
            // Inner asterisks are dropped so a second pass finds nothing to pair.
            Token::Bold(t) | Token::Emphasis(t) => t.replace('*', "").into(),
            Token::NumberedItem(prefix) | Token::Bullet(prefix) => prefix.as_str().into(),
        };
        if piece.is_empty() {
            continue;
        }
        if pending_break {
            out.push('\n');
            pending_break = false;
        }
        out.push_str(&piece);
    }

    out.trim().to_string()
}

/// Display normalization for on-screen rendering.
pub fn format_for_display(text: &str) -> String {
    to_html(&tokenize(text))
}

/// Plain-text normalization for paginated documents.
pub fn format_for_document(text: &str) -> String {
    to_plain(&tokenize(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_numbered_marker() {
        let outcome =
            split_sections("1. ANÁLISE TÉCNICA: achado X\n2. RECOMENDAÇÕES: acompanhar Y");
        assert!(outcome.is_split());
        assert_eq!(outcome.analysis(), "achado X");
        assert_eq!(outcome.recommendations(), "acompanhar Y");
    }

    #[test]
    fn marker_is_case_insensitive() {
        let outcome =
            split_sections("1. análise técnica: pulmões limpos\n2. recomendações: repetir em 6 meses");
        assert_eq!(outcome.analysis(), "pulmões limpos");
        assert_eq!(outcome.recommendations(), "repetir em 6 meses");
    }

    #[test]
    fn bare_marker_also_splits() {
        let outcome = split_sections("Sem alterações.\nRECOMENDAÇÕES\nRetorno anual.");
        assert!(outcome.is_split());
        assert_eq!(outcome.analysis(), "Sem alterações.");
        assert_eq!(outcome.recommendations(), "Retorno anual.");
    }

    #[test]
    fn split_sections_reconstruct_original_text() {
        let analysis_body = "Opacidade em base direita.\n- Seios costofrênicos livres";
        let recommendation_body = "Tomografia de tórax.\n- Reavaliar em 30 dias";
        let raw = format!(
            "1. ANÁLISE TÉCNICA:\n{analysis_body}\n\n2. RECOMENDAÇÕES:\n{recommendation_body}\n"
        );

        let (analysis, recommendations) = split_sections(&raw).into_sections();

        assert!(!analysis.is_empty());
        assert!(!recommendations.is_empty());
        assert_eq!(analysis, analysis_body);
        assert_eq!(recommendations, recommendation_body);
    }

    #[test]
    fn missing_marker_falls_back() {
        let raw = "  Imagem de baixa qualidade, não foi possível avaliar.  ";
        let outcome = split_sections(raw);
        assert!(!outcome.is_split());
        assert_eq!(outcome.analysis(), raw.trim());
        assert_eq!(outcome.recommendations(), FALLBACK_RECOMMENDATIONS);
    }

    #[test]
    fn empty_recommendations_use_fallback_text() {
        let outcome = split_sections("1. ANÁLISE TÉCNICA: normal\n2. RECOMENDAÇÕES:");
        assert!(outcome.is_split());
        assert_eq!(outcome.recommendations(), FALLBACK_RECOMMENDATIONS);
    }

    #[test]
    fn tokenizes_inline_and_line_markup() {
        let tokens = tokenize("**Achado**: *leve*\n1. item\n- ponto");
        assert_eq!(
            tokens,
            vec![
                Token::Bold("Achado".into()),
                Token::Text(": ".into()),
                Token::Emphasis("leve".into()),
                Token::LineBreak,
                Token::NumberedItem("1. ".into()),
                Token::Text("item".into()),
                Token::LineBreak,
                Token::Bullet("- ".into()),
                Token::Text("ponto".into()),
            ]
        );
    }

    #[test]
    fn display_formatting_applies_markup_rules() {
        let html = format_for_display("**Achado** *leve*\n1. item\n- ponto");
        assert_eq!(
            html,
            "<strong>Achado</strong> <em>leve</em><br><br><strong>1.</strong> item<br><br>• ponto"
        );
    }

    #[test]
    fn display_formatting_neutralizes_injected_markup() {
        let html = format_for_display("**<script>alert('x')</script>** <img src=x onerror=\"y\">");
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<img"));
        assert!(
            html.starts_with("<strong>&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;</strong>")
        );
        assert!(html.contains("&lt;img src=x onerror=&quot;y&quot;&gt;"));
    }

    #[test]
    fn plain_formatting_strips_markers_and_blank_lines() {
        let plain = format_for_document("  **Achado** principal\n\n\n*leve* opacidade\n- item  ");
        assert_eq!(plain, "Achado principal\nleve opacidade\n- item");
    }

    #[test]
    fn plain_formatting_is_idempotent() {
        let samples = [
            "**a*b*c** resto",
            " *-* a",
            "**1.** foo\n\n\n  bar",
            "x * y * z\n\n*",
            "**a\n**b**\n\r\n- c *d",
            "  *x*\n   \n\n- \n",
            "***triplo*** e **duplo*",
        ];
        for sample in samples {
            let once = format_for_document(sample);
            assert_eq!(format_for_document(&once), once, "input: {sample:?}");
        }
    }
}
