//! services/api/src/adapters/gemini.rs
//!
//! This module contains the adapter for the exam-analysis model. It implements the
//! `ExamAnalysisService` port by calling Gemini through its OpenAI-compatible
//! chat completion endpoint.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use exam_report_core::domain::{ExamImage, Patient};
use exam_report_core::ports::{ExamAnalysisService, PortError, PortResult};
use exam_report_core::submission::preview_url;
use tracing::{error, info};

/// The single user-facing message for any failure of the model call.
pub const ANALYSIS_FAILED: &str = "Erro ao processar análise do exame. Tente novamente.";

/// Fills the analysis prompt with the patient data in a single pass, so braces in
/// the patient fields are copied as-is.
pub fn build_prompt(patient: &Patient) -> String {
    format!(
        r#"Você é um assistente médico especializado em análise de exames de imagem.
Analise cuidadosamente o exame médico fornecido e forneça uma análise técnica detalhada.

Dados do Paciente:
- Nome: {name}
- Idade: {age} anos
- Sintomas relatados: {symptoms}

Por favor, forneça:

1. ANÁLISE TÉCNICA:
- Descrição detalhada dos achados no exame
- Identificação de estruturas anatômicas visíveis
- Observações sobre normalidades e anormalidades
- Avaliação da qualidade técnica do exame

2. RECOMENDAÇÕES:
- Sugestões de conduta médica
- Necessidade de exames complementares
- Acompanhamento recomendado
- Orientações gerais

IMPORTANTE: Esta análise é apenas um auxílio diagnóstico e NÃO substitui a avaliação de um médico especialista. Sempre consulte um profissional médico qualificado para diagnóstico e tratamento definitivos.

Formate a resposta de forma clara e profissional, adequada para uso médico."#,
        name = patient.name,
        age = patient.age,
        symptoms = patient.symptoms_or_default(),
    )
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ExamAnalysisService` using an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct GeminiExamAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl GeminiExamAdapter {
    /// Creates a new `GeminiExamAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    async fn request_analysis(
        &self,
        image: &ExamImage,
        patient: &Patient,
    ) -> Result<String, OpenAIError> {
        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(build_prompt(patient))
                .build()?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(preview_url(image))
                        .detail(ImageDetail::High)
                        .build()?,
                )
                .build()?
                .into(),
        ];

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(parts))
                .build()?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()?;

        let response = self.client.chat().create(request).await?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

//=========================================================================================
// `ExamAnalysisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ExamAnalysisService for GeminiExamAdapter {
    /// Sends the prompt and the image as a base64 `data:` URL; returns the raw text.
    async fn analyze_exam(&self, image: &ExamImage, patient: &Patient) -> PortResult<String> {
        info!(
            model = %self.model,
            mime_type = %image.mime_type,
            bytes = image.bytes.len(),
            "Requesting exam analysis."
        );

        match self.request_analysis(image, patient).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                error!("Analysis model returned no text content.");
                Err(PortError::Unexpected(ANALYSIS_FAILED.to_string()))
            }
            Err(e) => {
                error!("Analysis model call failed: {:?}", e);
                Err(PortError::Unexpected(ANALYSIS_FAILED.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_patient_data_and_both_sections() {
        let patient = Patient {
            name: "Maria Silva".to_string(),
            age: 45,
            symptoms: None,
        };
        let prompt = build_prompt(&patient);
        assert!(prompt.contains("- Nome: Maria Silva"));
        assert!(prompt.contains("- Idade: 45 anos"));
        assert!(prompt.contains("- Sintomas relatados: Não informado"));
        assert!(prompt.contains("1. ANÁLISE TÉCNICA:"));
        assert!(prompt.contains("2. RECOMENDAÇÕES:"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn placeholders_inside_patient_fields_are_not_expanded() {
        let patient = Patient {
            name: "Ana {age} {symptoms}".to_string(),
            age: 30,
            symptoms: Some("dor {name}".to_string()),
        };
        let prompt = build_prompt(&patient);
        assert!(prompt.contains("- Nome: Ana {age} {symptoms}"));
        assert!(prompt.contains("- Idade: 30 anos"));
        assert!(prompt.contains("- Sintomas relatados: dor {name}"));
    }
}
