//! Prompt templates for each analysis type.
//!
//! Every template is a system instruction describing the real-estate domain
//! and the JSON fields expected back, plus a user instruction that embeds
//! the rendered conversation and a JSON skeleton the model should follow
//! structurally. Rendering is pure: identical input yields identical text.

use crate::error::{Error, Result};
use crate::{AnalysisType, Message, Sender};

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M";
const SKELETON_HEADER: &str = "Retorne APENAS um JSON válido com a estrutura:";

/// System/user prompt pair sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

struct Template {
    system: &'static str,
    instruction: &'static str,
    skeleton: &'static str,
}

const SUMMARY: Template = Template {
    system: "Você é um assistente especializado em análise de conversas imobiliárias.
Analise a conversa fornecida e retorne um resumo estruturado em JSON com as seguintes informações:
- key_info: objeto com informações principais (cliente, propriedade, interesse, contato)
- next_steps: array de strings com próximos passos sugeridos
- summary: string com resumo geral da conversa",
    instruction: "Analise a seguinte conversa e retorne um JSON com o resumo estruturado:",
    skeleton: r#"{
    "key_info": {
        "cliente": "nome ou informações do cliente",
        "propriedade": "informações sobre a propriedade de interesse",
        "interesse": "nível de interesse do cliente",
        "contato": "informações de contato relevantes"
    },
    "next_steps": ["próximo passo 1", "próximo passo 2"],
    "summary": "resumo geral da conversa"
}"#,
};

const SENTIMENT: Template = Template {
    system: "Você é um assistente especializado em análise de sentimento em conversas imobiliárias.
Analise o sentimento geral da conversa e retorne um JSON com:
- score: número de -1 a 1 (negativo a positivo)
- sentiment: \"positive\", \"neutral\" ou \"negative\"
- indicators: array de strings com indicadores que justificam o sentimento",
    instruction: "Analise o sentimento da seguinte conversa:",
    skeleton: r#"{
    "score": 0.8,
    "sentiment": "positive",
    "indicators": ["cliente demonstrou interesse", "perguntas específicas sobre a propriedade"]
}"#,
};

const INTENT: Template = Template {
    system: "Você é um assistente especializado em análise de intenção de compra em conversas imobiliárias.
Analise a intenção de compra do cliente e retorne um JSON com:
- intent: \"high\", \"medium\" ou \"low\"
- confidence: número de 0 a 1 (confiança na análise)
- urgency: \"high\", \"medium\" ou \"low\"
- reasons: array de strings com razões que justificam a intenção",
    instruction: "Analise a intenção de compra na seguinte conversa:",
    skeleton: r#"{
    "intent": "high",
    "confidence": 0.9,
    "urgency": "high",
    "reasons": ["cliente perguntou sobre visita", "demonstrou interesse imediato"]
}"#,
};

const LEAD_QUALITY: Template = Template {
    system: "Você é um assistente especializado em qualificação de leads imobiliários.
Analise a qualidade do lead e retorne um JSON com:
- quality: \"hot\", \"warm\" ou \"cold\"
- score: número de 0 a 100
- reasons: array de strings com razões da qualificação
- follow_up_suggestions: array de strings com sugestões de follow-up",
    instruction: "Analise a qualidade do lead na seguinte conversa:",
    skeleton: r#"{
    "quality": "hot",
    "score": 85,
    "reasons": ["interesse demonstrado", "perguntas específicas", "disponibilidade para visita"],
    "follow_up_suggestions": ["agendar visita", "enviar mais informações", "ligar em 24h"]
}"#,
};

fn template(analysis_type: AnalysisType) -> &'static Template {
    match analysis_type {
        AnalysisType::Summary => &SUMMARY,
        AnalysisType::Sentiment => &SENTIMENT,
        AnalysisType::Intent => &INTENT,
        AnalysisType::LeadQuality => &LEAD_QUALITY,
    }
}

fn sender_label(sender: Sender) -> &'static str {
    match sender {
        Sender::Client => "Cliente",
        Sender::Agent => "Agente",
    }
}

/// Render messages one per line as `[dd/mm/YYYY HH:MM] Cliente|Agente: content`,
/// keeping the caller's order.
pub fn render_conversation(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|msg| {
            format!(
                "[{}] {}: {}",
                msg.timestamp.format(TIMESTAMP_FORMAT),
                sender_label(msg.sender),
                msg.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the prompt pair for an already rendered conversation.
pub fn build_prompts(analysis_type: AnalysisType, conversation: &str) -> PromptPair {
    let tpl = template(analysis_type);
    PromptPair {
        system: tpl.system.to_string(),
        user: format!(
            "{}\n\n{}\n\n{}\n{}",
            tpl.instruction, conversation, SKELETON_HEADER, tpl.skeleton
        ),
    }
}

/// Build prompts from an analysis type given by name. Unknown names are rejected.
pub fn build_prompts_for(analysis_type: &str, messages: &[Message]) -> Result<PromptPair> {
    let parsed: AnalysisType = analysis_type.parse()?;
    if messages.is_empty() {
        return Err(Error::InvalidArgument("message list is empty".into()));
    }
    Ok(build_prompts(parsed, &render_conversation(messages)))
}
