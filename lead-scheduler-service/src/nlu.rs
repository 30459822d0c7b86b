//! Text-understanding collaborator: a narrow interface over the LLM with a
//! declared timeout, so the state machine's correctness never depends on any
//! particular model's behavior. Every call site pairs it with a
//! deterministic fallback from `extract`.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use rig::client::CompletionClient as _;
use rig::{agent::Agent, completion::Prompt, providers::openrouter};
use tracing::{debug, warn};

use crate::scheduling::business_now;

/// Classified intent of a free-text user message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Explicitly wants to book a meeting
    SchedulingRequest,
    /// Agreed to a question we asked
    Agreement,
    /// Declined or pushed back
    Refusal,
    /// Asked something new
    Question,
    Unknown,
}

#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn classify_intent(&self, text: &str) -> anyhow::Result<Intent>;

    /// Extract a concrete date/time from free text. `context_date` is the
    /// date of a previous attempt, used when the user answers with a bare
    /// time of day.
    async fn extract_datetime(
        &self,
        text: &str,
        context_date: Option<NaiveDate>,
    ) -> anyhow::Result<Option<NaiveDateTime>>;

    /// Answer a customer question against the company knowledge context
    async fn answer_question(&self, question: &str) -> anyhow::Result<String>;
}

const CLASSIFY_INTENT_PROMPT: &str = r#"Você analisa mensagens de clientes de um estúdio de marketing digital.

Classifique a mensagem do cliente em exatamente UMA destas categorias e responda APENAS com a palavra:
- AGENDAR: o cliente quer agendar/marcar uma reunião ou consultoria
- ACEITOU: o cliente concordou com algo que perguntamos ("sim", "pode", "claro", "vamos lá")
- RECUSOU: o cliente recusou ou quer adiar ("não", "agora não", "depois")
- PERGUNTA: o cliente fez uma pergunta nova

Responda APENAS: AGENDAR, ACEITOU, RECUSOU ou PERGUNTA"#;

const ANSWER_QUESTION_PROMPT: &str = r#"Você é o agente virtual de um estúdio de crescimento digital.

O cliente fez uma pergunta. Use o CONTEXTO abaixo para responder com precisão.

REGRAS:
- Responda de forma OBJETIVA (máximo 3-4 linhas)
- Use APENAS informações do contexto fornecido — não invente dados
- Se o contexto não contiver a resposta, diga que pode verificar e ofereça a consultoria gratuita
- Sem pressionar, seja consultivo e natural

CONTEXTO:
Construímos sistemas de aquisição de clientes para pequenas e médias empresas:
tráfego pago, funis de conversão e automação de atendimento. A consultoria
inicial é gratuita, dura 40 minutos e acontece pelo Google Meet, de segunda a
sexta, das 9h às 12h e das 14h às 18h."#;

static RESULT_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{2})/(\d{2})/(\d{4})\s+(\d{2}):(\d{2})").expect("Invalid regex")
});

/// OpenRouter-backed implementation. Every call is bounded by `timeout`; a
/// timeout or transport failure surfaces as an error the call sites degrade
/// from.
pub struct RigLanguageService {
    model: String,
    timeout: Duration,
}

impl RigLanguageService {
    pub fn new() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(25),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn agent(&self, preamble: &str) -> anyhow::Result<Agent<openrouter::CompletionModel>> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        let client = openrouter::Client::new(&api_key);
        Ok(client.agent(&self.model).preamble(preamble).build())
    }

    async fn prompt_with_timeout(
        &self,
        preamble: &str,
        prompt: &str,
    ) -> anyhow::Result<String> {
        let agent = self.agent(preamble)?;
        let response = tokio::time::timeout(self.timeout, agent.prompt(prompt))
            .await
            .map_err(|_| anyhow::anyhow!("language service call timed out"))?
            .context("language service call failed")?;
        Ok(response)
    }
}

impl Default for RigLanguageService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageService for RigLanguageService {
    async fn classify_intent(&self, text: &str) -> anyhow::Result<Intent> {
        let prompt = format!("Mensagem do cliente: \"{text}\"");
        let response = self.prompt_with_timeout(CLASSIFY_INTENT_PROMPT, &prompt).await?;
        let normalized = response.trim().to_uppercase();

        let intent = if normalized.contains("AGENDAR") {
            Intent::SchedulingRequest
        } else if normalized.contains("ACEITOU") {
            Intent::Agreement
        } else if normalized.contains("RECUSOU") {
            Intent::Refusal
        } else if normalized.contains("PERGUNTA") {
            Intent::Question
        } else {
            warn!(%response, "unexpected intent classification response");
            Intent::Unknown
        };
        debug!(?intent, "classified intent");
        Ok(intent)
    }

    async fn extract_datetime(
        &self,
        text: &str,
        context_date: Option<NaiveDate>,
    ) -> anyhow::Result<Option<NaiveDateTime>> {
        let now = business_now();
        let context = match context_date {
            Some(date) => format!(
                "\n- Data da tentativa anterior: {} — SE o usuário disser apenas um horário (ex: '10h', 'às 14'), USE ESTA DATA",
                date.format("%d/%m/%Y")
            ),
            None => String::new(),
        };

        let preamble = format!(
            r#"Você extrai datas e horários de mensagens naturais.

CONTEXTO:
- Hoje é: {today}
- Horário comercial: Segunda a Sexta, 9h-12h e 14h-18h{context}

INSTRUÇÕES:
1. Se a mensagem contém uma data/hora de agendamento, converta para o formato abaixo
2. Dias da semana ("terça", "quinta") significam a próxima ocorrência desse dia
3. Horários como "11h", "às 14" viram HH:00
4. Se NÃO houver data/hora clara ("quero sim", "ok"), responda NENHUM

FORMATO DE SAÍDA (OBRIGATÓRIO, uma linha):
RESULTADO: DD/MM/YYYY HH:MM
OU
RESULTADO: NENHUM"#,
            today = now.format("%d/%m/%Y %H:%M"),
            context = context,
        );

        let prompt = format!("Mensagem do usuário: \"{text}\"");
        let response = self.prompt_with_timeout(&preamble, &prompt).await?;

        if response.to_uppercase().contains("NENHUM") {
            return Ok(None);
        }

        let Some(caps) = RESULT_DATETIME_RE.captures(&response) else {
            warn!(%response, "datetime extraction returned an unparseable result");
            return Ok(None);
        };
        let (day, month, year, hour, minute) = (
            caps[1].parse::<u32>()?,
            caps[2].parse::<u32>()?,
            caps[3].parse::<i32>()?,
            caps[4].parse::<u32>()?,
            caps[5].parse::<u32>()?,
        );

        let parsed = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0));
        if parsed.is_none() {
            warn!(%response, "datetime extraction produced an invalid calendar date");
        }
        Ok(parsed)
    }

    async fn answer_question(&self, question: &str) -> anyhow::Result<String> {
        let prompt = format!("Pergunta do cliente: \"{question}\"\n\nSua resposta:");
        self.prompt_with_timeout(ANSWER_QUESTION_PROMPT, &prompt).await
    }
}
