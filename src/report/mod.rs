//! # Agregador de Relatórios
//!
//! Acumula em memória tudo que uma suite produz: stories, steps,
//! evidências, snapshots de estado e os streams de log de servidor e
//! cliente. No fim da suite, renderiza em quatro formatos:
//!
//! | Formato   | Arquivo                 | Uso                          |
//! |-----------|-------------------------|------------------------------|
//! | Texto     | `{suite}_report.txt`    | leitura rápida no terminal   |
//! | JSON      | `{suite}_report.json`   | integrações e dashboards     |
//! | JUnit XML | `TEST-{suite}.xml`      | CI (Jenkins, GitLab, etc.)   |
//! | HTML      | `{suite}_report.html`   | análise com diff visual      |
//!
//! ## Regras de agregação:
//!
//! - Uma story `passed` sse todos os seus steps passaram e nenhuma
//!   assertion falhou.
//! - Uma suite `passed` sse todas as stories passaram.
//! - O agregador é append-only durante a execução; renderizadores só
//!   rodam no fim.
//! - Pânico num renderizador marca a suite como falha e ainda tenta
//!   emitir pelo menos o relatório JSON.

pub mod html;
pub mod junit;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::errors::{Channel, StepError};
use crate::story::{StepStatus, TestResult};

// ============================================================================
// STREAMS DE LOG
// ============================================================================

/// Uma linha de log com timestamp monotônico de parede.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub text: String,
}

/// Handle clonável de um stream de log. Backends escrevem, o agregador
/// lê no fim. Append-only, sem ring: suites são curtas.
#[derive(Debug, Clone, Default)]
pub struct LogStream {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl LogStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, channel: Channel, text: impl Into<String>) {
        let mut lines = self.lines.lock().expect("log stream lock");
        lines.push(LogLine {
            timestamp: Utc::now(),
            channel,
            text: text.into(),
        });
    }

    /// Quantidade atual de linhas (marcador de "início de story").
    pub fn len(&self) -> usize {
        self.lines.lock().expect("log stream lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Texto concatenado a partir de uma posição (para
    /// `assert_log_contains`, que só olha o log desde o começo da story).
    pub fn text_since(&self, start: usize) -> String {
        let lines = self.lines.lock().expect("log stream lock");
        lines
            .iter()
            .skip(start)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.lock().expect("log stream lock").clone()
    }
}

// ============================================================================
// REGISTROS
// ============================================================================

/// Registro de um step executado.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Nome de exibição do step.
    pub name: String,
    /// Descrição da ação (token + alvo).
    pub action: String,
    /// Canal da ação.
    pub action_channel: Channel,
    /// O que era esperado (validadores), se houver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// O que foi observado.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// O step passou?
    pub passed: bool,
    /// Status detalhado.
    pub status: StepStatus,
    /// Linhas de evidência (tráfego, observações, limitações).
    pub evidence: Vec<String>,
    /// Snapshot do estado observável antes do step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_before: Option<Value>,
    /// Snapshot do estado observável depois do step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_after: Option<Value>,
    /// Erro estruturado, quando houve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Registro de uma story dentro da suite.
#[derive(Debug, Clone, Serialize)]
pub struct StoryRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub backend: String,
    pub passed: bool,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,
}

// ============================================================================
// AGREGADOR
// ============================================================================

/// O agregador de uma suite. Vive pela duração da suite inteira;
/// stories vão sendo anexadas conforme executam.
#[derive(Debug)]
pub struct ReportAggregator {
    pub suite_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stories: Vec<StoryRecord>,
    pub server_log: LogStream,
    pub client_log: LogStream,
    /// Falha fora de story (pânico de renderizador, erro de config).
    pub suite_error: Option<String>,
}

impl ReportAggregator {
    pub fn new(suite_name: impl Into<String>) -> Self {
        Self {
            suite_name: suite_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            stories: Vec::new(),
            server_log: LogStream::new(),
            client_log: LogStream::new(),
            suite_error: None,
        }
    }

    /// Anexa o registro de uma story executada.
    pub fn push_story(&mut self, story: StoryRecord) {
        self.stories.push(story);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// A suite passou sse todas as stories passaram e nada quebrou fora
    /// delas.
    pub fn suite_passed(&self) -> bool {
        self.suite_error.is_none() && self.stories.iter().all(|s| s.passed)
    }

    // ------------------------------------------------------------------
    // Renderizador: texto
    // ------------------------------------------------------------------

    /// Uma linha por story, um bloco por step, evidências em bullets.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Suite: {}\n", self.suite_name));
        out.push_str(&format!(
            "Resultado: {}\n",
            if self.suite_passed() { "PASSED" } else { "FAILED" }
        ));
        out.push_str(&format!("Início: {}\n", self.started_at.to_rfc3339()));
        if let Some(end) = self.finished_at {
            out.push_str(&format!("Fim: {}\n", end.to_rfc3339()));
        }
        if let Some(err) = &self.suite_error {
            out.push_str(&format!("Erro de suite: {}\n", err));
        }
        out.push('\n');

        for story in &self.stories {
            out.push_str(&format!(
                "[{}] {} ({} steps, backend {})\n",
                if story.passed { "PASS" } else { "FAIL" },
                story.name,
                story.steps.len(),
                story.backend
            ));
            for step in &story.steps {
                out.push_str(&format!(
                    "  {} {} [{}] {}ms\n",
                    if step.passed { "✔" } else { "✘" },
                    step.name,
                    step.action_channel,
                    step.duration_ms
                ));
                if let (Some(expected), Some(actual)) = (&step.expected, &step.actual) {
                    out.push_str(&format!("    esperado: {}\n", expected));
                    out.push_str(&format!("    obtido:   {}\n", truncate(actual, 200)));
                }
                if let Some(err) = &step.error {
                    out.push_str(&format!("    erro: {}\n", err));
                }
                for line in &step.evidence {
                    out.push_str(&format!("    - {}\n", truncate(line, 300)));
                }
            }
            out.push('\n');
        }
        out
    }

    // ------------------------------------------------------------------
    // Renderizador: JSON
    // ------------------------------------------------------------------

    /// Objeto espelhando o agregado, sem transformação.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "suite": self.suite_name,
            "passed": self.suite_passed(),
            "startedAt": self.started_at.to_rfc3339(),
            "finishedAt": self.finished_at.map(|t| t.to_rfc3339()),
            "suiteError": self.suite_error,
            "stories": self.stories,
            "serverLog": self.server_log.snapshot(),
            "clientLog": self.client_log.snapshot(),
        })
    }

    // ------------------------------------------------------------------
    // Escrita dos arquivos
    // ------------------------------------------------------------------

    /// Escreve os quatro relatórios no diretório de saída.
    ///
    /// Pânico em um renderizador não derruba o processo: marca a suite
    /// como falha e segue para o próximo, garantindo pelo menos o JSON.
    pub fn write_reports(&mut self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let safe = sanitize_filename(&self.suite_name);
        let mut written = Vec::new();

        // O JSON vai primeiro: é o relatório de último recurso.
        let json_path = dir.join(format!("{}_report.json", safe));
        let json = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(&json_path, json)?;
        written.push(json_path);

        type Renderer<'a> = (&'a str, Box<dyn Fn(&ReportAggregator) -> String>);
        let renderers: Vec<Renderer> = vec![
            (
                "{}_report.txt",
                Box::new(|agg: &ReportAggregator| agg.render_text()),
            ),
            (
                "TEST-{}.xml",
                Box::new(|agg: &ReportAggregator| junit::render_junit(agg)),
            ),
            (
                "{}_report.html",
                Box::new(|agg: &ReportAggregator| html::render_html(agg)),
            ),
        ];

        for (pattern, renderer) in renderers {
            let name = pattern.replace("{}", &safe);
            let path = dir.join(&name);
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| renderer(self))) {
                Ok(content) => {
                    std::fs::write(&path, content)?;
                    written.push(path);
                }
                Err(_) => {
                    error!(report = %name, "renderizador entrou em pânico; suite marcada como falha");
                    self.suite_error = Some(format!("renderizador de '{}' falhou", name));
                    // Reemite o JSON com o erro de suite registrado.
                    let json = serde_json::to_string_pretty(&self.to_json())?;
                    std::fs::write(dir.join(format!("{}_report.json", safe)), json)?;
                }
            }
        }

        info!(count = written.len(), dir = %dir.display(), "📄 relatórios escritos");
        Ok(written)
    }
}

/// Qualquer caractere fora de [A-Za-z0-9] vira `_` no nome do arquivo.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    pub(crate) fn sample_step(name: &str, passed: bool) -> StepRecord {
        let now = Utc::now();
        StepRecord {
            name: name.to_string(),
            action: "execute_rcon_command list".to_string(),
            action_channel: Channel::Server,
            expected: None,
            actual: Some("There are 0 players online".to_string()),
            passed,
            status: if passed { StepStatus::Passed } else { StepStatus::Failed },
            evidence: vec!["> list".to_string(), "< There are 0 players online".to_string()],
            state_before: None,
            state_after: None,
            error: if passed {
                None
            } else {
                Some(StepError::new(
                    ErrorKind::ValidationFailed,
                    "validador não bateu",
                    "execute_rcon_command",
                    Channel::Server,
                ))
            },
            start_time: now,
            end_time: now,
            duration_ms: 12,
        }
    }

    pub(crate) fn sample_story(name: &str, passed: bool) -> StoryRecord {
        StoryRecord {
            name: name.to_string(),
            description: None,
            backend: "console".to_string(),
            passed,
            steps: vec![sample_step("passo 1", passed)],
            result: None,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("suite smoke v1.2"), "suite_smoke_v1_2");
        assert_eq!(sanitize_filename("ok_name"), "ok_name");
    }

    #[test]
    fn test_suite_passes_only_when_all_stories_pass() {
        let mut agg = ReportAggregator::new("s");
        agg.push_story(sample_story("a", true));
        assert!(agg.suite_passed());
        agg.push_story(sample_story("b", false));
        assert!(!agg.suite_passed());
    }

    #[test]
    fn test_suite_error_fails_suite() {
        let mut agg = ReportAggregator::new("s");
        agg.push_story(sample_story("a", true));
        agg.suite_error = Some("boom".to_string());
        assert!(!agg.suite_passed());
    }

    #[test]
    fn test_log_stream_since() {
        let stream = LogStream::new();
        stream.append(Channel::Server, "antes");
        let mark = stream.len();
        stream.append(Channel::Server, "Player joined the game");
        let text = stream.text_since(mark);
        assert!(text.contains("joined"));
        assert!(!text.contains("antes"));
    }

    #[test]
    fn test_text_render_contains_story_and_evidence() {
        let mut agg = ReportAggregator::new("smoke");
        agg.push_story(sample_story("minha story", false));
        agg.finish();
        let text = agg.render_text();
        assert!(text.contains("FAILED"));
        assert!(text.contains("minha story"));
        assert!(text.contains("- > list"));
    }

    #[test]
    fn test_json_mirrors_aggregate() {
        let mut agg = ReportAggregator::new("smoke");
        agg.push_story(sample_story("a", true));
        agg.finish();
        let json = agg.to_json();
        assert_eq!(json["suite"], "smoke");
        assert_eq!(json["passed"], true);
        assert_eq!(json["stories"][0]["steps"][0]["action_channel"], "server");
    }

    #[test]
    fn test_write_reports_creates_four_files() {
        let dir = std::env::temp_dir().join(format!("story_runner_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut agg = ReportAggregator::new("smoke suite");
        agg.push_story(sample_story("a", true));
        agg.finish();

        let written = agg.write_reports(&dir).unwrap();
        assert_eq!(written.len(), 4);
        assert!(dir.join("smoke_suite_report.json").exists());
        assert!(dir.join("smoke_suite_report.txt").exists());
        assert!(dir.join("TEST-smoke_suite.xml").exists());
        assert!(dir.join("smoke_suite_report.html").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
