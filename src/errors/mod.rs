//! # Módulo de Erros Estruturados
//!
//! Define a taxonomia de erros do orquestrador. Todo erro que acontece
//! durante a execução de uma story é classificado em exatamente um
//! `ErrorKind`, e carregado como valor dentro do registro do step.
//!
//! ## Para todos entenderem:
//!
//! Quando algo dá errado, não basta saber que "falhou". Precisamos saber
//! **onde** falhou (parse? rede? protocolo?) para que o operador e o CI
//! possam reagir corretamente:
//!
//! | Kind                  | Significado                                      |
//! |-----------------------|--------------------------------------------------|
//! | ParseError            | YAML malformado, kind ou campo desconhecido      |
//! | Config                | Configuração de backend ausente/inválida         |
//! | BackendTransport      | Falha de I/O TCP/HTTP após retries               |
//! | BackendProtocol       | Resposta com formato inesperado                  |
//! | CapabilityUnavailable | Operação de player-sim num backend console-only  |
//! | Timeout               | Deadline da ação estourou                        |
//! | ReferenceUnbound      | `${var}` ou `${{ steps... }}` sem valor          |
//! | ValidationFailed      | Validador `expect*` não bateu                    |
//! | AssertionFailed       | Assertion avaliou para false                     |
//! | Cancelled             | Cancelamento externo                             |
//!
//! ## Propagação:
//!
//! - `ParseError` e `Config` abortam ANTES da execução começar (exit code 2).
//! - Erros em setup/steps são registrados mas nunca pulam o cleanup.
//! - Erros no cleanup são registrados e não mascaram erros anteriores.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// TAXONOMIA
// ============================================================================

/// Classificação fechada de todo erro observável numa execução.
///
/// A mensagem de cada variante é a forma "de uma linha" exibida em
/// relatórios; detalhes adicionais vivem em [`StepError::detail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// YAML malformado, kind desconhecido ou campo obrigatório ausente.
    ParseError,
    /// Configuração de backend ausente ou inválida.
    Config,
    /// Falha de transporte (TCP/HTTP) depois de esgotar as tentativas.
    BackendTransport,
    /// A resposta do servidor/bridge viola o formato esperado.
    BackendProtocol,
    /// Ação de player-sim roteada para um backend que não a suporta.
    CapabilityUnavailable,
    /// Deadline por ação excedido.
    Timeout,
    /// Expressão de referência aponta para variável ou step inexistente.
    ReferenceUnbound,
    /// Validador `expect`/`expectContains`/... não bateu com o resultado.
    ValidationFailed,
    /// Assertion avaliada para false.
    AssertionFailed,
    /// Cancelamento externo (sinal do host).
    Cancelled,
}

impl ErrorKind {
    /// Erros que abortam a suite antes de qualquer story executar.
    pub fn aborts_before_execution(self) -> bool {
        matches!(self, ErrorKind::ParseError | ErrorKind::Config)
    }

    /// Nome estável usado em relatórios e logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Config => "config",
            ErrorKind::BackendTransport => "backend_transport",
            ErrorKind::BackendProtocol => "backend_protocol",
            ErrorKind::CapabilityUnavailable => "capability_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ReferenceUnbound => "reference_unbound",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::AssertionFailed => "assertion_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CANAL
// ============================================================================

/// Canal pelo qual uma ação conversa com o mundo externo.
///
/// Usado para classificar o tráfego nos relatórios: comandos de admin vão
/// pelo canal `server` (console), ações de jogador simulado pelo `client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Console de administração do servidor (protocolo TCP framed).
    Server,
    /// Bridge HTTP de simulação de jogadores.
    Client,
    /// Operações internas do orquestrador (stores, comparações, waits).
    Op,
    /// Tráfego originado pelo runtime de jogador simulado.
    Mineflayer,
    /// Qualquer outra coisa.
    Other,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Server => "server",
            Channel::Client => "client",
            Channel::Op => "op",
            Channel::Mineflayer => "mineflayer",
            Channel::Other => "other",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// ERRO DE STEP
// ============================================================================

/// Erro carregado como valor dentro do registro de um step.
///
/// Nenhuma exceção escapa do orquestrador: tudo que dá errado vira um
/// `StepError` anexado ao step que o causou.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{kind}] {message}")]
pub struct StepError {
    /// Classificação do erro.
    pub kind: ErrorKind,
    /// Mensagem humana de uma linha.
    pub message: String,
    /// Detalhe opcional (corpo de resposta, stack, frame bruto).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Nome da ação onde o erro aconteceu.
    pub action: String,
    /// Canal da ação.
    pub channel: Channel,
}

impl StepError {
    /// Cria um erro sem detalhe adicional.
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        action: impl Into<String>,
        channel: Channel,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            action: action.into(),
            channel,
        }
    }

    /// Anexa o detalhe (corpo de resposta, frame, etc.).
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// ERROS DE BACKEND
// ============================================================================

/// Erro retornado pelas operações do contrato de backend.
///
/// É a forma "crua" antes de virar [`StepError`]: o orquestrador anexa o
/// nome da ação e o canal ao converter.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transporte: {0}")]
    Transport(String),

    #[error("protocolo: {0}")]
    Protocol(String),

    #[error("operação '{operation}' não suportada pelo backend '{backend}'")]
    CapabilityUnavailable { operation: String, backend: String },

    #[error("timeout após {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("cancelado")]
    Cancelled,
}

impl BackendError {
    /// Classifica o erro de backend na taxonomia geral.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Transport(_) => ErrorKind::BackendTransport,
            BackendError::Protocol(_) => ErrorKind::BackendProtocol,
            BackendError::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            BackendError::Timeout { .. } => ErrorKind::Timeout,
            BackendError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ErrorKind::ParseError.as_str(), "parse_error");
        assert_eq!(
            ErrorKind::CapabilityUnavailable.as_str(),
            "capability_unavailable"
        );
        assert_eq!(ErrorKind::ReferenceUnbound.as_str(), "reference_unbound");
    }

    #[test]
    fn test_abort_before_execution() {
        assert!(ErrorKind::ParseError.aborts_before_execution());
        assert!(ErrorKind::Config.aborts_before_execution());
        assert!(!ErrorKind::Timeout.aborts_before_execution());
        assert!(!ErrorKind::AssertionFailed.aborts_before_execution());
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::new(
            ErrorKind::Timeout,
            "deadline de 30s excedido",
            "wait_for_chat_message",
            Channel::Client,
        );
        let msg = err.to_string();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("deadline"));
    }

    #[test]
    fn test_backend_error_classification() {
        let err = BackendError::CapabilityUnavailable {
            operation: "send_chat".to_string(),
            backend: "console".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::CapabilityUnavailable);
        assert_eq!(
            BackendError::Transport("connection refused".into()).kind(),
            ErrorKind::BackendTransport
        );
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ErrorKind::BackendProtocol).unwrap();
        assert_eq!(json, "\"backend_protocol\"");
    }
}
