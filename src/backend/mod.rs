//! # Contrato de Backend e Fábrica
//!
//! Todo backend satisfaz o mesmo contrato de capacidades
//! ([`GameBackend`]): operações de ciclo de vida, plano do servidor
//! (console de administração) e plano do cliente (jogadores simulados).
//!
//! ## Os dois backends embutidos:
//!
//! | Backend     | Plano do servidor | Plano do cliente            |
//! |-------------|-------------------|-----------------------------|
//! | `console`   | console TCP       | `CapabilityUnavailable`     |
//! | `playersim` | console TCP       | bridge HTTP                 |
//!
//! O playersim COMPÕE um backend de console (has-a, não is-a): os
//! comandos de admin que o bridge não consegue emitir continuam
//! passando pelo console embutido.
//!
//! ## Convenções que os backends garantem antes de devolver ao
//! orquestrador:
//!
//! - Composição de comando: `cmd` sozinho quando não há args, senão
//!   `cmd + " " + args.join(" ")`. Espaço no fim é PROIBIDO (algumas
//!   versões do servidor rejeitam o comando inteiro).
//! - Entidades de teste ganham nome único determinístico com marcador,
//!   para que `remove_all_test_entities` as encontre depois.
//! - Seletores de entidade usam predicado de distância
//!   (`distance=..R`), nunca a forma legada de raio.
//! - `get_world_time` extrai o primeiro inteiro da resposta; resposta
//!   sem inteiro é erro de protocolo.

pub mod console;
pub mod playersim;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::errors::BackendError;
use crate::report::LogStream;
use crate::retry::ReconnectPolicy;
use crate::story::BackendKind;

// ============================================================================
// CONSTANTES
// ============================================================================

/// Prefixo dos nomes de entidades de teste.
pub const TEST_ENTITY_PREFIX: &str = "qa_";

/// Tag de scoreboard aplicada a toda entidade spawnada pelo runner.
pub const TEST_ENTITY_TAG: &str = "story_test";

/// Raio padrão dos seletores de entidade.
pub const ENTITY_SEARCH_RADIUS: u32 = 10_000;

// ============================================================================
// CONFIGURAÇÃO E FÁBRICA
// ============================================================================

/// Configuração de criação de um backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Endereço `host:porta` do console.
    pub console_addr: String,
    /// Senha do console.
    pub console_password: String,
    /// Timeout de leitura do socket do console.
    pub read_timeout: Duration,
    /// URL base do bridge (obrigatória para playersim).
    pub bridge_url: Option<String>,
    /// Política de reconexão do console.
    pub reconnect: ReconnectPolicy,
}

/// Erro de configuração: aborta a suite antes de qualquer execução.
#[derive(Debug, Error)]
#[error("configuração de backend inválida: {0}")]
pub struct ConfigError(pub String);

/// Fábrica: escolhe e constrói exatamente um backend a partir da
/// configuração. Os streams de log vêm do agregador de relatórios.
pub fn create_backend(
    config: &BackendConfig,
    server_log: LogStream,
    client_log: LogStream,
) -> Result<Box<dyn GameBackend>, ConfigError> {
    if config.console_addr.trim().is_empty() {
        return Err(ConfigError("endereço do console vazio".to_string()));
    }

    match config.kind {
        BackendKind::Console => Ok(Box::new(console::ConsoleBackend::new(config, server_log))),
        BackendKind::PlayerSim => {
            let bridge_url = config
                .bridge_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    ConfigError("backend playersim exige a URL do bridge".to_string())
                })?;
            Ok(Box::new(playersim::PlayerSimBackend::new(
                config, bridge_url, server_log, client_log,
            )))
        }
    }
}

// ============================================================================
// CONTRATO
// ============================================================================

/// O contrato de capacidades que todo backend satisfaz.
///
/// Operações recebem `&mut self`: há no máximo uma chamada em voo por
/// backend, o que também serializa o uso da conexão de console.
#[async_trait]
pub trait GameBackend: Send {
    // ------------------------------------------------------------------
    // Ciclo de vida
    // ------------------------------------------------------------------

    /// Prepara o backend antes da fase de setup de uma story.
    async fn initialize(&mut self) -> Result<(), BackendError>;

    /// Libera conexões, desconecta jogadores simulados e remove as
    /// entidades de teste rastreadas. Roda SEMPRE.
    async fn cleanup(&mut self) -> Result<(), BackendError>;

    /// Identificador estável do tipo do backend ("console"/"playersim").
    fn backend_type(&self) -> &'static str;

    // ------------------------------------------------------------------
    // Plano do servidor
    // ------------------------------------------------------------------

    /// Comando de admin composto (`cmd` + args). Sem espaço no fim.
    async fn execute_console(&mut self, cmd: &str, args: &[String]) -> Result<String, BackendError>;

    /// Comando de admin cru, sem composição.
    async fn execute_console_raw(&mut self, text: &str) -> Result<String, BackendError>;

    /// Spawna uma entidade com nome único derivado de `local_name`.
    /// Retorna o nome completo no mundo.
    async fn spawn_entity(
        &mut self,
        local_name: &str,
        entity_type: &str,
        x: f64,
        y: f64,
        z: f64,
        equipment: Option<&BTreeMap<String, String>>,
    ) -> Result<String, BackendError>;

    async fn entity_exists(&mut self, local_name: &str) -> Result<bool, BackendError>;
    async fn get_entity_health(&mut self, local_name: &str) -> Result<f64, BackendError>;
    async fn set_entity_health(&mut self, local_name: &str, health: f64) -> Result<(), BackendError>;
    async fn kill_entity(&mut self, local_name: &str) -> Result<(), BackendError>;
    async fn damage_entity(&mut self, local_name: &str, amount: f64) -> Result<(), BackendError>;

    async fn give_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError>;
    async fn remove_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError>;
    async fn clear_inventory(&mut self, player: &str) -> Result<(), BackendError>;

    async fn make_operator(&mut self, player: &str) -> Result<(), BackendError>;
    async fn teleport(&mut self, player: &str, x: f64, y: f64, z: f64) -> Result<(), BackendError>;
    async fn gamemode(&mut self, player: &str, mode: &str) -> Result<(), BackendError>;
    async fn set_spawn_point(&mut self, player: &str, x: f64, y: f64, z: f64) -> Result<(), BackendError>;
    async fn kill_player(&mut self, player: &str) -> Result<(), BackendError>;
    async fn heal_player(&mut self, player: &str) -> Result<(), BackendError>;
    async fn set_player_health(&mut self, player: &str, value: f64) -> Result<(), BackendError>;

    async fn set_weather(&mut self, kind: &str, seconds: Option<u64>) -> Result<(), BackendError>;
    async fn set_time(&mut self, ticks: i64) -> Result<(), BackendError>;
    async fn get_world_time(&mut self) -> Result<i64, BackendError>;
    async fn get_weather(&mut self) -> Result<String, BackendError>;

    async fn remove_all_test_entities(&mut self) -> Result<(), BackendError>;
    async fn remove_all_test_players(&mut self) -> Result<(), BackendError>;

    // ------------------------------------------------------------------
    // Plano do cliente (player-sim)
    // ------------------------------------------------------------------

    async fn connect_player(&mut self, name: &str) -> Result<Value, BackendError>;
    async fn disconnect_player(&mut self, name: &str) -> Result<Value, BackendError>;
    async fn send_chat(&mut self, name: &str, message: &str) -> Result<Value, BackendError>;
    async fn execute_player_command(&mut self, name: &str, command: &str) -> Result<Value, BackendError>;
    async fn move_player(&mut self, name: &str, x: f64, y: f64, z: f64) -> Result<Value, BackendError>;
    async fn equip(&mut self, name: &str, item: &str, slot: Option<&str>) -> Result<Value, BackendError>;
    async fn use_item(&mut self, name: &str, target: &str) -> Result<Value, BackendError>;
    async fn get_position(&mut self, name: &str) -> Result<Value, BackendError>;
    async fn get_health(&mut self, name: &str) -> Result<Value, BackendError>;
    async fn get_inventory(&mut self, name: &str) -> Result<Value, BackendError>;
    async fn get_entities(&mut self, name: &str) -> Result<Value, BackendError>;
    async fn get_equipment(&mut self, name: &str) -> Result<Value, BackendError>;

    /// Liveness do bridge (playersim) ou do console (console-only).
    async fn check_service_health(&mut self) -> Result<bool, BackendError>;
}

// ============================================================================
// HELPERS COMPARTILHADOS
// ============================================================================

/// Compõe a string de comando. `cmd` sozinho quando `args` está vazio,
/// senão `cmd + " " + join(args, " ")`. Nunca com espaço no fim.
pub fn compose_command(cmd: &str, args: &[String]) -> String {
    let cmd = cmd.trim_end();
    if args.is_empty() {
        return cmd.to_string();
    }
    let mut out = String::from(cmd);
    out.push(' ');
    out.push_str(&args.join(" "));
    out.trim_end().to_string()
}

/// Deriva o nome único no mundo para uma entidade de teste.
///
/// `qa_<local>_<8 hex>`: o sufixo é o SHA-256 truncado de
/// `story-entity:<local>`, então o mesmo nome local sempre produz o
/// mesmo nome no mundo (stories são reexecutáveis).
pub fn test_entity_name(local_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"story-entity:");
    hasher.update(local_name.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("{}{}_{}", TEST_ENTITY_PREFIX, local_name, hex)
}

/// Seletor de entidade por nome completo, com predicado de distância.
pub fn entity_selector(full_name: &str) -> String {
    format!(
        "@e[name={},distance=..{},limit=1]",
        full_name, ENTITY_SEARCH_RADIUS
    )
}

/// Extrai o primeiro inteiro de uma resposta do console.
///
/// O console responde ora um inteiro puro (`13000`), ora uma frase
/// contendo um (`The time is 13000`). Nenhum inteiro: erro de protocolo.
pub fn parse_world_time(reply: &str) -> Result<i64, BackendError> {
    parse_first_integer(reply).ok_or_else(|| {
        BackendError::Protocol(format!("resposta de tempo sem inteiro: '{}'", reply.trim()))
    })
}

fn parse_first_integer(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() || (bytes[i] == b'-' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = text[start..i].parse() {
                return Some(n);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Extrai o primeiro número (float) de uma resposta tipo
/// `z1 has the following entity data: 20.0f`.
pub fn parse_first_float(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let is_start = bytes[i].is_ascii_digit()
            || (bytes[i] == b'-' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()));
        if is_start {
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if let Ok(n) = text[start..i].trim_end_matches('.').parse() {
                return Some(n);
            }
        } else {
            i += 1;
        }
    }
    None
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_command_no_args() {
        assert_eq!(compose_command("list", &[]), "list");
    }

    #[test]
    fn test_compose_command_with_args() {
        let args = vec!["query".to_string(), "daytime".to_string()];
        assert_eq!(compose_command("time", &args), "time query daytime");
    }

    #[test]
    fn test_compose_command_never_trails_whitespace() {
        // Regressão: algumas versões do servidor rejeitam comando com
        // espaço no fim.
        assert_eq!(compose_command("list ", &[]), "list");
        let args = vec!["a".to_string(), "b ".to_string()];
        assert_eq!(compose_command("cmd", &args), "cmd a b");
        assert!(!compose_command("x", &["y".to_string()]).ends_with(' '));
    }

    #[test]
    fn test_entity_name_is_deterministic_and_marked() {
        let a = test_entity_name("z1");
        let b = test_entity_name("z1");
        assert_eq!(a, b);
        assert!(a.starts_with("qa_z1_"));
        assert_eq!(a.len(), "qa_z1_".len() + 8);

        // Nomes locais diferentes produzem nomes de mundo diferentes.
        assert_ne!(test_entity_name("z1"), test_entity_name("z2"));
    }

    #[test]
    fn test_entity_selector_uses_distance_predicate() {
        let sel = entity_selector("qa_z1_aabbccdd");
        assert!(sel.contains("distance=..10000"));
        assert!(!sel.contains("r="), "forma legada de raio é proibida");
    }

    #[test]
    fn test_parse_world_time_bare_integer() {
        assert_eq!(parse_world_time("13000").unwrap(), 13000);
    }

    #[test]
    fn test_parse_world_time_sentence() {
        assert_eq!(parse_world_time("The time is 13000").unwrap(), 13000);
    }

    #[test]
    fn test_parse_world_time_no_integer_is_protocol_error() {
        let err = parse_world_time("no numbers here").unwrap_err();
        assert!(matches!(err, BackendError::Protocol(_)));
        let err = parse_world_time("").unwrap_err();
        assert!(matches!(err, BackendError::Protocol(_)));
    }

    #[test]
    fn test_parse_first_float() {
        assert_eq!(
            parse_first_float("z1 has the following entity data: 20.0f"),
            Some(20.0)
        );
        assert_eq!(parse_first_float("Health set to 7.5"), Some(7.5));
        assert_eq!(parse_first_float("-3.25 damage"), Some(-3.25));
        assert_eq!(parse_first_float("nada"), None);
    }

    #[test]
    fn test_factory_console() {
        let config = BackendConfig {
            kind: BackendKind::Console,
            console_addr: "127.0.0.1:25575".to_string(),
            console_password: "x".to_string(),
            read_timeout: Duration::from_secs(5),
            bridge_url: None,
            reconnect: ReconnectPolicy::default(),
        };
        let backend = create_backend(&config, LogStream::new(), LogStream::new()).unwrap();
        assert_eq!(backend.backend_type(), "console");
    }

    #[test]
    fn test_factory_playersim_requires_bridge_url() {
        let config = BackendConfig {
            kind: BackendKind::PlayerSim,
            console_addr: "127.0.0.1:25575".to_string(),
            console_password: "x".to_string(),
            read_timeout: Duration::from_secs(5),
            bridge_url: None,
            reconnect: ReconnectPolicy::default(),
        };
        let err = match create_backend(&config, LogStream::new(), LogStream::new()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.to_string().contains("bridge"));
    }

    #[test]
    fn test_factory_empty_console_addr_rejected() {
        let config = BackendConfig {
            kind: BackendKind::Console,
            console_addr: "  ".to_string(),
            console_password: "x".to_string(),
            read_timeout: Duration::from_secs(5),
            bridge_url: None,
            reconnect: ReconnectPolicy::default(),
        };
        assert!(create_backend(&config, LogStream::new(), LogStream::new()).is_err());
    }
}
