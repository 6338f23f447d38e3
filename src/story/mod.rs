//! # Módulo de Story - Estruturas de Dados
//!
//! Este módulo define todas as **estruturas de dados** que representam uma
//! story: o cenário declarativo de teste de integração que o orquestrador
//! executa contra um servidor de Minecraft vivo.
//!
//! ## O que é uma Story?
//!
//! Uma story é o "roteiro" que o operador escreve em YAML e o runner
//! interpreta. Ela descreve:
//! - **Setup**: preparação do mundo (spawnar entidades, dar itens, operar)
//! - **Steps**: a sequência de ações sob teste
//! - **Assertions**: o que deve ser verdade ao final
//! - **Cleanup**: desfazer tudo (roda SEMPRE, mesmo com falha)
//!
//! ## Estrutura de uma Story:
//!
//! ```yaml
//! name: "Zumbi toma dano de espada"
//! backend: playersim
//! setup:
//!   - action: spawn_entity
//!     entityType: minecraft:zombie
//!     location: [100, 64, 100]
//!     entity: z1
//! steps:
//!   - action: get_entity_health
//!     entity: z1
//!     storeAs: hp_before
//! assertions:
//!   - action: assert_entity_exists
//!     entity: z1
//! cleanup:
//!   - action: remove_entities
//! ```
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! Story
//! ├── Action[]    (setup, steps, cleanup)
//! │   └── ActionKind   (união etiquetada: payload por tipo de ação)
//! ├── Assertion[] (assertions)
//! │   └── AssertionKind
//! └── TestResult  (produzido após a execução)
//! ```
//!
//! Tudo aqui é dado puro: nenhum comportamento além de helpers de leitura.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// BACKEND ALVO
// ============================================================================

/// Qual backend a story exige.
///
/// `console` fala apenas com o console de administração; `playersim`
/// adiciona jogadores simulados via bridge HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Apenas console de administração (TCP framed).
    #[default]
    Console,
    /// Console + bridge de simulação de jogadores.
    #[serde(rename = "playersim")]
    PlayerSim,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Console => "console",
            BackendKind::PlayerSim => "playersim",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STORY
// ============================================================================

/// Um cenário de teste completo, com as quatro seções ordenadas.
///
/// Criada pelo parser, consumida por UMA execução do orquestrador,
/// depois descartada. Não existe estado entre stories.
#[derive(Debug, Clone, Serialize)]
pub struct Story {
    /// Nome legível da story (obrigatório).
    pub name: String,

    /// Descrição opcional, aparece nos relatórios.
    pub description: Option<String>,

    /// Backend alvo. Padrão: `console`.
    pub backend: BackendKind,

    /// Ações de preparação. Pode ser vazio.
    pub setup: Vec<Action>,

    /// Ações sob teste. Pode ser vazio.
    pub steps: Vec<Action>,

    /// Verificações finais. Pode ser vazio.
    pub assertions: Vec<Assertion>,

    /// Ações de limpeza. Rodam SEMPRE, mesmo após falhas.
    pub cleanup: Vec<Action>,
}

// ============================================================================
// LOCALIZAÇÃO NO MUNDO
// ============================================================================

/// Posição tridimensional no mundo do jogo.
///
/// No YAML é uma sequência de 3 números: `location: [100, 64, 100]`.
/// Valores fora dos limites do mundo são repassados como estão; quem
/// decide aceitar é o servidor, não o orquestrador.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

// ============================================================================
// COMPARADORES
// ============================================================================

/// Operador de comparação usado em assertions numéricas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    /// Interpreta o token do YAML (`EQ`, `NE`, ...) ou a forma simbólica.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "EQ" | "==" | "=" => Some(Comparator::Eq),
            "NE" | "!=" | "<>" => Some(Comparator::Ne),
            "LT" | "<" => Some(Comparator::Lt),
            "LE" | "<=" => Some(Comparator::Le),
            "GT" | ">" => Some(Comparator::Gt),
            "GE" | ">=" => Some(Comparator::Ge),
            _ => None,
        }
    }

    /// Avalia a comparação entre dois floats.
    ///
    /// EQ usa tolerância de 1e-3: vida de entidade vem do servidor como
    /// float e raramente é exata.
    pub fn eval_f64(self, actual: f64, expected: f64) -> bool {
        match self {
            Comparator::Eq => (actual - expected).abs() < 1e-3,
            Comparator::Ne => (actual - expected).abs() >= 1e-3,
            Comparator::Lt => actual < expected,
            Comparator::Le => actual <= expected,
            Comparator::Gt => actual > expected,
            Comparator::Ge => actual >= expected,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// AÇÃO (ENVELOPE + UNIÃO ETIQUETADA)
// ============================================================================

/// Uma ação: o envelope carrega os campos transversais, o `kind` carrega
/// apenas os campos que aquele tipo de ação realmente usa.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    /// Nome de exibição opcional (usado em relatórios).
    pub name: Option<String>,

    /// Step-id opcional: chave no step-output store.
    pub id: Option<String>,

    /// Variável onde gravar o resultado após sucesso.
    pub store_as: Option<String>,

    /// Validador: resultado deve ser exatamente igual.
    pub expect: Option<String>,

    /// Validador: resultado deve conter a substring.
    pub expect_contains: Option<String>,

    /// Validador: resultado deve casar com a regex.
    pub expect_matches: Option<String>,

    /// Validador: resultado NÃO deve conter a substring.
    pub expect_not_contains: Option<String>,

    /// Se true, falha da ação interrompe as seções setup/steps.
    /// Padrão: false para steps, true para assertions.
    pub fail_on_error: Option<bool>,

    /// Campos desconhecidos preservados do YAML (gerar warning, ignorar).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,

    /// O payload específico do tipo de ação.
    pub kind: ActionKind,
}

impl Action {
    /// Envelope vazio em volta de um kind. Usado por testes e pelo parser.
    pub fn of(kind: ActionKind) -> Self {
        Self {
            name: None,
            id: None,
            store_as: None,
            expect: None,
            expect_contains: None,
            expect_matches: None,
            expect_not_contains: None,
            fail_on_error: None,
            extra: BTreeMap::new(),
            kind,
        }
    }

    /// Nome usado nos relatórios: o display name, ou o token canônico.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.token().to_string())
    }

    /// Se algum validador `expect*` está presente.
    pub fn has_validators(&self) -> bool {
        self.expect.is_some()
            || self.expect_contains.is_some()
            || self.expect_matches.is_some()
            || self.expect_not_contains.is_some()
    }
}

/// União etiquetada dos tipos de ação. O conjunto é fechado: o parser
/// rejeita tokens fora desta lista.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    // ------------------------------------------------------------------
    // Plano do servidor (console de administração)
    // ------------------------------------------------------------------
    ExecuteRconCommand { command: String, args: Vec<String> },
    ExecuteRconWithCapture { command: String, args: Vec<String> },
    ExecuteRconRaw { command: String },
    MakeOperator { player: String },
    GiveItem { player: String, item: String, count: u32 },
    RemoveItem { player: String, item: String, count: u32 },
    ClearInventory { player: String },
    SetSpawnPoint { player: String, location: Location },
    TeleportPlayer { player: String, location: Location },
    GamemodeChange { player: String, value: String },
    KillPlayer { player: String },
    HealPlayer { player: String },
    SetPlayerHealth { player: String, value: f64 },
    SpawnEntity {
        entity: String,
        entity_type: String,
        location: Location,
        equipment: Option<BTreeMap<String, String>>,
    },
    KillEntity { entity: String },
    SetEntityHealth { entity: String, value: f64 },
    GetEntityHealth { entity: String },
    DamageEntity { entity: String, value: f64 },
    RemoveEntities { entity_type: Option<String> },
    SetWeather { weather: String, duration: Option<u64> },
    SetTime { value: i64 },
    GetWorldTime,
    GetWeather,

    // ------------------------------------------------------------------
    // Plano do cliente (jogadores simulados via bridge)
    // ------------------------------------------------------------------
    ConnectPlayer { player: String },
    DisconnectPlayer { player: String },
    SendChatMessage { player: String, message: String },
    ExecutePlayerCommand { player: String, command: String },
    ExecutePlayerRaw { player: String, command: String },
    MovePlayer { player: String, location: Location },
    EquipItem { player: String, item: String, slot: Option<String> },
    GetPlayerPosition { player: String },
    GetPlayerHealth { player: String },
    GetPlayerInventory { player: String },
    GetPlayerEquipment { player: String },
    GetEntities { player: String },
    GetEntitiesInView { player: String },
    GetEntityByName { player: String, entity: String },

    // ------------------------------------------------------------------
    // Esperas
    // ------------------------------------------------------------------
    Wait { duration_ms: u64 },
    WaitForEntitySpawn { entity: String, timeout_ms: Option<u64> },
    WaitForChatMessage { pattern: String, timeout_ms: Option<u64> },
    CheckServiceHealth,

    // ------------------------------------------------------------------
    // Estado e dados
    // ------------------------------------------------------------------
    StoreState { value: Value },
    PrintStoredState { source_variable: String },
    CompareStates { state1: String, state2: String },
    PrintStateComparison { state1: String, state2: String },
    ExtractWithJsonpath { source_variable: String, json_path: String },
    FilterEntities {
        source_variable: String,
        filter_type: String,
        filter_value: String,
    },

    // ------------------------------------------------------------------
    // Assertions embutidas em steps
    // ------------------------------------------------------------------
    Assert(AssertionKind),
}

impl ActionKind {
    /// Token canônico (lower_snake) desta ação, como aparece no YAML.
    pub fn token(&self) -> &'static str {
        match self {
            ActionKind::ExecuteRconCommand { .. } => "execute_rcon_command",
            ActionKind::ExecuteRconWithCapture { .. } => "execute_rcon_with_capture",
            ActionKind::ExecuteRconRaw { .. } => "execute_rcon_raw",
            ActionKind::MakeOperator { .. } => "make_operator",
            ActionKind::GiveItem { .. } => "give_item",
            ActionKind::RemoveItem { .. } => "remove_item",
            ActionKind::ClearInventory { .. } => "clear_inventory",
            ActionKind::SetSpawnPoint { .. } => "set_spawn_point",
            ActionKind::TeleportPlayer { .. } => "teleport_player",
            ActionKind::GamemodeChange { .. } => "gamemode_change",
            ActionKind::KillPlayer { .. } => "kill_player",
            ActionKind::HealPlayer { .. } => "heal_player",
            ActionKind::SetPlayerHealth { .. } => "set_player_health",
            ActionKind::SpawnEntity { .. } => "spawn_entity",
            ActionKind::KillEntity { .. } => "kill_entity",
            ActionKind::SetEntityHealth { .. } => "set_entity_health",
            ActionKind::GetEntityHealth { .. } => "get_entity_health",
            ActionKind::DamageEntity { .. } => "damage_entity",
            ActionKind::RemoveEntities { .. } => "remove_entities",
            ActionKind::SetWeather { .. } => "set_weather",
            ActionKind::SetTime { .. } => "set_time",
            ActionKind::GetWorldTime => "get_world_time",
            ActionKind::GetWeather => "get_weather",
            ActionKind::ConnectPlayer { .. } => "connect_player",
            ActionKind::DisconnectPlayer { .. } => "disconnect_player",
            ActionKind::SendChatMessage { .. } => "send_chat_message",
            ActionKind::ExecutePlayerCommand { .. } => "execute_player_command",
            ActionKind::ExecutePlayerRaw { .. } => "execute_player_raw",
            ActionKind::MovePlayer { .. } => "move_player",
            ActionKind::EquipItem { .. } => "equip_item",
            ActionKind::GetPlayerPosition { .. } => "get_player_position",
            ActionKind::GetPlayerHealth { .. } => "get_player_health",
            ActionKind::GetPlayerInventory { .. } => "get_player_inventory",
            ActionKind::GetPlayerEquipment { .. } => "get_player_equipment",
            ActionKind::GetEntities { .. } => "get_entities",
            ActionKind::GetEntitiesInView { .. } => "get_entities_in_view",
            ActionKind::GetEntityByName { .. } => "get_entity_by_name",
            ActionKind::Wait { .. } => "wait",
            ActionKind::WaitForEntitySpawn { .. } => "wait_for_entity_spawn",
            ActionKind::WaitForChatMessage { .. } => "wait_for_chat_message",
            ActionKind::CheckServiceHealth => "check_service_health",
            ActionKind::StoreState { .. } => "store_state",
            ActionKind::PrintStoredState { .. } => "print_stored_state",
            ActionKind::CompareStates { .. } => "compare_states",
            ActionKind::PrintStateComparison { .. } => "print_state_comparison",
            ActionKind::ExtractWithJsonpath { .. } => "extract_with_jsonpath",
            ActionKind::FilterEntities { .. } => "filter_entities",
            ActionKind::Assert(kind) => kind.token(),
        }
    }

    /// Canal padrão desta ação nos relatórios.
    pub fn default_channel(&self) -> crate::errors::Channel {
        use crate::errors::Channel;
        match self {
            ActionKind::ExecuteRconCommand { .. }
            | ActionKind::ExecuteRconWithCapture { .. }
            | ActionKind::ExecuteRconRaw { .. }
            | ActionKind::MakeOperator { .. }
            | ActionKind::GiveItem { .. }
            | ActionKind::RemoveItem { .. }
            | ActionKind::ClearInventory { .. }
            | ActionKind::SetSpawnPoint { .. }
            | ActionKind::TeleportPlayer { .. }
            | ActionKind::GamemodeChange { .. }
            | ActionKind::KillPlayer { .. }
            | ActionKind::HealPlayer { .. }
            | ActionKind::SetPlayerHealth { .. }
            | ActionKind::SpawnEntity { .. }
            | ActionKind::KillEntity { .. }
            | ActionKind::SetEntityHealth { .. }
            | ActionKind::GetEntityHealth { .. }
            | ActionKind::DamageEntity { .. }
            | ActionKind::RemoveEntities { .. }
            | ActionKind::SetWeather { .. }
            | ActionKind::SetTime { .. }
            | ActionKind::GetWorldTime
            | ActionKind::GetWeather => Channel::Server,

            ActionKind::ConnectPlayer { .. }
            | ActionKind::DisconnectPlayer { .. }
            | ActionKind::SendChatMessage { .. }
            | ActionKind::ExecutePlayerCommand { .. }
            | ActionKind::ExecutePlayerRaw { .. }
            | ActionKind::MovePlayer { .. }
            | ActionKind::EquipItem { .. }
            | ActionKind::GetPlayerPosition { .. }
            | ActionKind::GetPlayerHealth { .. }
            | ActionKind::GetPlayerInventory { .. }
            | ActionKind::GetPlayerEquipment { .. }
            | ActionKind::GetEntities { .. }
            | ActionKind::GetEntitiesInView { .. }
            | ActionKind::GetEntityByName { .. }
            | ActionKind::WaitForChatMessage { .. }
            | ActionKind::CheckServiceHealth => Channel::Client,

            ActionKind::Wait { .. }
            | ActionKind::WaitForEntitySpawn { .. }
            | ActionKind::StoreState { .. }
            | ActionKind::PrintStoredState { .. }
            | ActionKind::CompareStates { .. }
            | ActionKind::PrintStateComparison { .. }
            | ActionKind::ExtractWithJsonpath { .. }
            | ActionKind::FilterEntities { .. }
            | ActionKind::Assert(_) => Channel::Op,
        }
    }

    /// Qual leitura de estado fazer antes/depois desta ação.
    ///
    /// O orquestrador tira snapshot "antes" e "depois" apenas para o
    /// conjunto pré-declarado de ações que afetam estado observável.
    pub fn state_probe(&self) -> Option<StateProbe> {
        match self {
            ActionKind::GiveItem { player, .. }
            | ActionKind::RemoveItem { player, .. }
            | ActionKind::ClearInventory { player }
            | ActionKind::EquipItem { player, .. } => {
                Some(StateProbe::Inventory(player.clone()))
            }
            ActionKind::TeleportPlayer { player, .. }
            | ActionKind::MovePlayer { player, .. } => {
                Some(StateProbe::Position(player.clone()))
            }
            ActionKind::SetEntityHealth { entity, .. }
            | ActionKind::DamageEntity { entity, .. } => {
                Some(StateProbe::EntityHealth(entity.clone()))
            }
            _ => None,
        }
    }
}

/// O que observar para o snapshot de antes/depois de um step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateProbe {
    /// `get_player_inventory` do jogador.
    Inventory(String),
    /// `get_player_position` do jogador.
    Position(String),
    /// `get_entity_health` da entidade.
    EntityHealth(String),
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Uma verificação booleana avaliada contra o estado observado.
#[derive(Debug, Clone, Serialize)]
pub struct Assertion {
    /// Nome de exibição opcional.
    pub name: Option<String>,

    /// O payload específico do tipo de assertion.
    pub kind: AssertionKind,
}

impl Assertion {
    pub fn of(kind: AssertionKind) -> Self {
        Self { name: None, kind }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.token().to_string())
    }
}

/// União etiquetada dos tipos de assertion suportados.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "assertion", rename_all = "snake_case")]
pub enum AssertionKind {
    EntityHealth {
        entity: String,
        condition: Comparator,
        value: f64,
    },
    EntityExists { entity: String, expected: bool },
    EntityMissing { entity: String },
    PlayerInventory {
        player: String,
        item: String,
        slot: Option<String>,
        expected: bool,
    },
    PlayerHasItem { player: String, item: String },
    ResponseContains { source: String, contains: String },
    LogContains { contains: String },
    JsonEquals { source: String, expected: Value },
    Condition { expression: String },
}

impl AssertionKind {
    /// Token canônico desta assertion.
    pub fn token(&self) -> &'static str {
        match self {
            AssertionKind::EntityHealth { .. } => "entity_health",
            AssertionKind::EntityExists { .. } => "assert_entity_exists",
            AssertionKind::EntityMissing { .. } => "assert_entity_missing",
            AssertionKind::PlayerInventory { .. } => "player_inventory",
            AssertionKind::PlayerHasItem { .. } => "assert_player_has_item",
            AssertionKind::ResponseContains { .. } => "assert_response_contains",
            AssertionKind::LogContains { .. } => "assert_log_contains",
            AssertionKind::JsonEquals { .. } => "assert_json_equals",
            AssertionKind::Condition { .. } => "assert_condition",
        }
    }
}

/// Resultado de uma assertion avaliada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionOutcome {
    /// A assertion passou?
    pub passed: bool,

    /// Mensagem de uma linha (o que foi verificado).
    pub message: String,

    /// Detalhe: valores observados vs. esperados.
    pub details: String,
}

// ============================================================================
// STATUS E RESULTADO
// ============================================================================

/// Status final de um step após execução.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Executou e todos os validadores passaram.
    Passed,
    /// Erro de execução ou validador falhou.
    Failed,
    /// Não executou (seção interrompida por fail_on_error).
    Skipped,
}

/// Resultado consolidado da execução de uma story.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub story_name: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub actions_executed: usize,
    pub assertions_passed: usize,
    pub assertions_failed: usize,
    pub logs: Vec<String>,
    pub assertion_results: Vec<AssertionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
