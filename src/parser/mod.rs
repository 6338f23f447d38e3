//! # Parser de Stories YAML
//!
//! Traduz o texto declarativo de uma story para o modelo executável
//! ([`crate::story`]). A tradução é determinística: o mesmo texto produz
//! sempre a mesma story.
//!
//! ## O que este parser faz?
//!
//! 1. **Parseia** o YAML (via serde_yaml) para uma árvore JSON
//! 2. **Normaliza** os tokens de ação (`Spawn-Entity` → `spawn_entity`)
//! 3. **Valida** campos obrigatórios por tipo de ação
//! 4. **Coage** formatos amigáveis (`duration: "5s"` → 5000 ms)
//! 5. **Despacha** cada mapping para a variante certa da união etiquetada
//!
//! ## Políticas de erro:
//!
//! - Chave desconhecida no topo do arquivo: ERRO (provável typo grave)
//! - Token de ação desconhecido: ERRO, com o token e a posição
//! - Campo desconhecido numa ação: WARNING (preservado, ignorado)
//!
//! ## Tokens legados:
//!
//! `PLAYER_COMMAND` e `SERVER_COMMAND` são aceitos como apelidos de
//! `execute_player_command` / `execute_rcon_command`, com warning de
//! depreciação. Stories antigas continuam rodando.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::story::{
    Action, ActionKind, Assertion, AssertionKind, BackendKind, Comparator, Location, Story,
};

// ============================================================================
// ERRO DE PARSE
// ============================================================================

/// Erro de parse de story. Sempre carrega onde o problema aconteceu.
#[derive(Debug, Error)]
#[error("{location}: {message}")]
pub struct ParseError {
    /// Posição legível: `steps[3]`, `assertions[0]`, `top-level`.
    pub location: String,
    /// O que deu errado.
    pub message: String,
}

impl ParseError {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// ENTRADA
// ============================================================================

/// Chaves aceitas no topo de uma story.
const TOP_LEVEL_KEYS: &[&str] = &[
    "name",
    "description",
    "backend",
    "setup",
    "steps",
    "assertions",
    "cleanup",
];

/// Parseia o texto YAML de uma story completa.
pub fn parse_story(text: &str) -> Result<Story, ParseError> {
    // serde_yaml entrega direto uma árvore serde_json::Value; a partir
    // daqui o parser só navega JSON.
    let doc: Value = serde_yaml::from_str(text)
        .map_err(|e| ParseError::new("top-level", format!("YAML inválido: {}", e)))?;

    let root = doc
        .as_object()
        .ok_or_else(|| ParseError::new("top-level", "story deve ser um mapping YAML"))?;

    for key in root.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            return Err(ParseError::new(
                "top-level",
                format!("chave desconhecida '{}'", key),
            ));
        }
    }

    let name = root
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::new("top-level", "campo obrigatório 'name' ausente"))?
        .to_string();

    let description = root
        .get("description")
        .and_then(Value::as_str)
        .map(String::from);

    let backend = match root.get("backend") {
        None => BackendKind::default(),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "console" => BackendKind::Console,
            "playersim" | "player_sim" | "player-sim" => BackendKind::PlayerSim,
            other => {
                return Err(ParseError::new(
                    "top-level",
                    format!("backend desconhecido '{}' (use console ou playersim)", other),
                ))
            }
        },
        Some(other) => {
            return Err(ParseError::new(
                "top-level",
                format!("backend deve ser string, recebeu: {}", other),
            ))
        }
    };

    let setup = parse_action_section(root.get("setup"), "setup")?;
    let steps = parse_action_section(root.get("steps"), "steps")?;
    let cleanup = parse_action_section(root.get("cleanup"), "cleanup")?;
    let assertions = parse_assertion_section(root.get("assertions"))?;

    Ok(Story {
        name,
        description,
        backend,
        setup,
        steps,
        assertions,
        cleanup,
    })
}

// ============================================================================
// SEÇÕES
// ============================================================================

fn parse_action_section(node: Option<&Value>, section: &str) -> Result<Vec<Action>, ParseError> {
    let Some(node) = node else {
        return Ok(Vec::new()); // seção ausente = vazia = legal
    };
    if node.is_null() {
        return Ok(Vec::new());
    }
    let items = node.as_array().ok_or_else(|| {
        ParseError::new(section, "seção deve ser uma sequência de ações")
    })?;

    let mut actions = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let location = format!("{}[{}]", section, index);
        actions.push(parse_action(item, &location)?);
    }
    Ok(actions)
}

fn parse_assertion_section(node: Option<&Value>) -> Result<Vec<Assertion>, ParseError> {
    let Some(node) = node else {
        return Ok(Vec::new());
    };
    if node.is_null() {
        return Ok(Vec::new());
    }
    let items = node
        .as_array()
        .ok_or_else(|| ParseError::new("assertions", "seção deve ser uma sequência"))?;

    let mut assertions = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let location = format!("assertions[{}]", index);
        let fields = Fields::from_node(item, &location)?;
        let token = fields.token()?;
        let kind = parse_assertion_kind(&token, &fields)?.ok_or_else(|| {
            ParseError::new(
                &location,
                format!("'{}' não é uma assertion conhecida", token),
            )
        })?;
        let name = fields.display_name();
        fields.warn_leftovers();
        assertions.push(Assertion { name, kind });
    }
    Ok(assertions)
}

// ============================================================================
// UMA AÇÃO
// ============================================================================

fn parse_action(node: &Value, location: &str) -> Result<Action, ParseError> {
    let fields = Fields::from_node(node, location)?;
    let token = fields.token()?;

    // Assertions também podem aparecer no meio dos steps.
    if let Some(assert_kind) = parse_assertion_kind(&token, &fields)? {
        let mut action = envelope(&fields, ActionKind::Assert(assert_kind));
        // Assertions embutidas falham o step por padrão.
        action.fail_on_error = action.fail_on_error.or(Some(true));
        fields.warn_leftovers();
        return Ok(action);
    }

    let kind = parse_action_kind(&token, &fields)?;
    let action = envelope(&fields, kind);
    fields.warn_leftovers();
    Ok(action)
}

/// Monta o envelope (campos transversais) em volta do payload.
fn envelope(fields: &Fields, kind: ActionKind) -> Action {
    Action {
        name: fields.display_name(),
        id: fields.opt_str("id"),
        store_as: fields.opt_str("storeAs"),
        expect: fields.opt_str("expect"),
        expect_contains: fields.opt_str("expectContains"),
        expect_matches: fields.opt_str("expectMatches"),
        expect_not_contains: fields.opt_str("expectNotContains"),
        fail_on_error: fields.opt_bool("failOnError"),
        extra: fields.leftovers(),
        kind,
    }
}

/// Despacho do token normalizado para a variante da união etiquetada.
fn parse_action_kind(token: &str, f: &Fields) -> Result<ActionKind, ParseError> {
    let kind = match token {
        "execute_rcon_command" => ActionKind::ExecuteRconCommand {
            command: f.req_str("command")?,
            args: f.str_list("args")?,
        },
        "execute_rcon_with_capture" => ActionKind::ExecuteRconWithCapture {
            command: f.req_str("command")?,
            args: f.str_list("args")?,
        },
        "execute_rcon_raw" => ActionKind::ExecuteRconRaw {
            command: f.req_str("command")?,
        },
        "make_operator" => ActionKind::MakeOperator { player: f.req_str("player")? },
        "give_item" => ActionKind::GiveItem {
            player: f.req_str("player")?,
            item: f.req_str("item")?,
            count: f.count()?,
        },
        "remove_item" => ActionKind::RemoveItem {
            player: f.req_str("player")?,
            item: f.req_str("item")?,
            count: f.count()?,
        },
        "clear_inventory" => ActionKind::ClearInventory { player: f.req_str("player")? },
        "set_spawn_point" => ActionKind::SetSpawnPoint {
            player: f.req_str("player")?,
            location: f.location()?,
        },
        "teleport_player" => ActionKind::TeleportPlayer {
            player: f.req_str("player")?,
            location: f.location()?,
        },
        "gamemode_change" => ActionKind::GamemodeChange {
            player: f.req_str("player")?,
            value: f.req_str("value")?,
        },
        "kill_player" => ActionKind::KillPlayer { player: f.req_str("player")? },
        "heal_player" => ActionKind::HealPlayer { player: f.req_str("player")? },
        "set_player_health" => ActionKind::SetPlayerHealth {
            player: f.req_str("player")?,
            value: f.req_f64("value")?,
        },
        "spawn_entity" => ActionKind::SpawnEntity {
            entity: f
                .opt_str("entity")
                .or_else(|| f.opt_str("name"))
                .ok_or_else(|| f.missing("entity"))?,
            entity_type: f.req_str("entityType")?,
            location: f.location()?,
            equipment: f.string_map("equipment"),
        },
        "kill_entity" => ActionKind::KillEntity { entity: f.req_str("entity")? },
        "set_entity_health" => ActionKind::SetEntityHealth {
            entity: f.req_str("entity")?,
            value: f.req_f64("value")?,
        },
        "get_entity_health" => ActionKind::GetEntityHealth { entity: f.req_str("entity")? },
        "damage_entity" => ActionKind::DamageEntity {
            entity: f.req_str("entity")?,
            value: f.req_f64("value")?,
        },
        "remove_entities" => ActionKind::RemoveEntities {
            entity_type: f.opt_str("entityType"),
        },
        "set_weather" => ActionKind::SetWeather {
            weather: f.req_str("weather")?,
            duration: f.opt_u64("duration")?,
        },
        "set_time" => ActionKind::SetTime { value: f.req_i64("value")? },
        "get_world_time" => ActionKind::GetWorldTime,
        "get_weather" => ActionKind::GetWeather,

        "connect_player" => ActionKind::ConnectPlayer { player: f.req_str("player")? },
        "disconnect_player" => ActionKind::DisconnectPlayer { player: f.req_str("player")? },
        "send_chat_message" => ActionKind::SendChatMessage {
            player: f.req_str("player")?,
            message: f.req_str("message")?,
        },
        "execute_player_command" => ActionKind::ExecutePlayerCommand {
            player: f.req_str("player")?,
            command: f.req_str("command")?,
        },
        "execute_player_raw" => ActionKind::ExecutePlayerRaw {
            player: f.req_str("player")?,
            command: f.req_str("command")?,
        },
        "move_player" => ActionKind::MovePlayer {
            player: f.req_str("player")?,
            location: f.location()?,
        },
        "equip_item" => ActionKind::EquipItem {
            player: f.req_str("player")?,
            item: f.req_str("item")?,
            slot: f.opt_str("slot"),
        },
        "get_player_position" => ActionKind::GetPlayerPosition { player: f.req_str("player")? },
        "get_player_health" => ActionKind::GetPlayerHealth { player: f.req_str("player")? },
        "get_player_inventory" => ActionKind::GetPlayerInventory { player: f.req_str("player")? },
        "get_player_equipment" => ActionKind::GetPlayerEquipment { player: f.req_str("player")? },
        "get_entities" => ActionKind::GetEntities { player: f.req_str("player")? },
        "get_entities_in_view" => ActionKind::GetEntitiesInView { player: f.req_str("player")? },
        "get_entity_by_name" => ActionKind::GetEntityByName {
            player: f.req_str("player")?,
            entity: f.req_str("entity")?,
        },

        "wait" => ActionKind::Wait {
            duration_ms: f.opt_duration_ms("duration")?.unwrap_or(0),
        },
        "wait_for_entity_spawn" => ActionKind::WaitForEntitySpawn {
            entity: f.req_str("entity")?,
            timeout_ms: f.wait_timeout_ms()?,
        },
        "wait_for_chat_message" => ActionKind::WaitForChatMessage {
            pattern: f.req_str("pattern")?,
            timeout_ms: f.wait_timeout_ms()?,
        },
        "check_service_health" => ActionKind::CheckServiceHealth,

        "store_state" => ActionKind::StoreState {
            value: f
                .raw("value")
                .or_else(|| f.raw("source"))
                .ok_or_else(|| f.missing("value"))?,
        },
        "print_stored_state" => ActionKind::PrintStoredState {
            source_variable: f.req_str("sourceVariable")?,
        },
        "compare_states" => ActionKind::CompareStates {
            state1: f.req_str("state1")?,
            state2: f.req_str("state2")?,
        },
        "print_state_comparison" => ActionKind::PrintStateComparison {
            state1: f.req_str("state1")?,
            state2: f.req_str("state2")?,
        },
        "extract_with_jsonpath" => ActionKind::ExtractWithJsonpath {
            source_variable: f.req_str("sourceVariable")?,
            json_path: f.req_str("jsonPath")?,
        },
        "filter_entities" => ActionKind::FilterEntities {
            source_variable: f.req_str("sourceVariable")?,
            filter_type: f.req_str("filterType")?,
            filter_value: f.req_str("filterValue")?,
        },

        other => {
            return Err(ParseError::new(
                &f.location,
                format!("ação desconhecida '{}'", other),
            ))
        }
    };
    Ok(kind)
}

/// Tokens de assertion. Retorna `Ok(None)` quando o token não é uma
/// assertion (o chamador tenta as ações normais).
fn parse_assertion_kind(token: &str, f: &Fields) -> Result<Option<AssertionKind>, ParseError> {
    let kind = match token {
        "entity_health" => AssertionKind::EntityHealth {
            entity: f.req_str("entity")?,
            condition: f.comparator()?,
            value: f.req_f64("value")?,
        },
        "entity_exists" | "assert_entity_exists" => AssertionKind::EntityExists {
            entity: f.req_str("entity")?,
            expected: f.opt_bool("expected").unwrap_or(true),
        },
        "assert_entity_missing" => AssertionKind::EntityMissing {
            entity: f.req_str("entity")?,
        },
        "player_inventory" => AssertionKind::PlayerInventory {
            player: f.req_str("player")?,
            item: f.req_str("item")?,
            slot: f.opt_str("slot"),
            expected: f.opt_bool("expected").unwrap_or(true),
        },
        "assert_player_has_item" => AssertionKind::PlayerHasItem {
            player: f.req_str("player")?,
            item: f.req_str("item")?,
        },
        "assert_response_contains" => AssertionKind::ResponseContains {
            source: f.req_str("source")?,
            contains: f.req_str("contains")?,
        },
        "assert_log_contains" => AssertionKind::LogContains {
            contains: f.req_str("contains")?,
        },
        "assert_json_equals" => AssertionKind::JsonEquals {
            source: f.req_str("source")?,
            expected: f
                .raw("expectedJson")
                .or_else(|| f.raw("expected"))
                .ok_or_else(|| f.missing("expectedJson"))?,
        },
        "assert_condition" => AssertionKind::Condition {
            expression: f.req_str("condition")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

// ============================================================================
// NORMALIZAÇÃO DE TOKENS
// ============================================================================

/// Normaliza um token de ação: qualquer caixa, `-` ou `_`.
///
/// `Spawn-Entity` → `spawn_entity`; `EXECUTE_RCON_COMMAND` idem.
fn normalize_token(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('-', "_")
}

/// Apelidos legados ainda aceitos (com warning de depreciação).
fn resolve_alias(token: &str, location: &str) -> String {
    match token {
        "player_command" => {
            warn!(location = %location, "token legado PLAYER_COMMAND: use execute_player_command");
            "execute_player_command".to_string()
        }
        "server_command" => {
            warn!(location = %location, "token legado SERVER_COMMAND: use execute_rcon_command");
            "execute_rcon_command".to_string()
        }
        other => other.to_string(),
    }
}

// ============================================================================
// ACESSO A CAMPOS
// ============================================================================

/// Campos de um mapping de ação, com marcação de consumo.
///
/// Chaves são casadas de forma tolerante (`entityType`, `entity_type` e
/// `entity-type` são o mesmo campo); as que sobrarem sem consumo viram
/// warning e ficam preservadas no envelope.
struct Fields {
    location: String,
    // (chave original, chave normalizada, valor, consumida)
    entries: std::cell::RefCell<Vec<FieldEntry>>,
}

struct FieldEntry {
    original: String,
    normalized: String,
    value: Value,
    consumed: bool,
}

/// `entityType` / `entity_type` / `entity-type` → `entitytype`.
fn normalize_key(key: &str) -> String {
    key.trim()
        .to_ascii_lowercase()
        .replace(['_', '-'], "")
}

impl Fields {
    fn from_node(node: &Value, location: &str) -> Result<Self, ParseError> {
        let map = node.as_object().ok_or_else(|| {
            ParseError::new(location, "cada ação deve ser um mapping com chave 'action'")
        })?;
        let entries = map
            .iter()
            .map(|(k, v)| FieldEntry {
                original: k.clone(),
                normalized: normalize_key(k),
                value: v.clone(),
                consumed: false,
            })
            .collect();
        Ok(Self {
            location: location.to_string(),
            entries: std::cell::RefCell::new(entries),
        })
    }

    /// Token de ação normalizado (e com apelidos resolvidos).
    fn token(&self) -> Result<String, ParseError> {
        let raw = self
            .take("action")
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| ParseError::new(&self.location, "campo 'action' ausente"))?;
        Ok(resolve_alias(&normalize_token(&raw), &self.location))
    }

    /// Consome um campo pelo nome canônico (casamento tolerante).
    fn take(&self, key: &str) -> Option<Value> {
        let wanted = normalize_key(key);
        let mut entries = self.entries.borrow_mut();
        for entry in entries.iter_mut() {
            if entry.normalized == wanted && !entry.consumed {
                entry.consumed = true;
                return Some(entry.value.clone());
            }
        }
        None
    }

    fn missing(&self, key: &str) -> ParseError {
        ParseError::new(
            &self.location,
            format!("campo obrigatório '{}' ausente", key),
        )
    }

    fn raw(&self, key: &str) -> Option<Value> {
        self.take(key)
    }

    fn req_str(&self, key: &str) -> Result<String, ParseError> {
        match self.take(key) {
            Some(Value::String(s)) => Ok(s),
            // Números e bools são aceitos como texto (YAML é flexível).
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => Err(ParseError::new(
                &self.location,
                format!("campo '{}' deve ser escalar, recebeu: {}", key, other),
            )),
            None => Err(self.missing(key)),
        }
    }

    fn opt_str(&self, key: &str) -> Option<String> {
        match self.take(key) {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    fn opt_bool(&self, key: &str) -> Option<bool> {
        match self.take(key) {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn req_f64(&self, key: &str) -> Result<f64, ParseError> {
        match self.take(key) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                ParseError::new(&self.location, format!("campo '{}' não é um número", key))
            }),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                ParseError::new(&self.location, format!("campo '{}' não é um número", key))
            }),
            Some(other) => Err(ParseError::new(
                &self.location,
                format!("campo '{}' deve ser numérico, recebeu: {}", key, other),
            )),
            None => Err(self.missing(key)),
        }
    }

    fn req_i64(&self, key: &str) -> Result<i64, ParseError> {
        let f = self.req_f64(key)?;
        Ok(f as i64)
    }

    fn opt_u64(&self, key: &str) -> Result<Option<u64>, ParseError> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| {
                    ParseError::new(
                        &self.location,
                        format!("campo '{}' deve ser inteiro não-negativo", key),
                    )
                }),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
                ParseError::new(
                    &self.location,
                    format!("campo '{}' deve ser inteiro não-negativo", key),
                )
            }),
            Some(other) => Err(ParseError::new(
                &self.location,
                format!("campo '{}' deve ser inteiro, recebeu: {}", key, other),
            )),
        }
    }

    /// `count`: inteiro não-negativo, padrão 1.
    fn count(&self) -> Result<u32, ParseError> {
        match self.opt_u64("count")? {
            None => Ok(1),
            Some(n) if n <= u32::MAX as u64 => Ok(n as u32),
            Some(n) => Err(ParseError::new(
                &self.location,
                format!("count {} grande demais", n),
            )),
        }
    }

    /// `duration`: inteiro em ms, ou string `Nms` | `Ns` | `Nm`.
    fn opt_duration_ms(&self, key: &str) -> Result<Option<u64>, ParseError> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                ParseError::new(
                    &self.location,
                    format!("campo '{}' deve ser ms inteiro não-negativo", key),
                )
            }),
            Some(Value::String(s)) => parse_duration_str(&s)
                .map(Some)
                .ok_or_else(|| {
                    ParseError::new(
                        &self.location,
                        format!("duração inválida '{}' (use ms, Nms, Ns ou Nm)", s),
                    )
                }),
            Some(other) => Err(ParseError::new(
                &self.location,
                format!("campo '{}' deve ser duração, recebeu: {}", key, other),
            )),
        }
    }

    /// Timeout de ações de espera: aceita `timeout` ou `duration`.
    fn wait_timeout_ms(&self) -> Result<Option<u64>, ParseError> {
        if let Some(ms) = self.opt_duration_ms("timeout")? {
            return Ok(Some(ms));
        }
        self.opt_duration_ms("duration")
    }

    /// `location`: sequência de exatamente 3 números.
    fn location(&self) -> Result<Location, ParseError> {
        let node = self.take("location").ok_or_else(|| self.missing("location"))?;
        let items = node.as_array().ok_or_else(|| {
            ParseError::new(&self.location, "location deve ser uma sequência [x, y, z]")
        })?;
        if items.len() != 3 {
            return Err(ParseError::new(
                &self.location,
                format!("location deve ter 3 coordenadas, tem {}", items.len()),
            ));
        }
        let coord = |v: &Value| -> Option<f64> { v.as_f64() };
        match (coord(&items[0]), coord(&items[1]), coord(&items[2])) {
            (Some(x), Some(y), Some(z)) => Ok(Location { x, y, z }),
            _ => Err(ParseError::new(
                &self.location,
                "coordenadas de location devem ser números",
            )),
        }
    }

    /// Lista de strings (args de comando). Números viram texto.
    fn str_list(&self, key: &str) -> Result<Vec<String>, ParseError> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s),
                        Value::Number(n) => out.push(n.to_string()),
                        Value::Bool(b) => out.push(b.to_string()),
                        other => {
                            return Err(ParseError::new(
                                &self.location,
                                format!("'{}' deve conter escalares, recebeu: {}", key, other),
                            ))
                        }
                    }
                }
                Ok(out)
            }
            Some(other) => Err(ParseError::new(
                &self.location,
                format!("campo '{}' deve ser sequência, recebeu: {}", key, other),
            )),
        }
    }

    /// Mapa string→string (equipamento de spawn).
    fn string_map(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let node = self.take(key)?;
        let map = node.as_object()?;
        let mut out = BTreeMap::new();
        for (k, v) in map {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(k.clone(), s);
        }
        Some(out)
    }

    /// `condition` de entity_health: EQ/NE/LT/LE/GT/GE.
    fn comparator(&self) -> Result<Comparator, ParseError> {
        let raw = self.req_str("condition")?;
        Comparator::parse(&raw).ok_or_else(|| {
            ParseError::new(
                &self.location,
                format!("condição '{}' inválida (use EQ, NE, LT, LE, GT, GE)", raw),
            )
        })
    }

    /// Nome de exibição: o campo `name` que sobrou (spawn_entity consome
    /// `name` como nome da entidade antes de chegar aqui).
    fn display_name(&self) -> Option<String> {
        self.opt_str("name")
    }

    /// Campos nunca consumidos: warning + preservação.
    fn warn_leftovers(&self) {
        for entry in self.entries.borrow().iter() {
            if !entry.consumed {
                warn!(
                    location = %self.location,
                    field = %entry.original,
                    "campo desconhecido ignorado"
                );
            }
        }
    }

    fn leftovers(&self) -> BTreeMap<String, Value> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| !e.consumed)
            .map(|e| (e.original.clone(), e.value.clone()))
            .collect()
    }
}

/// `"500ms"` → 500; `"5s"` → 5000; `"2m"` → 120000.
fn parse_duration_str(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("ms") {
        return n.trim().parse().ok();
    }
    if let Some(n) = s.strip_suffix('s') {
        return n.trim().parse::<u64>().ok().map(|v| v * 1000);
    }
    if let Some(n) = s.strip_suffix('m') {
        return n.trim().parse::<u64>().ok().map(|v| v * 60_000);
    }
    s.parse().ok()
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_story() {
        let story = parse_story("name: vazia\n").unwrap();
        assert_eq!(story.name, "vazia");
        assert_eq!(story.backend, BackendKind::Console);
        assert!(story.setup.is_empty());
        assert!(story.steps.is_empty());
        assert!(story.assertions.is_empty());
        assert!(story.cleanup.is_empty());
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let err = parse_story("description: sem nome\n").unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_unknown_top_level_key_is_error() {
        let err = parse_story("name: x\nstepz: []\n").unwrap_err();
        assert!(err.to_string().contains("stepz"));
    }

    #[test]
    fn test_backend_selection() {
        let story = parse_story("name: x\nbackend: playersim\n").unwrap();
        assert_eq!(story.backend, BackendKind::PlayerSim);

        let err = parse_story("name: x\nbackend: telnet\n").unwrap_err();
        assert!(err.to_string().contains("telnet"));
    }

    #[test]
    fn test_rcon_command_with_args() {
        let yaml = r#"
name: lista
steps:
  - action: execute_rcon_command
    command: list
"#;
        let story = parse_story(yaml).unwrap();
        match &story.steps[0].kind {
            ActionKind::ExecuteRconCommand { command, args } => {
                assert_eq!(command, "list");
                assert!(args.is_empty());
            }
            other => panic!("kind inesperado: {:?}", other),
        }
    }

    #[test]
    fn test_token_normalization_any_case_and_separator() {
        let yaml = "name: x\nsteps:\n  - action: Execute-Rcon-Command\n    command: list\n";
        let story = parse_story(yaml).unwrap();
        assert_eq!(story.steps[0].kind.token(), "execute_rcon_command");
    }

    #[test]
    fn test_unknown_action_token_is_error() {
        let yaml = "name: x\nsteps:\n  - action: fly_to_moon\n";
        let err = parse_story(yaml).unwrap_err();
        assert!(err.to_string().contains("fly_to_moon"));
        assert!(err.to_string().contains("steps[0]"));
    }

    #[test]
    fn test_legacy_aliases() {
        let yaml = r#"
name: legado
steps:
  - action: SERVER_COMMAND
    command: list
  - action: PLAYER_COMMAND
    player: p1
    command: /home
"#;
        let story = parse_story(yaml).unwrap();
        assert_eq!(story.steps[0].kind.token(), "execute_rcon_command");
        assert_eq!(story.steps[1].kind.token(), "execute_player_command");
    }

    #[test]
    fn test_spawn_entity_required_fields() {
        let yaml = r#"
name: spawn
setup:
  - action: spawn_entity
    entityType: minecraft:zombie
    location: [100, 64, 100]
    name: z1
"#;
        let story = parse_story(yaml).unwrap();
        match &story.setup[0].kind {
            ActionKind::SpawnEntity { entity, entity_type, location, .. } => {
                assert_eq!(entity, "z1");
                assert_eq!(entity_type, "minecraft:zombie");
                assert_eq!(location.y, 64.0);
            }
            other => panic!("kind inesperado: {:?}", other),
        }

        let missing = r#"
name: spawn
setup:
  - action: spawn_entity
    name: z1
    location: [0, 64, 0]
"#;
        let err = parse_story(missing).unwrap_err();
        assert!(err.to_string().contains("entityType"));
    }

    #[test]
    fn test_compare_states_requires_both_operands() {
        let yaml = "name: x\nsteps:\n  - action: compare_states\n    state1: a\n";
        let err = parse_story(yaml).unwrap_err();
        assert!(err.to_string().contains("state2"));
    }

    #[test]
    fn test_duration_coercions() {
        assert_eq!(parse_duration_str("500ms"), Some(500));
        assert_eq!(parse_duration_str("5s"), Some(5000));
        assert_eq!(parse_duration_str("2m"), Some(120_000));
        assert_eq!(parse_duration_str("750"), Some(750));
        assert_eq!(parse_duration_str("abc"), None);

        let yaml = "name: x\nsteps:\n  - action: wait\n    duration: 2s\n";
        let story = parse_story(yaml).unwrap();
        assert!(matches!(story.steps[0].kind, ActionKind::Wait { duration_ms: 2000 }));
    }

    #[test]
    fn test_wait_accepts_timeout_or_duration() {
        let yaml = r#"
name: x
steps:
  - action: wait_for_chat_message
    pattern: ".*never.*"
    duration: 500
"#;
        let story = parse_story(yaml).unwrap();
        match &story.steps[0].kind {
            ActionKind::WaitForChatMessage { timeout_ms, .. } => {
                assert_eq!(*timeout_ms, Some(500))
            }
            other => panic!("kind inesperado: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_fields() {
        let yaml = r#"
name: x
steps:
  - action: get_player_inventory
    player: tester
    id: inv1
    storeAs: inv_before
    expectContains: diamond
    failOnError: true
"#;
        let story = parse_story(yaml).unwrap();
        let action = &story.steps[0];
        assert_eq!(action.id.as_deref(), Some("inv1"));
        assert_eq!(action.store_as.as_deref(), Some("inv_before"));
        assert_eq!(action.expect_contains.as_deref(), Some("diamond"));
        assert_eq!(action.fail_on_error, Some(true));
    }

    #[test]
    fn test_snake_case_field_keys_accepted() {
        let yaml = r#"
name: x
steps:
  - action: extract_with_jsonpath
    source_variable: inv
    json_path: "$.items[0].id"
    store_as: primeiro_item
"#;
        let story = parse_story(yaml).unwrap();
        match &story.steps[0].kind {
            ActionKind::ExtractWithJsonpath { source_variable, json_path } => {
                assert_eq!(source_variable, "inv");
                assert_eq!(json_path, "$.items[0].id");
            }
            other => panic!("kind inesperado: {:?}", other),
        }
        assert_eq!(story.steps[0].store_as.as_deref(), Some("primeiro_item"));
    }

    #[test]
    fn test_unknown_action_field_is_preserved_not_fatal() {
        let yaml = r#"
name: x
steps:
  - action: get_world_time
    velocidade: warp
"#;
        let story = parse_story(yaml).unwrap();
        assert!(story.steps[0].extra.contains_key("velocidade"));
    }

    #[test]
    fn test_assertion_section() {
        let yaml = r#"
name: x
assertions:
  - action: entity_health
    entity: z1
    condition: GE
    value: 10
  - action: assert_log_contains
    contains: "joined the game"
"#;
        let story = parse_story(yaml).unwrap();
        assert_eq!(story.assertions.len(), 2);
        match &story.assertions[0].kind {
            AssertionKind::EntityHealth { condition, value, .. } => {
                assert_eq!(*condition, Comparator::Ge);
                assert_eq!(*value, 10.0);
            }
            other => panic!("kind inesperado: {:?}", other),
        }
    }

    #[test]
    fn test_non_assertion_in_assertion_section_is_error() {
        let yaml = "name: x\nassertions:\n  - action: get_world_time\n";
        let err = parse_story(yaml).unwrap_err();
        assert!(err.to_string().contains("assertion"));
    }

    #[test]
    fn test_assert_inside_steps() {
        let yaml = r#"
name: x
steps:
  - action: assert_response_contains
    source: "${resp}"
    contains: world
"#;
        let story = parse_story(yaml).unwrap();
        match &story.steps[0].kind {
            ActionKind::Assert(AssertionKind::ResponseContains { contains, .. }) => {
                assert_eq!(contains, "world");
            }
            other => panic!("kind inesperado: {:?}", other),
        }
        // Assertion embutida falha o step por padrão.
        assert_eq!(story.steps[0].fail_on_error, Some(true));
    }

    #[test]
    fn test_count_default_and_negative() {
        let yaml = "name: x\nsteps:\n  - action: give_item\n    player: p\n    item: stone\n";
        let story = parse_story(yaml).unwrap();
        assert!(matches!(story.steps[0].kind, ActionKind::GiveItem { count: 1, .. }));

        let neg = "name: x\nsteps:\n  - action: give_item\n    player: p\n    item: stone\n    count: -2\n";
        assert!(parse_story(neg).is_err());
    }

    #[test]
    fn test_location_wrong_arity() {
        let yaml = "name: x\nsteps:\n  - action: teleport_player\n    player: p\n    location: [1, 2]\n";
        let err = parse_story(yaml).unwrap_err();
        assert!(err.to_string().contains("3 coordenadas"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = parse_story("name: [unterminated\n").unwrap_err();
        assert!(err.to_string().contains("YAML"));
    }
}
