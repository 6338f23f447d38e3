//! # Cliente HTTP do Bridge de Simulação de Jogadores
//!
//! Fala JSON-sobre-HTTP com o serviço externo que controla jogadores
//! simulados dentro do servidor. O runner nunca executa o runtime do
//! jogador: só conversa com o protocolo de fio do bridge.
//!
//! ## Endpoints (um por operação do plano do cliente):
//!
//! | Método e caminho          | Corpo                    | Resposta                |
//! |---------------------------|--------------------------|-------------------------|
//! | `POST /connect`           | `{username}`             | `{connected, uuid}`     |
//! | `POST /disconnect`        | `{username}`             | `{disconnected}`        |
//! | `POST /chat`              | `{username, message}`    | `{sent, messageId}`     |
//! | `POST /command`           | `{username, command}`    | `{executed, chatMessage}`|
//! | `POST /move`              | `{username, x, y, z}`    | `{x, y, z}`             |
//! | `POST /equip`             | `{username, item, slot}` | `{equipped, slot}`      |
//! | `POST /use`               | `{username, target}`     | `{used}`                |
//! | `GET /position/{user}`    |                          | posição                 |
//! | `GET /health/{user}`      |                          | vida/fome               |
//! | `GET /inventory/{user}`   |                          | inventário              |
//! | `GET /entities/{user}`    |                          | entidades próximas      |
//! | `GET /equipment/{user}`   |                          | equipamento             |
//! | `GET /health`             |                          | liveness `{status:ok}`  |
//!
//! Sucesso é `200` com corpo JSON; erro é `4xx/5xx` com
//! `{error, message}`.
//!
//! ## Guarda de formato:
//!
//! Antes de desserializar, as leituras validam o corpo contra um JSON
//! Schema embutido. Resposta fora do formato é `Protocol`, nunca um
//! pânico de desserialização: o bridge é um processo externo e versões
//! podem divergir.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// ERROS
// ============================================================================

/// Erros do cliente de bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Falha de rede (DNS, conexão, timeout do reqwest).
    #[error("transporte: {0}")]
    Transport(String),

    /// O bridge respondeu, mas com erro ou formato inesperado.
    #[error("protocolo: {0}")]
    Protocol(String),
}

// ============================================================================
// TIPOS DE RESPOSTA
// ============================================================================

/// Posição de um jogador no mundo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub world: String,
}

/// Vida, fome e saturação.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerHealth {
    pub health: f64,
    pub max_health: f64,
    pub food: f64,
    pub saturation: f64,
}

/// Um item de inventário.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub slot: i64,
    pub id: String,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage: Option<i64>,
}

/// Inventário completo de um jogador.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInventory {
    pub items: Vec<InventoryItem>,
    #[serde(default)]
    pub hotbar: Value,
    #[serde(default)]
    pub armor: Value,
    #[serde(default)]
    pub offhand: Value,
    pub size: i64,
}

/// Uma entidade vista pelo jogador.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenEntity {
    pub id: i64,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Entidades próximas, com contagem por tipo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyEntities {
    pub entities: Vec<SeenEntity>,
    pub count: i64,
    pub types: HashMap<String, i64>,
}

/// Equipamento vestido.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerEquipment {
    #[serde(default)]
    pub hand: Value,
    #[serde(default)]
    pub offhand: Value,
    #[serde(default)]
    pub head: Value,
    #[serde(default)]
    pub chest: Value,
    #[serde(default)]
    pub legs: Value,
    #[serde(default)]
    pub feet: Value,
}

// ============================================================================
// SCHEMAS DE GUARDA
// ============================================================================

fn compile(schema: Value) -> JSONSchema {
    JSONSchema::compile(&schema).expect("schema embutido válido")
}

static POSITION_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile(json!({
        "type": "object",
        "required": ["x", "y", "z", "yaw", "pitch", "world"],
        "properties": {
            "x": {"type": "number"},
            "y": {"type": "number"},
            "z": {"type": "number"},
            "yaw": {"type": "number"},
            "pitch": {"type": "number"},
            "world": {"type": "string"}
        }
    }))
});

static HEALTH_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile(json!({
        "type": "object",
        "required": ["health", "maxHealth", "food", "saturation"],
        "properties": {
            "health": {"type": "number"},
            "maxHealth": {"type": "number"},
            "food": {"type": "number"},
            "saturation": {"type": "number"}
        }
    }))
});

static INVENTORY_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile(json!({
        "type": "object",
        "required": ["items", "size"],
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["slot", "id", "count"]
                }
            },
            "size": {"type": "integer"}
        }
    }))
});

static ENTITIES_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile(json!({
        "type": "object",
        "required": ["entities", "count", "types"],
        "properties": {
            "entities": {"type": "array"},
            "count": {"type": "integer"},
            "types": {"type": "object"}
        }
    }))
});

// ============================================================================
// CLIENTE
// ============================================================================

/// Cliente do bridge. O `reqwest::Client` interno mantém o pool de
/// conexões; criar um por operação jogaria o pool fora.
pub struct BridgeClient {
    base_url: String,
    http: Client,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: Client::new(),
        }
    }

    // ------------------------------------------------------------------
    // Operações de escrita (POST)
    // ------------------------------------------------------------------

    /// Conecta um jogador simulado. Retorna o corpo `{connected, uuid}`.
    pub async fn connect_player(&self, username: &str) -> Result<Value, BridgeError> {
        self.post("/connect", json!({ "username": username })).await
    }

    pub async fn disconnect_player(&self, username: &str) -> Result<Value, BridgeError> {
        self.post("/disconnect", json!({ "username": username })).await
    }

    pub async fn send_chat(&self, username: &str, message: &str) -> Result<Value, BridgeError> {
        self.post("/chat", json!({ "username": username, "message": message }))
            .await
    }

    pub async fn player_command(&self, username: &str, command: &str) -> Result<Value, BridgeError> {
        self.post("/command", json!({ "username": username, "command": command }))
            .await
    }

    pub async fn move_player(
        &self,
        username: &str,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<Value, BridgeError> {
        self.post("/move", json!({ "username": username, "x": x, "y": y, "z": z }))
            .await
    }

    pub async fn equip(
        &self,
        username: &str,
        item: &str,
        slot: Option<&str>,
    ) -> Result<Value, BridgeError> {
        self.post(
            "/equip",
            json!({ "username": username, "item": item, "slot": slot }),
        )
        .await
    }

    pub async fn use_item(&self, username: &str, target: &str) -> Result<Value, BridgeError> {
        self.post("/use", json!({ "username": username, "target": target }))
            .await
    }

    // ------------------------------------------------------------------
    // Operações de leitura (GET, com guarda de formato)
    // ------------------------------------------------------------------

    pub async fn get_position(&self, username: &str) -> Result<PlayerPosition, BridgeError> {
        let body = self.get(&format!("/position/{}", encode(username))).await?;
        guarded(&POSITION_SCHEMA, body, "position")
    }

    pub async fn get_health(&self, username: &str) -> Result<PlayerHealth, BridgeError> {
        let body = self.get(&format!("/health/{}", encode(username))).await?;
        guarded(&HEALTH_SCHEMA, body, "health")
    }

    pub async fn get_inventory(&self, username: &str) -> Result<PlayerInventory, BridgeError> {
        let body = self.get(&format!("/inventory/{}", encode(username))).await?;
        guarded(&INVENTORY_SCHEMA, body, "inventory")
    }

    pub async fn get_entities(&self, username: &str) -> Result<NearbyEntities, BridgeError> {
        let body = self.get(&format!("/entities/{}", encode(username))).await?;
        guarded(&ENTITIES_SCHEMA, body, "entities")
    }

    pub async fn get_equipment(&self, username: &str) -> Result<PlayerEquipment, BridgeError> {
        let body = self.get(&format!("/equipment/{}", encode(username))).await?;
        serde_json::from_value(body)
            .map_err(|e| BridgeError::Protocol(format!("equipment: {}", e)))
    }

    /// Clima atual do mundo, visto pelo runtime do jogador:
    /// `GET /weather` → `{weather: "clear" | "rain" | "thunder"}`.
    pub async fn get_weather(&self) -> Result<String, BridgeError> {
        let body = self.get("/weather").await?;
        body.get("weather")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| BridgeError::Protocol("resposta de weather sem campo 'weather'".to_string()))
    }

    /// Liveness do serviço: `GET /health` → `{status: "ok"}`.
    pub async fn service_health(&self) -> Result<bool, BridgeError> {
        let body = self.get("/health").await?;
        Ok(body.get("status").and_then(Value::as_str) == Some("ok"))
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    async fn post(&self, path: &str, body: Value) -> Result<Value, BridgeError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "bridge POST");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn get(&self, path: &str) -> Result<Value, BridgeError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "bridge GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, BridgeError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        if !status.is_success() {
            // Erros vêm como {error, message}; mantemos a mensagem se der.
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| text.clone());
            return Err(BridgeError::Protocol(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        serde_json::from_str(&text)
            .map_err(|e| BridgeError::Protocol(format!("corpo não é JSON: {}", e)))
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Valida o corpo contra o schema e então desserializa.
fn guarded<T: serde::de::DeserializeOwned>(
    schema: &JSONSchema,
    body: Value,
    what: &str,
) -> Result<T, BridgeError> {
    if let Err(errors) = schema.validate(&body) {
        let first = errors
            .into_iter()
            .next()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "formato inválido".to_string());
        return Err(BridgeError::Protocol(format!(
            "resposta de {} fora do formato: {}",
            what, first
        )));
    }
    serde_json::from_value(body).map_err(|e| BridgeError::Protocol(format!("{}: {}", what, e)))
}

// ============================================================================
// TESTES
// ============================================================================
