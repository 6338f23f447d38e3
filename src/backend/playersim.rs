//! # Backend Player-Sim
//!
//! Backend completo: plano do servidor pelo console embutido, plano do
//! cliente pelo bridge HTTP de simulação de jogadores.
//!
//! Composição, não herança: este backend TEM um [`ConsoleBackend`] para
//! os comandos de admin que o bridge não consegue emitir, e TEM um
//! [`BridgeClient`] para controlar jogadores simulados. O orquestrador
//! nunca enxerga essa divisão: só o contrato.
//!
//! Jogadores conectados por aqui ficam rastreados para que
//! `remove_all_test_players` e o cleanup os derrubem mesmo quando a
//! story falha no meio.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use super::console::ConsoleBackend;
use super::{BackendConfig, GameBackend};
use crate::bridge::{BridgeClient, BridgeError};
use crate::errors::{BackendError, Channel};
use crate::report::LogStream;

/// Backend de simulação de jogadores (console + bridge).
pub struct PlayerSimBackend {
    console: ConsoleBackend,
    bridge: BridgeClient,
    client_log: LogStream,
    connected_players: Vec<String>,
}

impl PlayerSimBackend {
    pub fn new(
        config: &BackendConfig,
        bridge_url: &str,
        server_log: LogStream,
        client_log: LogStream,
    ) -> Self {
        Self {
            console: ConsoleBackend::new(config, server_log),
            bridge: BridgeClient::new(bridge_url),
            client_log,
            connected_players: Vec::new(),
        }
    }

    fn log_call(&self, what: &str) {
        self.client_log.append(Channel::Client, format!("> {}", what));
    }

    fn log_reply(&self, value: &Value) {
        self.client_log.append(Channel::Client, format!("< {}", value));
    }
}

fn map_bridge_error(e: BridgeError) -> BackendError {
    match e {
        BridgeError::Transport(m) => BackendError::Transport(m),
        BridgeError::Protocol(m) => BackendError::Protocol(m),
    }
}

/// Serializa uma resposta tipada do bridge para o step-output store.
fn to_value<T: serde::Serialize>(value: T) -> Result<Value, BackendError> {
    serde_json::to_value(value)
        .map_err(|e| BackendError::Protocol(format!("serialização de resposta: {}", e)))
}

#[async_trait]
impl GameBackend for PlayerSimBackend {
    async fn initialize(&mut self) -> Result<(), BackendError> {
        self.console.initialize().await?;
        let healthy = self.bridge.service_health().await.map_err(map_bridge_error)?;
        if !healthy {
            return Err(BackendError::Transport(
                "bridge respondeu, mas não está saudável".to_string(),
            ));
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), BackendError> {
        if let Err(e) = self.remove_all_test_players().await {
            warn!(error = %e, "falha ao desconectar jogadores de teste no cleanup");
        }
        self.console.cleanup().await
    }

    fn backend_type(&self) -> &'static str {
        "playersim"
    }

    // ------------------------------------------------------------------
    // Plano do servidor: delega ao console embutido
    // ------------------------------------------------------------------

    async fn execute_console(&mut self, cmd: &str, args: &[String]) -> Result<String, BackendError> {
        self.console.execute_console(cmd, args).await
    }

    async fn execute_console_raw(&mut self, text: &str) -> Result<String, BackendError> {
        self.console.execute_console_raw(text).await
    }

    async fn spawn_entity(
        &mut self,
        local_name: &str,
        entity_type: &str,
        x: f64,
        y: f64,
        z: f64,
        equipment: Option<&BTreeMap<String, String>>,
    ) -> Result<String, BackendError> {
        self.console
            .spawn_entity(local_name, entity_type, x, y, z, equipment)
            .await
    }

    async fn entity_exists(&mut self, local_name: &str) -> Result<bool, BackendError> {
        self.console.entity_exists(local_name).await
    }

    async fn get_entity_health(&mut self, local_name: &str) -> Result<f64, BackendError> {
        self.console.get_entity_health(local_name).await
    }

    async fn set_entity_health(&mut self, local_name: &str, health: f64) -> Result<(), BackendError> {
        self.console.set_entity_health(local_name, health).await
    }

    async fn kill_entity(&mut self, local_name: &str) -> Result<(), BackendError> {
        self.console.kill_entity(local_name).await
    }

    async fn damage_entity(&mut self, local_name: &str, amount: f64) -> Result<(), BackendError> {
        self.console.damage_entity(local_name, amount).await
    }

    async fn give_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError> {
        self.console.give_item(player, item, count).await
    }

    async fn remove_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError> {
        self.console.remove_item(player, item, count).await
    }

    async fn clear_inventory(&mut self, player: &str) -> Result<(), BackendError> {
        self.console.clear_inventory(player).await
    }

    async fn make_operator(&mut self, player: &str) -> Result<(), BackendError> {
        self.console.make_operator(player).await
    }

    async fn teleport(&mut self, player: &str, x: f64, y: f64, z: f64) -> Result<(), BackendError> {
        self.console.teleport(player, x, y, z).await
    }

    async fn gamemode(&mut self, player: &str, mode: &str) -> Result<(), BackendError> {
        self.console.gamemode(player, mode).await
    }

    async fn set_spawn_point(&mut self, player: &str, x: f64, y: f64, z: f64) -> Result<(), BackendError> {
        self.console.set_spawn_point(player, x, y, z).await
    }

    async fn kill_player(&mut self, player: &str) -> Result<(), BackendError> {
        self.console.kill_player(player).await
    }

    async fn heal_player(&mut self, player: &str) -> Result<(), BackendError> {
        self.console.heal_player(player).await
    }

    async fn set_player_health(&mut self, player: &str, value: f64) -> Result<(), BackendError> {
        self.console.set_player_health(player, value).await
    }

    async fn set_weather(&mut self, kind: &str, seconds: Option<u64>) -> Result<(), BackendError> {
        self.console.set_weather(kind, seconds).await
    }

    async fn set_time(&mut self, ticks: i64) -> Result<(), BackendError> {
        self.console.set_time(ticks).await
    }

    async fn get_world_time(&mut self) -> Result<i64, BackendError> {
        self.console.get_world_time().await
    }

    async fn get_weather(&mut self) -> Result<String, BackendError> {
        // Aqui o bridge tem leitura de verdade: nada de constante.
        self.log_call("get_weather");
        let weather = self.bridge.get_weather().await.map_err(map_bridge_error)?;
        self.client_log
            .append(Channel::Client, format!("< {}", weather));
        Ok(weather)
    }

    async fn remove_all_test_entities(&mut self) -> Result<(), BackendError> {
        self.console.remove_all_test_entities().await
    }

    async fn remove_all_test_players(&mut self) -> Result<(), BackendError> {
        let players = std::mem::take(&mut self.connected_players);
        for player in &players {
            self.log_call(&format!("disconnect {}", player));
            if let Err(e) = self.bridge.disconnect_player(player).await {
                warn!(player = %player, error = %e, "falha ao desconectar jogador de teste");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Plano do cliente: bridge
    // ------------------------------------------------------------------

    async fn connect_player(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("connect {}", name));
        let reply = self
            .bridge
            .connect_player(name)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        if !self.connected_players.iter().any(|p| p == name) {
            self.connected_players.push(name.to_string());
        }
        Ok(reply)
    }

    async fn disconnect_player(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("disconnect {}", name));
        let reply = self
            .bridge
            .disconnect_player(name)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        self.connected_players.retain(|p| p != name);
        Ok(reply)
    }

    async fn send_chat(&mut self, name: &str, message: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("chat {} {}", name, message));
        let reply = self
            .bridge
            .send_chat(name, message)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        Ok(reply)
    }

    async fn execute_player_command(&mut self, name: &str, command: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("command {} {}", name, command));
        let reply = self
            .bridge
            .player_command(name, command)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        Ok(reply)
    }

    async fn move_player(&mut self, name: &str, x: f64, y: f64, z: f64) -> Result<Value, BackendError> {
        self.log_call(&format!("move {} {} {} {}", name, x, y, z));
        let reply = self
            .bridge
            .move_player(name, x, y, z)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        Ok(reply)
    }

    async fn equip(&mut self, name: &str, item: &str, slot: Option<&str>) -> Result<Value, BackendError> {
        self.log_call(&format!("equip {} {}", name, item));
        let reply = self
            .bridge
            .equip(name, item, slot)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        Ok(reply)
    }

    async fn use_item(&mut self, name: &str, target: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("use {} {}", name, target));
        let reply = self
            .bridge
            .use_item(name, target)
            .await
            .map_err(map_bridge_error)?;
        self.log_reply(&reply);
        Ok(reply)
    }

    async fn get_position(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("position {}", name));
        let position = self
            .bridge
            .get_position(name)
            .await
            .map_err(map_bridge_error)?;
        let value = to_value(position)?;
        self.log_reply(&value);
        Ok(value)
    }

    async fn get_health(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("health {}", name));
        let health = self
            .bridge
            .get_health(name)
            .await
            .map_err(map_bridge_error)?;
        let value = to_value(health)?;
        self.log_reply(&value);
        Ok(value)
    }

    async fn get_inventory(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("inventory {}", name));
        let inventory = self
            .bridge
            .get_inventory(name)
            .await
            .map_err(map_bridge_error)?;
        let value = to_value(inventory)?;
        self.log_reply(&value);
        Ok(value)
    }

    async fn get_entities(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("entities {}", name));
        let entities = self
            .bridge
            .get_entities(name)
            .await
            .map_err(map_bridge_error)?;
        let value = to_value(entities)?;
        self.log_reply(&value);
        Ok(value)
    }

    async fn get_equipment(&mut self, name: &str) -> Result<Value, BackendError> {
        self.log_call(&format!("equipment {}", name));
        let equipment = self
            .bridge
            .get_equipment(name)
            .await
            .map_err(map_bridge_error)?;
        let value = to_value(equipment)?;
        self.log_reply(&value);
        Ok(value)
    }

    async fn check_service_health(&mut self) -> Result<bool, BackendError> {
        self.log_call("health check");
        self.bridge.service_health().await.map_err(map_bridge_error)
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ReconnectPolicy;
    use crate::story::BackendKind;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Bridge fake com roteamento por caminho; grava os caminhos vistos.
    async fn spawn_routed_bridge() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let seen = seen_clone.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let path = request
                        .lines()
                        .next()
                        .and_then(|l| l.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    seen.lock().unwrap().push(path.clone());

                    let body = route(&path);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn route(path: &str) -> String {
        match path {
            "/connect" => r#"{"connected":true,"uuid":"u-1"}"#.to_string(),
            "/disconnect" => r#"{"disconnected":true}"#.to_string(),
            "/chat" => r#"{"sent":true,"messageId":"m-1"}"#.to_string(),
            "/weather" => r#"{"weather":"rain"}"#.to_string(),
            "/health" => r#"{"status":"ok"}"#.to_string(),
            p if p.starts_with("/position/") => {
                r#"{"x":1.0,"y":64.0,"z":2.0,"yaw":0.0,"pitch":0.0,"world":"overworld"}"#.to_string()
            }
            _ => r#"{}"#.to_string(),
        }
    }

    fn test_config() -> BackendConfig {
        BackendConfig {
            kind: BackendKind::PlayerSim,
            // Console inalcançável: os testes abaixo só exercitam o
            // plano do cliente.
            console_addr: "127.0.0.1:1".to_string(),
            console_password: "x".to_string(),
            read_timeout: Duration::from_secs(1),
            bridge_url: None,
            reconnect: ReconnectPolicy {
                max_attempts: 1,
                base_backoff_ms: 1,
                backoff_factor: 1.0,
                max_backoff_ms: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_connect_tracks_player() {
        let (url, _seen) = spawn_routed_bridge().await;
        let mut backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), LogStream::new());

        let reply = backend.connect_player("tester").await.unwrap();
        assert_eq!(reply["uuid"], serde_json::json!("u-1"));
        assert_eq!(backend.connected_players, vec!["tester".to_string()]);

        backend.disconnect_player("tester").await.unwrap();
        assert!(backend.connected_players.is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_test_players_hits_bridge() {
        let (url, seen) = spawn_routed_bridge().await;
        let mut backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), LogStream::new());

        backend.connect_player("p1").await.unwrap();
        backend.connect_player("p2").await.unwrap();
        backend.remove_all_test_players().await.unwrap();

        assert!(backend.connected_players.is_empty());
        let paths = seen.lock().unwrap().clone();
        assert_eq!(paths.iter().filter(|p| *p == "/disconnect").count(), 2);
    }

    #[tokio::test]
    async fn test_get_weather_queries_bridge_not_console() {
        let (url, seen) = spawn_routed_bridge().await;
        let mut backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), LogStream::new());

        // Console está num endereço morto: se a leitura de clima fosse
        // pelo console, isso falharia.
        let weather = backend.get_weather().await.unwrap();
        assert_eq!(weather, "rain");
        assert!(seen.lock().unwrap().contains(&"/weather".to_string()));
    }

    #[tokio::test]
    async fn test_client_traffic_is_logged_to_client_channel() {
        let (url, _) = spawn_routed_bridge().await;
        let client_log = LogStream::new();
        let mut backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), client_log.clone());

        backend.send_chat("tester", "olá mundo").await.unwrap();
        let text = client_log.text_since(0);
        assert!(text.contains("> chat tester olá mundo"));
        assert!(text.contains("\"sent\":true"));
    }

    #[tokio::test]
    async fn test_get_position_returns_typed_value() {
        let (url, _) = spawn_routed_bridge().await;
        let mut backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), LogStream::new());

        let position = backend.get_position("tester").await.unwrap();
        assert_eq!(position["world"], serde_json::json!("overworld"));
        assert_eq!(position["y"], serde_json::json!(64.0));
    }

    #[tokio::test]
    async fn test_equip_and_use_round_through_bridge() {
        let (url, seen) = spawn_routed_bridge().await;
        let mut backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), LogStream::new());

        backend
            .equip("tester", "diamond_sword", Some("hand"))
            .await
            .unwrap();
        backend.use_item("tester", "block_under").await.unwrap();

        let paths = seen.lock().unwrap().clone();
        assert!(paths.contains(&"/equip".to_string()));
        assert!(paths.contains(&"/use".to_string()));
    }

    #[tokio::test]
    async fn test_backend_type_is_stable() {
        let (url, _) = spawn_routed_bridge().await;
        let backend =
            PlayerSimBackend::new(&test_config(), &url, LogStream::new(), LogStream::new());
        assert_eq!(backend.backend_type(), "playersim");
    }
}
