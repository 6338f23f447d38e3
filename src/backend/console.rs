//! # Backend Console-Only
//!
//! Implementa o contrato de backend falando APENAS com o console de
//! administração do servidor. Toda operação do plano do servidor vira um
//! comando de console; operações do plano do cliente respondem
//! `CapabilityUnavailable` sem tocar a rede.
//!
//! ## Reconexão preguiçosa:
//!
//! O cliente de console não reconecta sozinho. Este backend, que é o
//! dono da conexão, reconecta no PRÓXIMO comando depois de uma queda de
//! transporte, com tentativas limitadas e backoff (ver
//! [`crate::retry::ReconnectPolicy`]). Senha recusada não ganha retry:
//! é erro de protocolo, não soluço de rede.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{
    compose_command, entity_selector, parse_first_float, parse_world_time, test_entity_name,
    BackendConfig, GameBackend, ENTITY_SEARCH_RADIUS, TEST_ENTITY_TAG,
};
use crate::errors::{BackendError, Channel};
use crate::rcon::{ConsoleClient, ConsoleConfig, ConsoleError, ConsoleState};
use crate::report::LogStream;
use crate::retry::ReconnectPolicy;

/// Backend que embrulha um [`ConsoleClient`].
pub struct ConsoleBackend {
    client: ConsoleClient,
    reconnect: ReconnectPolicy,
    server_log: LogStream,
}

impl ConsoleBackend {
    pub fn new(config: &BackendConfig, server_log: LogStream) -> Self {
        let mut console_config =
            ConsoleConfig::new(config.console_addr.clone(), config.console_password.clone());
        console_config.read_timeout = config.read_timeout;
        Self {
            client: ConsoleClient::new(console_config),
            reconnect: config.reconnect.clone(),
            server_log,
        }
    }

    /// Garante a conexão, com as tentativas da política de reconexão.
    async fn ensure_connected(&mut self) -> Result<(), BackendError> {
        if self.client.state() == ConsoleState::Ready {
            return Ok(());
        }

        let max = self.reconnect.max_attempts.max(1);
        for attempt in 1..=max {
            self.reconnect.wait_before(attempt).await;
            match self.client.connect().await {
                Ok(()) => return Ok(()),
                // Senha errada ou protocolo corrompido não melhoram com
                // retry.
                Err(e @ (ConsoleError::AuthRejected | ConsoleError::Protocol(_))) => {
                    return Err(map_console_error(e));
                }
                Err(e) if attempt == max => {
                    warn!(attempt, error = %e, "reconexão ao console esgotou as tentativas");
                    return Err(BackendError::Transport(format!(
                        "console inacessível após {} tentativas: {}",
                        max, e
                    )));
                }
                Err(e) => {
                    debug!(attempt, error = %e, "tentativa de conexão ao console falhou");
                }
            }
        }
        unreachable!("loop de reconexão sempre retorna");
    }

    /// Envia um comando, registrando o tráfego no log do servidor.
    async fn command(&mut self, text: &str) -> Result<String, BackendError> {
        let text = text.trim_end();
        self.ensure_connected().await?;

        self.server_log.append(Channel::Server, format!("> {}", text));
        match self.client.send_command(text).await {
            Ok(reply) => {
                let shown = if reply.is_empty() { "(vazio)" } else { reply.as_str() };
                self.server_log.append(Channel::Server, format!("< {}", shown));
                Ok(reply)
            }
            Err(e) => {
                self.server_log.append(Channel::Server, format!("! {}", e));
                Err(map_console_error(e))
            }
        }
    }

    fn unsupported(&self, operation: &str) -> BackendError {
        BackendError::CapabilityUnavailable {
            operation: operation.to_string(),
            backend: "console".to_string(),
        }
    }
}

fn map_console_error(e: ConsoleError) -> BackendError {
    match e {
        ConsoleError::Timeout(d) => BackendError::Timeout {
            elapsed_ms: d.as_millis() as u64,
        },
        ConsoleError::AuthRejected => {
            BackendError::Protocol("senha de console recusada".to_string())
        }
        ConsoleError::Protocol(m) => BackendError::Protocol(m),
        ConsoleError::Io(m) => BackendError::Transport(m),
        ConsoleError::NotReady(state) => {
            BackendError::Transport(format!("console fora do estado Ready: {:?}", state))
        }
    }
}

/// Caminho de slot do comando `item replace` para cada slot lógico.
fn slot_path(slot: &str) -> String {
    match slot.to_ascii_lowercase().as_str() {
        "head" | "helmet" => "armor.head".to_string(),
        "chest" | "chestplate" => "armor.chest".to_string(),
        "legs" | "leggings" => "armor.legs".to_string(),
        "feet" | "boots" => "armor.feet".to_string(),
        "offhand" => "weapon.offhand".to_string(),
        "hand" | "mainhand" => "weapon.mainhand".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl GameBackend for ConsoleBackend {
    async fn initialize(&mut self) -> Result<(), BackendError> {
        self.ensure_connected().await
    }

    async fn cleanup(&mut self) -> Result<(), BackendError> {
        // Limpeza de melhor esforço: falha aqui não mascara o resultado
        // da story.
        if let Err(e) = self.remove_all_test_entities().await {
            warn!(error = %e, "falha ao remover entidades de teste no cleanup");
        }
        self.client.disconnect();
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "console"
    }

    // ------------------------------------------------------------------
    // Plano do servidor
    // ------------------------------------------------------------------

    async fn execute_console(&mut self, cmd: &str, args: &[String]) -> Result<String, BackendError> {
        let composed = compose_command(cmd, args);
        self.command(&composed).await
    }

    async fn execute_console_raw(&mut self, text: &str) -> Result<String, BackendError> {
        self.command(text).await
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
        let full_name = test_entity_name(local_name);
        let nbt = format!(
            "{{CustomName:'{{\"text\":\"{}\"}}',CustomNameVisible:1b,Tags:[\"{}\"]}}",
            full_name, TEST_ENTITY_TAG
        );
        let cmd = format!("summon {} {} {} {} {}", entity_type, x, y, z, nbt);
        self.command(&cmd).await?;

        if let Some(equipment) = equipment {
            for (slot, item) in equipment {
                let cmd = format!(
                    "item replace entity {} {} with {} 1",
                    entity_selector(&full_name),
                    slot_path(slot),
                    item
                );
                self.command(&cmd).await?;
            }
        }

        Ok(full_name)
    }

    async fn entity_exists(&mut self, local_name: &str) -> Result<bool, BackendError> {
        let full_name = test_entity_name(local_name);
        let cmd = format!("execute if entity {}", entity_selector(&full_name));
        let reply = self.command(&cmd).await?;
        Ok(reply.to_ascii_lowercase().contains("passed"))
    }

    async fn get_entity_health(&mut self, local_name: &str) -> Result<f64, BackendError> {
        let full_name = test_entity_name(local_name);
        let cmd = format!("data get entity {} Health", entity_selector(&full_name));
        let reply = self.command(&cmd).await?;
        parse_first_float(&reply).ok_or_else(|| {
            BackendError::Protocol(format!(
                "resposta de vida sem número para '{}': '{}'",
                local_name,
                reply.trim()
            ))
        })
    }

    async fn set_entity_health(&mut self, local_name: &str, health: f64) -> Result<(), BackendError> {
        let full_name = test_entity_name(local_name);
        let cmd = format!(
            "data modify entity {} Health set value {}f",
            entity_selector(&full_name),
            health
        );
        self.command(&cmd).await.map(drop)
    }

    async fn kill_entity(&mut self, local_name: &str) -> Result<(), BackendError> {
        let full_name = test_entity_name(local_name);
        let cmd = format!(
            "kill @e[name={},distance=..{}]",
            full_name, ENTITY_SEARCH_RADIUS
        );
        self.command(&cmd).await.map(drop)
    }

    async fn damage_entity(&mut self, local_name: &str, amount: f64) -> Result<(), BackendError> {
        let full_name = test_entity_name(local_name);
        let cmd = format!("damage {} {}", entity_selector(&full_name), amount);
        self.command(&cmd).await.map(drop)
    }

    async fn give_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError> {
        self.command(&format!("give {} {} {}", player, item, count))
            .await
            .map(drop)
    }

    async fn remove_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError> {
        self.command(&format!("clear {} {} {}", player, item, count))
            .await
            .map(drop)
    }

    async fn clear_inventory(&mut self, player: &str) -> Result<(), BackendError> {
        self.command(&format!("clear {}", player)).await.map(drop)
    }

    async fn make_operator(&mut self, player: &str) -> Result<(), BackendError> {
        self.command(&format!("op {}", player)).await.map(drop)
    }

    async fn teleport(&mut self, player: &str, x: f64, y: f64, z: f64) -> Result<(), BackendError> {
        self.command(&format!("tp {} {} {} {}", player, x, y, z))
            .await
            .map(drop)
    }

    async fn gamemode(&mut self, player: &str, mode: &str) -> Result<(), BackendError> {
        self.command(&format!("gamemode {} {}", mode, player))
            .await
            .map(drop)
    }

    async fn set_spawn_point(&mut self, player: &str, x: f64, y: f64, z: f64) -> Result<(), BackendError> {
        self.command(&format!("spawnpoint {} {} {} {}", player, x, y, z))
            .await
            .map(drop)
    }

    async fn kill_player(&mut self, player: &str) -> Result<(), BackendError> {
        self.command(&format!("kill {}", player)).await.map(drop)
    }

    async fn heal_player(&mut self, player: &str) -> Result<(), BackendError> {
        self.command(&format!(
            "effect give {} minecraft:instant_health 1 10 true",
            player
        ))
        .await
        .map(drop)
    }

    async fn set_player_health(&mut self, player: &str, value: f64) -> Result<(), BackendError> {
        // O console não escreve vida de jogador diretamente; aproximamos
        // com kill/heal/damage a partir da vida cheia.
        if value <= 0.0 {
            return self.kill_player(player).await;
        }
        if value >= 20.0 {
            return self.heal_player(player).await;
        }
        self.heal_player(player).await?;
        let delta = 20.0 - value;
        self.command(&format!("damage {} {}", player, delta))
            .await
            .map(drop)
    }

    async fn set_weather(&mut self, kind: &str, seconds: Option<u64>) -> Result<(), BackendError> {
        let cmd = match seconds {
            Some(secs) => format!("weather {} {}", kind, secs),
            None => format!("weather {}", kind),
        };
        self.command(&cmd).await.map(drop)
    }

    async fn set_time(&mut self, ticks: i64) -> Result<(), BackendError> {
        self.command(&format!("time set {}", ticks)).await.map(drop)
    }

    async fn get_world_time(&mut self) -> Result<i64, BackendError> {
        let reply = self.command("time query gametime").await?;
        parse_world_time(&reply)
    }

    async fn get_weather(&mut self) -> Result<String, BackendError> {
        // O protocolo de console não tem leitura de clima em todas as
        // versões: este backend devolve a constante e registra a
        // limitação na evidência.
        self.server_log.append(
            Channel::Server,
            "Limitation: console não expõe leitura de clima; retornando \"clear\"",
        );
        Ok("clear".to_string())
    }

    async fn remove_all_test_entities(&mut self) -> Result<(), BackendError> {
        let cmd = format!(
            "kill @e[tag={},distance=..{}]",
            TEST_ENTITY_TAG, ENTITY_SEARCH_RADIUS
        );
        self.command(&cmd).await.map(drop)
    }

    async fn remove_all_test_players(&mut self) -> Result<(), BackendError> {
        // Sem bridge não há jogadores simulados para derrubar.
        Ok(())
    }

    // ------------------------------------------------------------------
    // Plano do cliente: indisponível neste backend
    // ------------------------------------------------------------------

    async fn connect_player(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("connect_player"))
    }

    async fn disconnect_player(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("disconnect_player"))
    }

    async fn send_chat(&mut self, _name: &str, _message: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("send_chat"))
    }

    async fn execute_player_command(&mut self, _name: &str, _command: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("execute_player_command"))
    }

    async fn move_player(&mut self, _name: &str, _x: f64, _y: f64, _z: f64) -> Result<Value, BackendError> {
        Err(self.unsupported("move_player"))
    }

    async fn equip(&mut self, _name: &str, _item: &str, _slot: Option<&str>) -> Result<Value, BackendError> {
        Err(self.unsupported("equip"))
    }

    async fn use_item(&mut self, _name: &str, _target: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("use_item"))
    }

    async fn get_position(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("get_position"))
    }

    async fn get_health(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("get_health"))
    }

    async fn get_inventory(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("get_inventory"))
    }

    async fn get_entities(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("get_entities"))
    }

    async fn get_equipment(&mut self, _name: &str) -> Result<Value, BackendError> {
        Err(self.unsupported("get_equipment"))
    }

    async fn check_service_health(&mut self) -> Result<bool, BackendError> {
        // Saúde do console-only = console responde.
        self.command("list").await.map(|_| true)
    }
}

// ============================================================================
// TESTES
// ============================================================================
