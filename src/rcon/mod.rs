//! # Cliente do Console do Servidor (TCP Framed)
//!
//! Cliente requisição/resposta para o protocolo de console de
//! administração do servidor de jogo. É por aqui que entram os comandos
//! de admin: spawnar entidades, dar itens, mudar clima.
//!
//! ## Formato de frame (little-endian):
//!
//! ```text
//! ┌─────────┬────────────┬────────┬──────────────┬─────┐
//! │ length  │ request_id │ type   │ payload      │ pad │
//! │ i32     │ i32        │ i32    │ utf8 + NUL   │ u8  │
//! └─────────┴────────────┴────────┴──────────────┴─────┘
//! ```
//!
//! `length` é a contagem de bytes do RESTANTE do frame (tudo depois do
//! próprio length). Tipos: login=3, comando=2, resposta=0. O servidor
//! ecoa o request_id no sucesso e responde `-1` quando a senha é
//! recusada.
//!
//! ## Máquina de estados:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Ready
//!       ▲                                        │
//!       └──────── qualquer erro de I/O ──────────┘
//! ```
//!
//! Uma única requisição em voo por vez; o request_id é monotônico e
//! usado para casar a resposta. Timeout de leitura configurável
//! (padrão 5 s): estourou, a conexão volta para Disconnected e a
//! operação falha com `Timeout`.
//!
//! Este cliente NÃO reconecta sozinho. Reconexão e retry pertencem ao
//! backend que é dono dele.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

// ============================================================================
// CONSTANTES DO PROTOCOLO
// ============================================================================

/// Tipo de pacote: autenticação.
pub const PACKET_LOGIN: i32 = 3;
/// Tipo de pacote: comando de console.
pub const PACKET_COMMAND: i32 = 2;
/// Tipo de pacote: resposta do servidor.
pub const PACKET_RESPONSE: i32 = 0;

/// request_id ecoado pelo servidor quando a autenticação falha.
const AUTH_REJECTED: i32 = -1;

/// Respostas maiores que isso são tratadas como protocolo corrompido.
const MAX_FRAME_LEN: i32 = 1 << 20;

/// Timeout de leitura padrão.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// CONFIGURAÇÃO E ERROS
// ============================================================================

/// Configuração do cliente de console.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Endereço `host:porta` do console.
    pub addr: String,
    /// Senha de administração.
    pub password: String,
    /// Timeout de leitura do socket.
    pub read_timeout: Duration,
}

impl ConsoleConfig {
    pub fn new(addr: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            password: password.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Erros do cliente de console.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("I/O: {0}")]
    Io(String),

    #[error("timeout de leitura ({0:?})")]
    Timeout(Duration),

    #[error("senha de console recusada pelo servidor")]
    AuthRejected,

    #[error("protocolo violado: {0}")]
    Protocol(String),

    #[error("comando enviado fora do estado Ready (estado atual: {0:?})")]
    NotReady(ConsoleState),
}

/// Estados do cliente. `send_command` só é válido em `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

// ============================================================================
// CODEC DE FRAMES
// ============================================================================

/// Um frame decodificado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_id: i32,
    pub packet_type: i32,
    pub payload: String,
}

/// Codifica um frame no formato de fio.
pub fn encode_frame(request_id: i32, packet_type: i32, payload: &str) -> Vec<u8> {
    let body_len = 4 + 4 + payload.len() + 2; // id + type + payload + NUL + pad
    let mut buf = Vec::with_capacity(4 + body_len);
    buf.extend_from_slice(&(body_len as i32).to_le_bytes());
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&packet_type.to_le_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf.push(0); // terminador do payload
    buf.push(0); // pad
    buf
}

/// Decodifica o corpo de um frame (tudo depois do campo length).
pub fn decode_body(body: &[u8]) -> Result<Frame, ConsoleError> {
    if body.len() < 10 {
        return Err(ConsoleError::Protocol(format!(
            "frame curto demais: {} bytes",
            body.len()
        )));
    }
    let request_id = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let packet_type = i32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    // payload termina em NUL; o último byte é o pad.
    let payload_bytes = &body[8..body.len() - 2];
    let payload = String::from_utf8(payload_bytes.to_vec())
        .map_err(|e| ConsoleError::Protocol(format!("payload não é UTF-8: {}", e)))?;
    Ok(Frame {
        request_id,
        packet_type,
        payload,
    })
}

// ============================================================================
// CLIENTE
// ============================================================================

/// Cliente do console: um socket, uma requisição em voo.
pub struct ConsoleClient {
    config: ConsoleConfig,
    state: ConsoleState,
    stream: Option<TcpStream>,
    next_request_id: i32,
}

impl ConsoleClient {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            config,
            state: ConsoleState::Disconnected,
            stream: None,
            next_request_id: 1,
        }
    }

    pub fn state(&self) -> ConsoleState {
        self.state
    }

    /// Conecta e autentica. Idempotente quando já está Ready.
    pub async fn connect(&mut self) -> Result<(), ConsoleError> {
        if self.state == ConsoleState::Ready {
            return Ok(());
        }

        self.state = ConsoleState::Connecting;
        debug!(addr = %self.config.addr, "conectando ao console");

        let stream = TcpStream::connect(&self.config.addr).await.map_err(|e| {
            self.state = ConsoleState::Disconnected;
            ConsoleError::Io(e.to_string())
        })?;
        self.stream = Some(stream);

        self.state = ConsoleState::Authenticating;
        let login_id = self.take_request_id();
        let password = self.config.password.clone();
        let reply = self.roundtrip(login_id, PACKET_LOGIN, &password).await?;

        if reply.request_id == AUTH_REJECTED {
            self.drop_connection();
            return Err(ConsoleError::AuthRejected);
        }
        if reply.request_id != login_id {
            self.drop_connection();
            return Err(ConsoleError::Protocol(format!(
                "login respondeu request_id {} (esperado {})",
                reply.request_id, login_id
            )));
        }

        self.state = ConsoleState::Ready;
        debug!("console autenticado");
        Ok(())
    }

    /// Envia um comando e retorna a resposta textual do servidor.
    ///
    /// Só é válido em `Ready`. Qualquer erro derruba a conexão: quem
    /// decide reconectar é o backend dono deste cliente.
    pub async fn send_command(&mut self, command: &str) -> Result<String, ConsoleError> {
        if self.state != ConsoleState::Ready {
            return Err(ConsoleError::NotReady(self.state));
        }

        let request_id = self.take_request_id();
        debug!(request_id, command = %command, "comando de console");
        let reply = self.roundtrip(request_id, PACKET_COMMAND, command).await?;

        if reply.request_id == AUTH_REJECTED {
            self.drop_connection();
            return Err(ConsoleError::AuthRejected);
        }
        if reply.request_id != request_id {
            // Resposta de outra requisição: o fio está fora de sincronia.
            self.drop_connection();
            return Err(ConsoleError::Protocol(format!(
                "resposta com request_id {} (esperado {})",
                reply.request_id, request_id
            )));
        }

        Ok(reply.payload)
    }

    /// Derruba a conexão explicitamente (cleanup do backend).
    pub fn disconnect(&mut self) {
        self.drop_connection();
    }

    fn take_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.state = ConsoleState::Disconnected;
    }

    /// Escreve um frame e lê exatamente um frame de resposta, sob o
    /// timeout de leitura configurado.
    async fn roundtrip(
        &mut self,
        request_id: i32,
        packet_type: i32,
        payload: &str,
    ) -> Result<Frame, ConsoleError> {
        let timeout = self.config.read_timeout;
        let stream = self.stream.as_mut().ok_or_else(|| {
            ConsoleError::Io("sem conexão ativa".to_string())
        })?;

        let frame = encode_frame(request_id, packet_type, payload);
        if let Err(e) = stream.write_all(&frame).await {
            self.drop_connection();
            return Err(ConsoleError::Io(e.to_string()));
        }

        match tokio::time::timeout(timeout, read_frame(stream)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                self.drop_connection();
                Err(e)
            }
            Err(_) => {
                warn!(request_id, "timeout de leitura do console");
                self.drop_connection();
                Err(ConsoleError::Timeout(timeout))
            }
        }
    }
}

/// Lê um frame completo do socket.
async fn read_frame(stream: &mut TcpStream) -> Result<Frame, ConsoleError> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ConsoleError::Io(e.to_string()))?;
    let len = i32::from_le_bytes(len_buf);

    if !(10..=MAX_FRAME_LEN).contains(&len) {
        return Err(ConsoleError::Protocol(format!("length de frame inválido: {}", len)));
    }

    let mut body = vec![0u8; len as usize];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| ConsoleError::Io(e.to_string()))?;
    decode_body(&body)
}

// ============================================================================
// TESTES
// ============================================================================
