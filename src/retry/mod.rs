//! # Módulo de Reconexão com Backoff
//!
//! Política de reconexão usada pelos backends quando o transporte cai.
//!
//! ## Para todos entenderem:
//!
//! O servidor de jogo às vezes reinicia o listener do console no meio de
//! uma suite. Em vez de falhar a story inteira na hora, o backend dono
//! da conexão tenta reconectar de forma preguiçosa: no PRÓXIMO comando,
//! com até `max_attempts` tentativas e espera crescente entre elas.
//!
//! ## Backoff exponencial com teto e jitter:
//!
//! ```text
//! tentativa 1: base_ms
//! tentativa 2: base_ms × fator
//! tentativa 3: base_ms × fator²   (nunca passa de max_ms)
//! ```
//!
//! O jitter (até 20% para cima) evita que múltiplos runners martelem o
//! servidor no mesmo instante depois de uma queda.
//!
//! Esgotadas as tentativas, o erro vira `BackendTransport` e sobe para o
//! registro do step.

use rand::Rng;
use std::time::Duration;

// ============================================================================
// POLÍTICA
// ============================================================================

/// Política de reconexão de um backend.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Máximo de tentativas de reconexão (incluindo a primeira).
    pub max_attempts: u32,
    /// Espera base antes da segunda tentativa.
    pub base_backoff_ms: u64,
    /// Multiplicador aplicado a cada tentativa.
    pub backoff_factor: f64,
    /// Teto da espera entre tentativas.
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            backoff_factor: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl ReconnectPolicy {
    /// Espera antes da tentativa `attempt` (1-based). A primeira
    /// tentativa não espera.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        let raw = self.base_backoff_ms as f64 * self.backoff_factor.powi(exp as i32);
        let capped = raw.min(self.max_backoff_ms as f64);
        // Jitter: até +20%.
        let jitter = rand::thread_rng().gen_range(0.0..=0.2);
        Duration::from_millis((capped * (1.0 + jitter)) as u64)
    }

    /// Espera assíncrona antes da tentativa `attempt`.
    pub async fn wait_before(&self, attempt: u32) {
        let delay = self.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "aguardando antes de reconectar");
            tokio::time::sleep(delay).await;
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_has_no_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            base_backoff_ms: 100,
            backoff_factor: 2.0,
            max_backoff_ms: 60_000,
        };
        // Com jitter de até 20%, cada faixa é [base, base*1.2].
        let d2 = policy.delay_for_attempt(2).as_millis() as u64;
        let d3 = policy.delay_for_attempt(3).as_millis() as u64;
        let d4 = policy.delay_for_attempt(4).as_millis() as u64;
        assert!((100..=120).contains(&d2), "d2={}", d2);
        assert!((200..=240).contains(&d3), "d3={}", d3);
        assert!((400..=480).contains(&d4), "d4={}", d4);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_backoff_ms: 1_000,
            backoff_factor: 10.0,
            max_backoff_ms: 2_000,
        };
        let d = policy.delay_for_attempt(9).as_millis() as u64;
        assert!(d <= 2_400, "d={}", d); // teto + jitter máximo
    }

    #[test]
    fn test_default_matches_contract() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
    }
}
