//! # Token de Cancelamento Cooperativo
//!
//! Sinal único, clonável e barato de compartilhar, consultado pelo
//! orquestrador entre steps e "raceado" contra toda chamada de backend
//! em voo. Cancelar uma cópia cancela todas: o estado é compartilhado.
//!
//! Cancelamento externo se comporta como timeout da ação corrente: a
//! chamada em voo é abandonada no próximo ponto de suspensão e o
//! cleanup da story ainda roda.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Token de cancelamento compartilhado.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Cria um token não-cancelado.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinaliza o cancelamento. Idempotente.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// O token já foi cancelado?
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Future que completa quando o token é cancelado. Se já está
    /// cancelado, completa imediatamente.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let resolved = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(resolved);
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("deveria resolver na hora");
    }
}
