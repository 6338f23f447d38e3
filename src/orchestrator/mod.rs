//! # Orquestrador de Stories
//!
//! O interpretador em estágios que executa uma story contra exatamente
//! um backend: setup → steps → assertions → cleanup, nessa ordem, com
//! cleanup garantido mesmo quando tudo antes falhou.
//!
//! ## O ciclo de cada step:
//!
//! ```text
//! ┌────────────┐  ┌───────────┐  ┌──────────┐  ┌───────────┐
//! │ 1. Resolve │→ │ 2. Snapshot│→ │ 3. Execute│→ │ 4. Valida │
//! │ referências│  │   "antes"  │  │ (deadline)│  │  expect*  │
//! └────────────┘  └───────────┘  └──────────┘  └───────────┘
//!        ┌───────────┐  ┌──────────┐  ┌──────────┐
//!      → │ 5. Snapshot│→ │ 6. Grava │→ │ 7. Emite │
//!        │  "depois"  │  │  stores  │  │ registro │
//!        └───────────┘  └──────────┘  └──────────┘
//! ```
//!
//! ## Regras de execução:
//!
//! - Uma ação em voo por vez, contra um backend por vez.
//! - Toda ação carrega um deadline (padrão 30 s; `duration`/`timeout`
//!   sobrescrevem nas ações de espera). Deadline estourado abandona a
//!   chamada e marca o step como `Timeout`.
//! - Cancelamento externo se comporta como timeout da ação corrente;
//!   o cleanup roda mesmo assim (sem consultar o token).
//! - Referência não resolvida falha SÓ aquela ação; as seguintes
//!   continuam.
//! - `storeAs` grava somente após sucesso; falha deixa o store intacto.

pub mod cancel;

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::backend::{GameBackend, ENTITY_SEARCH_RADIUS, TEST_ENTITY_TAG};
use crate::context::{value_as_string, StoryContext, UnboundReference};
use crate::diff::{normalized_eq, semantic_diff};
use crate::errors::{Channel, ErrorKind, StepError};
use crate::extractors::{extract_jsonpath, filter_entities};
use crate::report::{LogStream, ReportAggregator, StepRecord, StoryRecord};
use crate::story::{
    Action, ActionKind, Assertion, AssertionKind, AssertionOutcome, Comparator, StepStatus, Story,
    TestResult,
};
use crate::validation::validate_materialized;
use cancel::CancelToken;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Knobs do orquestrador.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline padrão por ação, em ms.
    pub default_deadline_ms: u64,
    /// Se true, assertions não são avaliadas quando algum step falhou.
    /// Padrão false: assertions sempre rodam.
    pub skip_assertions_after_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: 30_000,
            skip_assertions_after_failure: false,
        }
    }
}

/// Sono do `wait` de duração zero.
const ZERO_WAIT_TICK_MS: u64 = 50;

/// Intervalo de polling das ações `wait_for_*`.
const POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// FALHA DE EXECUÇÃO
// ============================================================================

/// Falha interna de um step, antes de ganhar nome de ação e canal.
#[derive(Debug)]
struct StepFailure {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
}

impl StepFailure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }
}

impl From<crate::errors::BackendError> for StepFailure {
    fn from(e: crate::errors::BackendError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<UnboundReference> for StepFailure {
    fn from(e: UnboundReference) -> Self {
        Self::new(ErrorKind::ReferenceUnbound, e.to_string())
    }
}

/// Como a execução de uma ação terminou.
enum ExecOutcome {
    Done(Result<Value, StepFailure>),
    TimedOut,
    Cancelled,
}

// ============================================================================
// ORQUESTRADOR
// ============================================================================

/// Executa stories, uma por vez, contra um backend compartilhado.
pub struct Orchestrator<'a> {
    backend: &'a mut dyn GameBackend,
    report: &'a mut ReportAggregator,
    config: OrchestratorConfig,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        backend: &'a mut dyn GameBackend,
        report: &'a mut ReportAggregator,
        config: OrchestratorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            backend,
            report,
            config,
            cancel,
        }
    }

    /// Executa uma story do começo ao fim e anexa o registro à suite.
    pub async fn run_story(&mut self, story: &Story) -> TestResult {
        info!(story = %story.name, backend = %self.backend.backend_type(), "▶ executando story");
        let t0 = Instant::now();
        let server_mark = self.report.server_log.len();
        let client_mark = self.report.client_log.len();

        let mut ctx = StoryContext::new();
        let mut records: Vec<StepRecord> = Vec::new();
        let mut short_circuit = false;

        // Backend pronto antes do setup.
        if let Err(e) = self.backend.initialize().await {
            let failure = StepFailure::from(e);
            records.push(synthetic_record("initialize", Channel::Other, failure));
            short_circuit = true;
        }

        // setup → steps, em ordem de arquivo.
        for actions in [&story.setup, &story.steps] {
            for action in actions {
                if self.cancel.is_cancelled() || short_circuit {
                    records.push(skipped_record(action));
                    continue;
                }
                let record = self
                    .execute_action(action, &mut ctx, server_mark, client_mark, true)
                    .await;
                if !record.passed {
                    let cancelled = record
                        .error
                        .as_ref()
                        .is_some_and(|e| e.kind == ErrorKind::Cancelled);
                    if cancelled || action.fail_on_error.unwrap_or(false) {
                        short_circuit = true;
                    }
                }
                records.push(record);
            }
        }

        // assertions.
        let mut assertion_results: Vec<AssertionOutcome> = Vec::new();
        let any_failed = records.iter().any(|r| !r.passed);
        let skip_assertions = self.cancel.is_cancelled()
            || (self.config.skip_assertions_after_failure && any_failed);

        for assertion in &story.assertions {
            if skip_assertions {
                assertion_results.push(AssertionOutcome {
                    passed: false,
                    message: format!("{}: não avaliada", assertion.display_name()),
                    details: "pulada por falha anterior ou cancelamento".to_string(),
                });
                continue;
            }
            let (record, outcome) = self
                .run_assertion(assertion, &mut ctx, server_mark, client_mark)
                .await;
            assertion_results.push(outcome);
            records.push(record);
        }

        // cleanup: roda SEMPRE, sem consultar o token de cancelamento.
        for action in &story.cleanup {
            let record = self
                .execute_action(action, &mut ctx, server_mark, client_mark, false)
                .await;
            records.push(record);
        }

        // Falha do cleanup interno do backend não mascara (nem muda) o
        // resultado da story; fica registrada no log do servidor.
        if let Err(e) = self.backend.cleanup().await {
            warn!(error = %e, "cleanup do backend falhou");
            self.report
                .server_log
                .append(Channel::Server, format!("cleanup do backend falhou: {}", e));
        }

        // Consolidação.
        let assertions_failed = assertion_results.iter().filter(|a| !a.passed).count();
        let assertions_passed = assertion_results.len() - assertions_failed;
        let success = records.iter().all(|r| r.passed) && assertions_failed == 0;
        let first_error = records
            .iter()
            .filter_map(|r| r.error.as_ref())
            .next()
            .map(|e| e.to_string());

        let logs: Vec<String> = self
            .report
            .server_log
            .text_since(server_mark)
            .lines()
            .chain(self.report.client_log.text_since(client_mark).lines())
            .map(String::from)
            .collect();

        let result = TestResult {
            story_name: story.name.clone(),
            success,
            execution_time_ms: t0.elapsed().as_millis() as u64,
            actions_executed: records
                .iter()
                .filter(|r| r.status != StepStatus::Skipped)
                .count(),
            assertions_passed,
            assertions_failed,
            logs,
            assertion_results,
            error: first_error,
        };

        self.report.push_story(StoryRecord {
            name: story.name.clone(),
            description: story.description.clone(),
            backend: self.backend.backend_type().to_string(),
            passed: success,
            steps: records,
            result: Some(result.clone()),
        });

        info!(
            story = %story.name,
            success,
            elapsed_ms = result.execution_time_ms,
            "{} story finalizada",
            if success { "✅" } else { "❌" }
        );
        result
    }

    // ------------------------------------------------------------------
    // Execução de uma ação (o ciclo de 7 passos)
    // ------------------------------------------------------------------

    async fn execute_action(
        &mut self,
        action: &Action,
        ctx: &mut StoryContext,
        server_mark: usize,
        client_mark: usize,
        honor_cancel: bool,
    ) -> StepRecord {
        let start_time = Utc::now();
        let t0 = Instant::now();
        let mut evidence: Vec<String> = Vec::new();
        let display = action.display_name();
        let channel = action.kind.default_channel();

        // 1. Pré-resolução das referências.
        let resolved = match resolve_action(action, ctx) {
            Ok(resolved) => resolved,
            Err(unbound) => {
                return finish_record(
                    action,
                    start_time,
                    t0,
                    evidence,
                    None,
                    None,
                    Some(StepError::new(
                        ErrorKind::ReferenceUnbound,
                        unbound.to_string(),
                        display,
                        channel,
                    )),
                    None,
                );
            }
        };

        // Segunda chance da validação, agora com valores materializados.
        if let Err(e) = validate_materialized(&resolved) {
            return finish_record(
                action,
                start_time,
                t0,
                evidence,
                None,
                None,
                Some(StepError::new(
                    ErrorKind::ValidationFailed,
                    e.to_string(),
                    display,
                    channel,
                )),
                None,
            );
        }

        // 2. Snapshot "antes" para ações que afetam estado observável.
        let probe = resolved.kind.state_probe();
        let state_before = match &probe {
            Some(p) => self.probe_state(p, &mut evidence).await,
            None => None,
        };

        // 3. Execução, sob deadline (e sob o token fora do cleanup).
        let deadline_ms = deadline_for(&resolved, self.config.default_deadline_ms);
        let env = DispatchEnv {
            server_log: self.report.server_log.clone(),
            client_log: self.report.client_log.clone(),
            server_mark,
            client_mark,
        };

        let outcome = {
            let fut = dispatch(self.backend, &resolved.kind, ctx, &env);
            tokio::pin!(fut);
            let deadline = tokio::time::sleep(Duration::from_millis(deadline_ms));
            tokio::pin!(deadline);
            if honor_cancel {
                let cancel = self.cancel.clone();
                tokio::select! {
                    result = &mut fut => ExecOutcome::Done(result),
                    _ = cancel.cancelled() => ExecOutcome::Cancelled,
                    _ = &mut deadline => ExecOutcome::TimedOut,
                }
            } else {
                tokio::select! {
                    result = &mut fut => ExecOutcome::Done(result),
                    _ = &mut deadline => ExecOutcome::TimedOut,
                }
            }
        };

        let (value, mut error): (Option<Value>, Option<StepError>) = match outcome {
            ExecOutcome::Done(Ok(value)) => (Some(value), None),
            ExecOutcome::Done(Err(failure)) => {
                let mut err = StepError::new(failure.kind, failure.message, display.clone(), channel);
                if let Some(detail) = failure.detail {
                    err = err.with_detail(detail);
                }
                (None, Some(err))
            }
            ExecOutcome::TimedOut => {
                evidence.push(format!("chamada abandonada após {}ms", deadline_ms));
                (
                    None,
                    Some(StepError::new(
                        ErrorKind::Timeout,
                        format!("deadline de {}ms excedido", deadline_ms),
                        display.clone(),
                        channel,
                    )),
                )
            }
            ExecOutcome::Cancelled => (
                None,
                Some(StepError::new(
                    ErrorKind::Cancelled,
                    "execução cancelada externamente",
                    display.clone(),
                    channel,
                )),
            ),
        };

        // 4. Validadores expect* sobre o resultado.
        let mut expected: Option<String> = validators_summary(&resolved);
        let mut actual: Option<String> = value.as_ref().map(value_as_string);
        if error.is_none() {
            let mismatch = value.as_ref().and_then(|v| check_validators(&resolved, v));
            if let Some(mismatch) = mismatch {
                expected = Some(mismatch.expected.clone());
                actual = Some(mismatch.actual.clone());
                if resolved.fail_on_error.unwrap_or(false) {
                    error = Some(StepError::new(
                        ErrorKind::ValidationFailed,
                        mismatch.message,
                        display.clone(),
                        channel,
                    ));
                } else {
                    evidence.push(format!("validador não bateu: {}", mismatch.message));
                }
            }
        }

        // 5. Snapshot "depois" (a mesma leitura do passo 2).
        let state_after = match &probe {
            Some(p) => self.probe_state(p, &mut evidence).await,
            None => None,
        };

        // 6. Gravação nos stores: só após sucesso.
        let passed = error.is_none();
        if let Some(id) = &resolved.id {
            let mut outputs: Map<String, Value> = Map::new();
            outputs.insert(
                "result".to_string(),
                value.clone().unwrap_or(Value::Null),
            );
            outputs.insert(
                "status".to_string(),
                json!(if passed { "passed" } else { "failed" }),
            );
            outputs.insert(
                "message".to_string(),
                json!(error.as_ref().map(|e| e.to_string()).unwrap_or_default()),
            );
            outputs.insert("duration".to_string(), json!(t0.elapsed().as_millis() as u64));
            ctx.record_step(id.clone(), outputs);
        }
        if passed {
            if let (Some(store_as), Some(value)) = (&resolved.store_as, &value) {
                ctx.set_var(store_as.clone(), value.clone());
            }
        }

        // 7. Registro.
        finish_record(
            action,
            start_time,
            t0,
            evidence,
            expected,
            actual,
            error,
            state_before.map(|b| (b, state_after)),
        )
    }

    /// A leitura de snapshot correspondente ao probe da ação.
    async fn probe_state(
        &mut self,
        probe: &crate::story::StateProbe,
        evidence: &mut Vec<String>,
    ) -> Option<Value> {
        use crate::story::StateProbe;
        let result = match probe {
            StateProbe::Inventory(player) => self.backend.get_inventory(player).await,
            StateProbe::Position(player) => self.backend.get_position(player).await,
            StateProbe::EntityHealth(entity) => self
                .backend
                .get_entity_health(entity)
                .await
                .map(|h| json!({ "health": h })),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                evidence.push(format!("snapshot indisponível: {}", e));
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Assertions da seção dedicada
    // ------------------------------------------------------------------

    async fn run_assertion(
        &mut self,
        assertion: &Assertion,
        ctx: &mut StoryContext,
        server_mark: usize,
        client_mark: usize,
    ) -> (StepRecord, AssertionOutcome) {
        let start_time = Utc::now();
        let t0 = Instant::now();
        let display = assertion.display_name();
        let env = DispatchEnv {
            server_log: self.report.server_log.clone(),
            client_log: self.report.client_log.clone(),
            server_mark,
            client_mark,
        };

        let deadline = Duration::from_millis(self.config.default_deadline_ms);
        let outcome = {
            let fut = evaluate_assertion(self.backend, &assertion.kind, ctx, &env);
            tokio::pin!(fut);
            let cancel = self.cancel.clone();
            tokio::select! {
                outcome = &mut fut => outcome,
                _ = cancel.cancelled() => AssertionOutcome {
                    passed: false,
                    message: format!("{}: cancelada", display),
                    details: "cancelamento externo".to_string(),
                },
                _ = tokio::time::sleep(deadline) => AssertionOutcome {
                    passed: false,
                    message: format!("{}: deadline excedido", display),
                    details: format!("sem resposta em {}ms", deadline.as_millis()),
                },
            }
        };

        let error = if outcome.passed {
            None
        } else {
            Some(StepError::new(
                ErrorKind::AssertionFailed,
                outcome.message.clone(),
                display.clone(),
                Channel::Op,
            ))
        };

        let now = Utc::now();
        let record = StepRecord {
            name: display,
            action: assertion.kind.token().to_string(),
            action_channel: Channel::Op,
            expected: None,
            actual: Some(outcome.details.clone()),
            passed: outcome.passed,
            status: if outcome.passed { StepStatus::Passed } else { StepStatus::Failed },
            evidence: vec![outcome.message.clone()],
            state_before: None,
            state_after: None,
            error,
            start_time,
            end_time: now,
            duration_ms: t0.elapsed().as_millis() as u64,
        };
        (record, outcome)
    }
}

// ============================================================================
// REGISTROS AUXILIARES
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn finish_record(
    action: &Action,
    start_time: chrono::DateTime<Utc>,
    t0: Instant,
    evidence: Vec<String>,
    expected: Option<String>,
    actual: Option<String>,
    error: Option<StepError>,
    states: Option<(Value, Option<Value>)>,
) -> StepRecord {
    let (state_before, state_after) = match states {
        Some((before, after)) => (Some(before), after),
        None => (None, None),
    };
    let passed = error.is_none();
    StepRecord {
        name: action.display_name(),
        action: describe_action(&action.kind),
        action_channel: action.kind.default_channel(),
        expected,
        actual,
        passed,
        status: if passed { StepStatus::Passed } else { StepStatus::Failed },
        evidence,
        state_before,
        state_after,
        error,
        start_time,
        end_time: Utc::now(),
        duration_ms: t0.elapsed().as_millis() as u64,
    }
}

fn skipped_record(action: &Action) -> StepRecord {
    let now = Utc::now();
    StepRecord {
        name: action.display_name(),
        action: describe_action(&action.kind),
        action_channel: action.kind.default_channel(),
        expected: None,
        actual: None,
        passed: false,
        status: StepStatus::Skipped,
        evidence: vec!["não executado: seção interrompida".to_string()],
        state_before: None,
        state_after: None,
        error: None,
        start_time: now,
        end_time: now,
        duration_ms: 0,
    }
}

fn synthetic_record(name: &str, channel: Channel, failure: StepFailure) -> StepRecord {
    let now = Utc::now();
    let mut err = StepError::new(failure.kind, failure.message, name, channel);
    if let Some(detail) = failure.detail {
        err = err.with_detail(detail);
    }
    StepRecord {
        name: name.to_string(),
        action: name.to_string(),
        action_channel: channel,
        expected: None,
        actual: None,
        passed: false,
        status: StepStatus::Failed,
        evidence: Vec::new(),
        state_before: None,
        state_after: None,
        error: Some(err),
        start_time: now,
        end_time: now,
        duration_ms: 0,
    }
}

/// Descrição curta da ação para relatórios: token + alvo principal.
fn describe_action(kind: &ActionKind) -> String {
    let token = kind.token();
    let target = match kind {
        ActionKind::ExecuteRconCommand { command, .. }
        | ActionKind::ExecuteRconWithCapture { command, .. }
        | ActionKind::ExecuteRconRaw { command } => Some(command.clone()),
        ActionKind::SpawnEntity { entity, entity_type, .. } => {
            Some(format!("{} ({})", entity, entity_type))
        }
        ActionKind::GiveItem { player, item, count } => {
            Some(format!("{} {} x{}", player, item, count))
        }
        ActionKind::SendChatMessage { player, .. }
        | ActionKind::ConnectPlayer { player }
        | ActionKind::DisconnectPlayer { player }
        | ActionKind::GetPlayerPosition { player }
        | ActionKind::GetPlayerInventory { player }
        | ActionKind::GetPlayerHealth { player } => Some(player.clone()),
        ActionKind::GetEntityHealth { entity }
        | ActionKind::KillEntity { entity } => Some(entity.clone()),
        ActionKind::CompareStates { state1, state2 } => Some(format!("{} vs {}", state1, state2)),
        ActionKind::Wait { duration_ms } => Some(format!("{}ms", duration_ms)),
        ActionKind::WaitForChatMessage { pattern, .. } => Some(pattern.clone()),
        _ => None,
    };
    match target {
        Some(t) => format!("{} {}", token, t),
        None => token.to_string(),
    }
}

/// Deadline da ação: `timeout`/`duration` nas esperas, padrão no resto.
fn deadline_for(action: &Action, default_ms: u64) -> u64 {
    match &action.kind {
        ActionKind::Wait { duration_ms } => duration_ms + 1_000,
        ActionKind::WaitForEntitySpawn { timeout_ms, .. }
        | ActionKind::WaitForChatMessage { timeout_ms, .. } => timeout_ms.unwrap_or(default_ms),
        _ => default_ms,
    }
}

// ============================================================================
// RESOLUÇÃO DE REFERÊNCIAS NA AÇÃO
// ============================================================================

/// Substitui toda expressão de referência nos campos de texto da ação,
/// no momento da execução. Campos numéricos não carregam referências.
fn resolve_action(action: &Action, ctx: &StoryContext) -> Result<Action, UnboundReference> {
    let s = |input: &str| -> Result<String, UnboundReference> {
        Ok(value_as_string(&ctx.resolve_str(input)?))
    };
    let opt = |input: &Option<String>| -> Result<Option<String>, UnboundReference> {
        match input {
            Some(text) => Ok(Some(value_as_string(&ctx.resolve_str(text)?))),
            None => Ok(None),
        }
    };

    use ActionKind::*;
    let kind = match &action.kind {
        ExecuteRconCommand { command, args } => ExecuteRconCommand {
            command: s(command)?,
            args: args.iter().map(|a| s(a)).collect::<Result<_, _>>()?,
        },
        ExecuteRconWithCapture { command, args } => ExecuteRconWithCapture {
            command: s(command)?,
            args: args.iter().map(|a| s(a)).collect::<Result<_, _>>()?,
        },
        ExecuteRconRaw { command } => ExecuteRconRaw { command: s(command)? },
        MakeOperator { player } => MakeOperator { player: s(player)? },
        GiveItem { player, item, count } => GiveItem {
            player: s(player)?,
            item: s(item)?,
            count: *count,
        },
        RemoveItem { player, item, count } => RemoveItem {
            player: s(player)?,
            item: s(item)?,
            count: *count,
        },
        ClearInventory { player } => ClearInventory { player: s(player)? },
        SetSpawnPoint { player, location } => SetSpawnPoint {
            player: s(player)?,
            location: *location,
        },
        TeleportPlayer { player, location } => TeleportPlayer {
            player: s(player)?,
            location: *location,
        },
        GamemodeChange { player, value } => GamemodeChange {
            player: s(player)?,
            value: s(value)?,
        },
        KillPlayer { player } => KillPlayer { player: s(player)? },
        HealPlayer { player } => HealPlayer { player: s(player)? },
        SetPlayerHealth { player, value } => SetPlayerHealth {
            player: s(player)?,
            value: *value,
        },
        SpawnEntity { entity, entity_type, location, equipment } => SpawnEntity {
            entity: s(entity)?,
            entity_type: s(entity_type)?,
            location: *location,
            equipment: equipment.clone(),
        },
        KillEntity { entity } => KillEntity { entity: s(entity)? },
        SetEntityHealth { entity, value } => SetEntityHealth {
            entity: s(entity)?,
            value: *value,
        },
        GetEntityHealth { entity } => GetEntityHealth { entity: s(entity)? },
        DamageEntity { entity, value } => DamageEntity {
            entity: s(entity)?,
            value: *value,
        },
        RemoveEntities { entity_type } => RemoveEntities {
            entity_type: opt(entity_type)?,
        },
        SetWeather { weather, duration } => SetWeather {
            weather: s(weather)?,
            duration: *duration,
        },
        ConnectPlayer { player } => ConnectPlayer { player: s(player)? },
        DisconnectPlayer { player } => DisconnectPlayer { player: s(player)? },
        SendChatMessage { player, message } => SendChatMessage {
            player: s(player)?,
            message: s(message)?,
        },
        ExecutePlayerCommand { player, command } => ExecutePlayerCommand {
            player: s(player)?,
            command: s(command)?,
        },
        ExecutePlayerRaw { player, command } => ExecutePlayerRaw {
            player: s(player)?,
            command: s(command)?,
        },
        MovePlayer { player, location } => MovePlayer {
            player: s(player)?,
            location: *location,
        },
        EquipItem { player, item, slot } => EquipItem {
            player: s(player)?,
            item: s(item)?,
            slot: opt(slot)?,
        },
        GetPlayerPosition { player } => GetPlayerPosition { player: s(player)? },
        GetPlayerHealth { player } => GetPlayerHealth { player: s(player)? },
        GetPlayerInventory { player } => GetPlayerInventory { player: s(player)? },
        GetPlayerEquipment { player } => GetPlayerEquipment { player: s(player)? },
        GetEntities { player } => GetEntities { player: s(player)? },
        GetEntitiesInView { player } => GetEntitiesInView { player: s(player)? },
        GetEntityByName { player, entity } => GetEntityByName {
            player: s(player)?,
            entity: s(entity)?,
        },
        WaitForEntitySpawn { entity, timeout_ms } => WaitForEntitySpawn {
            entity: s(entity)?,
            timeout_ms: *timeout_ms,
        },
        WaitForChatMessage { pattern, timeout_ms } => WaitForChatMessage {
            pattern: s(pattern)?,
            timeout_ms: *timeout_ms,
        },
        StoreState { value } => StoreState {
            value: ctx.resolve_value(value)?,
        },
        PrintStoredState { source_variable } => PrintStoredState {
            source_variable: s(source_variable)?,
        },
        CompareStates { state1, state2 } => CompareStates {
            state1: s(state1)?,
            state2: s(state2)?,
        },
        PrintStateComparison { state1, state2 } => PrintStateComparison {
            state1: s(state1)?,
            state2: s(state2)?,
        },
        ExtractWithJsonpath { source_variable, json_path } => ExtractWithJsonpath {
            source_variable: s(source_variable)?,
            json_path: s(json_path)?,
        },
        FilterEntities { source_variable, filter_type, filter_value } => FilterEntities {
            source_variable: s(source_variable)?,
            filter_type: s(filter_type)?,
            filter_value: s(filter_value)?,
        },
        Assert(kind) => Assert(resolve_assertion_kind(kind, ctx)?),
        // Sem campos de texto.
        GetWorldTime => GetWorldTime,
        GetWeather => GetWeather,
        SetTime { value } => SetTime { value: *value },
        Wait { duration_ms } => Wait { duration_ms: *duration_ms },
        CheckServiceHealth => CheckServiceHealth,
    };

    let mut resolved = action.clone();
    resolved.kind = kind;
    resolved.expect = resolve_opt(&action.expect, ctx)?;
    resolved.expect_contains = resolve_opt(&action.expect_contains, ctx)?;
    resolved.expect_not_contains = resolve_opt(&action.expect_not_contains, ctx)?;
    // expectMatches é uma regex: referência dentro dela é resolvida, o
    // padrão em si fica como está.
    resolved.expect_matches = resolve_opt(&action.expect_matches, ctx)?;
    Ok(resolved)
}

fn resolve_opt(
    input: &Option<String>,
    ctx: &StoryContext,
) -> Result<Option<String>, UnboundReference> {
    match input {
        Some(text) => Ok(Some(value_as_string(&ctx.resolve_str(text)?))),
        None => Ok(None),
    }
}

fn resolve_assertion_kind(
    kind: &AssertionKind,
    ctx: &StoryContext,
) -> Result<AssertionKind, UnboundReference> {
    let s = |input: &str| -> Result<String, UnboundReference> {
        Ok(value_as_string(&ctx.resolve_str(input)?))
    };
    use AssertionKind::*;
    Ok(match kind {
        EntityHealth { entity, condition, value } => EntityHealth {
            entity: s(entity)?,
            condition: *condition,
            value: *value,
        },
        EntityExists { entity, expected } => EntityExists {
            entity: s(entity)?,
            expected: *expected,
        },
        EntityMissing { entity } => EntityMissing { entity: s(entity)? },
        PlayerInventory { player, item, slot, expected } => PlayerInventory {
            player: s(player)?,
            item: s(item)?,
            slot: slot.as_ref().map(|sl| s(sl)).transpose()?,
            expected: *expected,
        },
        PlayerHasItem { player, item } => PlayerHasItem {
            player: s(player)?,
            item: s(item)?,
        },
        ResponseContains { source, contains } => ResponseContains {
            source: s(source)?,
            contains: s(contains)?,
        },
        LogContains { contains } => LogContains { contains: s(contains)? },
        JsonEquals { source, expected } => JsonEquals {
            source: s(source)?,
            expected: ctx.resolve_value(expected)?,
        },
        Condition { expression } => Condition {
            // A expressão resolve referências na avaliação, não aqui.
            expression: expression.clone(),
        },
    })
}

// ============================================================================
// VALIDADORES expect*
// ============================================================================

struct ValidatorMismatch {
    message: String,
    expected: String,
    actual: String,
}

fn validators_summary(action: &Action) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(v) = &action.expect {
        parts.push(format!("== '{}'", v));
    }
    if let Some(v) = &action.expect_contains {
        parts.push(format!("contém '{}'", v));
    }
    if let Some(v) = &action.expect_matches {
        parts.push(format!("casa /{}/", v));
    }
    if let Some(v) = &action.expect_not_contains {
        parts.push(format!("não contém '{}'", v));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" e "))
    }
}

fn check_validators(action: &Action, value: &Value) -> Option<ValidatorMismatch> {
    if !action.has_validators() {
        return None;
    }
    let actual = value_as_string(value);

    if let Some(expected) = &action.expect {
        if &actual != expected {
            return Some(ValidatorMismatch {
                message: format!("esperava exatamente '{}'", expected),
                expected: expected.clone(),
                actual,
            });
        }
    }
    if let Some(needle) = &action.expect_contains {
        if !actual.contains(needle.as_str()) {
            return Some(ValidatorMismatch {
                message: format!("esperava conter '{}'", needle),
                expected: format!("contém '{}'", needle),
                actual,
            });
        }
    }
    if let Some(pattern) = &action.expect_matches {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&actual) {
                    return Some(ValidatorMismatch {
                        message: format!("esperava casar com /{}/", pattern),
                        expected: format!("/{}/", pattern),
                        actual,
                    });
                }
            }
            Err(e) => {
                return Some(ValidatorMismatch {
                    message: format!("regex inválida /{}/: {}", pattern, e),
                    expected: format!("/{}/", pattern),
                    actual,
                });
            }
        }
    }
    if let Some(needle) = &action.expect_not_contains {
        if actual.contains(needle.as_str()) {
            return Some(ValidatorMismatch {
                message: format!("esperava NÃO conter '{}'", needle),
                expected: format!("não contém '{}'", needle),
                actual,
            });
        }
    }
    None
}

// ============================================================================
// DESPACHO PARA O BACKEND
// ============================================================================

/// Streams de log visíveis durante o despacho (esperas de chat leem
/// deles; o marcador limita a busca ao começo da story).
struct DispatchEnv {
    server_log: LogStream,
    client_log: LogStream,
    server_mark: usize,
    client_mark: usize,
}

/// Roteia uma ação para exatamente uma operação de backend (ou para uma
/// operação interna do orquestrador) e devolve o resultado como JSON.
async fn dispatch(
    backend: &mut dyn GameBackend,
    kind: &ActionKind,
    ctx: &StoryContext,
    env: &DispatchEnv,
) -> Result<Value, StepFailure> {
    use ActionKind::*;
    match kind {
        // --- plano do servidor ---
        ExecuteRconCommand { command, args } | ExecuteRconWithCapture { command, args } => {
            let reply = backend.execute_console(command, args).await?;
            Ok(Value::String(reply))
        }
        ExecuteRconRaw { command } => {
            let reply = backend.execute_console_raw(command).await?;
            Ok(Value::String(reply))
        }
        MakeOperator { player } => {
            backend.make_operator(player).await?;
            Ok(json!(true))
        }
        GiveItem { player, item, count } => {
            backend.give_item(player, item, *count).await?;
            Ok(json!(true))
        }
        RemoveItem { player, item, count } => {
            backend.remove_item(player, item, *count).await?;
            Ok(json!(true))
        }
        ClearInventory { player } => {
            backend.clear_inventory(player).await?;
            Ok(json!(true))
        }
        SetSpawnPoint { player, location } => {
            backend
                .set_spawn_point(player, location.x, location.y, location.z)
                .await?;
            Ok(json!(true))
        }
        TeleportPlayer { player, location } => {
            backend
                .teleport(player, location.x, location.y, location.z)
                .await?;
            Ok(json!(true))
        }
        GamemodeChange { player, value } => {
            backend.gamemode(player, value).await?;
            Ok(json!(true))
        }
        KillPlayer { player } => {
            backend.kill_player(player).await?;
            Ok(json!(true))
        }
        HealPlayer { player } => {
            backend.heal_player(player).await?;
            Ok(json!(true))
        }
        SetPlayerHealth { player, value } => {
            backend.set_player_health(player, *value).await?;
            Ok(json!(true))
        }
        SpawnEntity { entity, entity_type, location, equipment } => {
            let full_name = backend
                .spawn_entity(
                    entity,
                    entity_type,
                    location.x,
                    location.y,
                    location.z,
                    equipment.as_ref(),
                )
                .await?;
            Ok(json!({ "entity": entity, "worldName": full_name }))
        }
        KillEntity { entity } => {
            backend.kill_entity(entity).await?;
            Ok(json!(true))
        }
        SetEntityHealth { entity, value } => {
            backend.set_entity_health(entity, *value).await?;
            Ok(json!(true))
        }
        GetEntityHealth { entity } => {
            let health = backend.get_entity_health(entity).await?;
            Ok(json!(health))
        }
        DamageEntity { entity, value } => {
            backend.damage_entity(entity, *value).await?;
            Ok(json!(true))
        }
        RemoveEntities { entity_type } => {
            match entity_type {
                None => backend.remove_all_test_entities().await?,
                Some(entity_type) => {
                    let selector = format!(
                        "@e[type={},tag={},distance=..{}]",
                        entity_type, TEST_ENTITY_TAG, ENTITY_SEARCH_RADIUS
                    );
                    backend.execute_console("kill", &[selector]).await?;
                }
            }
            Ok(json!(true))
        }
        SetWeather { weather, duration } => {
            backend.set_weather(weather, *duration).await?;
            Ok(json!(true))
        }
        SetTime { value } => {
            backend.set_time(*value).await?;
            Ok(json!(true))
        }
        GetWorldTime => {
            let time = backend.get_world_time().await?;
            Ok(json!(time))
        }
        GetWeather => {
            let weather = backend.get_weather().await?;
            Ok(Value::String(weather))
        }

        // --- plano do cliente ---
        ConnectPlayer { player } => Ok(backend.connect_player(player).await?),
        DisconnectPlayer { player } => Ok(backend.disconnect_player(player).await?),
        SendChatMessage { player, message } => Ok(backend.send_chat(player, message).await?),
        ExecutePlayerCommand { player, command } => {
            Ok(backend.execute_player_command(player, command).await?)
        }
        // "Raw" vai como linha de chat literal (pode começar com /).
        ExecutePlayerRaw { player, command } => Ok(backend.send_chat(player, command).await?),
        MovePlayer { player, location } => {
            Ok(backend
                .move_player(player, location.x, location.y, location.z)
                .await?)
        }
        EquipItem { player, item, slot } => {
            Ok(backend.equip(player, item, slot.as_deref()).await?)
        }
        GetPlayerPosition { player } => Ok(backend.get_position(player).await?),
        GetPlayerHealth { player } => Ok(backend.get_health(player).await?),
        GetPlayerInventory { player } => Ok(backend.get_inventory(player).await?),
        GetPlayerEquipment { player } => Ok(backend.get_equipment(player).await?),
        GetEntities { player } | GetEntitiesInView { player } => {
            Ok(backend.get_entities(player).await?)
        }
        GetEntityByName { player, entity } => {
            let all = backend.get_entities(player).await?;
            let wanted_world = crate::backend::test_entity_name(entity);
            let found = all
                .get("entities")
                .and_then(Value::as_array)
                .and_then(|list| {
                    list.iter()
                        .find(|e| {
                            e.get("name").and_then(Value::as_str).is_some_and(|n| {
                                n == entity || n == wanted_world
                            })
                        })
                        .cloned()
                });
            Ok(found.unwrap_or(Value::Null))
        }

        // --- esperas ---
        Wait { duration_ms } => {
            let sleep_ms = if *duration_ms == 0 { ZERO_WAIT_TICK_MS } else { *duration_ms };
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            Ok(json!({ "waited_ms": sleep_ms }))
        }
        WaitForEntitySpawn { entity, .. } => {
            // O deadline da ação é quem limita este loop.
            loop {
                if backend.entity_exists(entity).await? {
                    return Ok(json!(true));
                }
                tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
        WaitForChatMessage { pattern, .. } => {
            let re = regex::Regex::new(pattern).map_err(|e| {
                StepFailure::new(ErrorKind::ValidationFailed, format!("regex inválida: {}", e))
            })?;
            loop {
                let haystack = format!(
                    "{}\n{}",
                    env.client_log.text_since(env.client_mark),
                    env.server_log.text_since(env.server_mark)
                );
                if let Some(found) = haystack.lines().find(|line| re.is_match(line)) {
                    return Ok(json!({ "matched": found }));
                }
                tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
        CheckServiceHealth => {
            let healthy = backend.check_service_health().await?;
            Ok(json!(healthy))
        }

        // --- estado e dados ---
        StoreState { value } => Ok(value.clone()),
        PrintStoredState { source_variable } => {
            let value = ctx.get_var(source_variable).ok_or_else(|| {
                StepFailure::new(
                    ErrorKind::ReferenceUnbound,
                    format!("variável '{}' não existe", source_variable),
                )
            })?;
            info!(variable = %source_variable, value = %value, "estado armazenado");
            Ok(value.clone())
        }
        CompareStates { state1, state2 } | PrintStateComparison { state1, state2 } => {
            let left = ctx
                .resolve_operand(state1)
                .map_err(StepFailure::from)?;
            let right = ctx
                .resolve_operand(state2)
                .map_err(StepFailure::from)?;
            let diff = semantic_diff(&left, &right);
            if matches!(kind, PrintStateComparison { .. }) {
                info!(
                    equal = diff.equal,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    changed = diff.changed.len(),
                    "comparação de estados"
                );
            }
            Ok(diff.to_value())
        }
        ExtractWithJsonpath { source_variable, json_path } => {
            let source = ctx.resolve_operand(source_variable).map_err(StepFailure::from)?;
            extract_jsonpath(&source, json_path).map_err(|e| {
                StepFailure::new(ErrorKind::ValidationFailed, format!("extração falhou: {}", e))
            })
        }
        FilterEntities { source_variable, filter_type, filter_value } => {
            let source = ctx.resolve_operand(source_variable).map_err(StepFailure::from)?;
            // Aceita tanto a lista nua quanto o objeto de get_entities.
            let list = source.get("entities").cloned().unwrap_or(source);
            filter_entities(&list, filter_type, filter_value).map_err(|e| {
                StepFailure::new(ErrorKind::ValidationFailed, format!("filtro falhou: {}", e))
            })
        }

        // --- assertions embutidas em steps ---
        Assert(assert_kind) => {
            let outcome = evaluate_assertion(backend, assert_kind, ctx, env).await;
            if outcome.passed {
                Ok(json!({
                    "passed": true,
                    "message": outcome.message,
                    "details": outcome.details,
                }))
            } else {
                Err(StepFailure {
                    kind: ErrorKind::AssertionFailed,
                    message: outcome.message,
                    detail: Some(outcome.details),
                })
            }
        }
    }
}

// ============================================================================
// AVALIAÇÃO DE ASSERTIONS
// ============================================================================

async fn evaluate_assertion(
    backend: &mut dyn GameBackend,
    kind: &AssertionKind,
    ctx: &StoryContext,
    env: &DispatchEnv,
) -> AssertionOutcome {
    match kind {
        AssertionKind::EntityHealth { entity, condition, value } => {
            match backend.get_entity_health(entity).await {
                Ok(actual) => {
                    let passed = condition.eval_f64(actual, *value);
                    outcome(
                        passed,
                        format!("vida de '{}' {} {}", entity, condition, value),
                        format!("observado: {}", actual),
                    )
                }
                Err(e) => error_outcome(format!("vida de '{}'", entity), e),
            }
        }
        AssertionKind::EntityExists { entity, expected } => {
            match backend.entity_exists(entity).await {
                Ok(actual) => outcome(
                    actual == *expected,
                    format!("entidade '{}' existe == {}", entity, expected),
                    format!("observado: {}", actual),
                ),
                Err(e) => error_outcome(format!("existência de '{}'", entity), e),
            }
        }
        AssertionKind::EntityMissing { entity } => match backend.entity_exists(entity).await {
            Ok(actual) => outcome(
                !actual,
                format!("entidade '{}' não existe", entity),
                format!("observado: existe == {}", actual),
            ),
            Err(e) => error_outcome(format!("existência de '{}'", entity), e),
        },
        AssertionKind::PlayerInventory { player, item, slot, expected } => {
            match backend.get_inventory(player).await {
                Ok(inventory) => {
                    let found = inventory_contains(&inventory, item, slot.as_deref());
                    outcome(
                        found == *expected,
                        format!("inventário de '{}' contém '{}' == {}", player, item, expected),
                        format!("observado: {}", found),
                    )
                }
                Err(e) => error_outcome(format!("inventário de '{}'", player), e),
            }
        }
        AssertionKind::PlayerHasItem { player, item } => {
            match backend.get_inventory(player).await {
                Ok(inventory) => {
                    let found = inventory_contains(&inventory, item, None);
                    outcome(
                        found,
                        format!("'{}' tem o item '{}'", player, item),
                        format!("observado: {}", found),
                    )
                }
                Err(e) => error_outcome(format!("inventário de '{}'", player), e),
            }
        }
        AssertionKind::ResponseContains { source, contains } => {
            let resolved = match ctx.resolve_str(source) {
                Ok(value) => value_as_string(&value),
                Err(e) => {
                    return outcome(false, format!("source de resposta: {}", e), String::new())
                }
            };
            let passed = resolved.contains(contains.as_str());
            outcome(
                passed,
                format!("resposta contém '{}'", contains),
                format!("source: {}", truncate_details(&resolved)),
            )
        }
        AssertionKind::LogContains { contains } => {
            let log = env.server_log.text_since(env.server_mark);
            let passed = log.contains(contains.as_str());
            outcome(
                passed,
                format!("log do servidor contém '{}'", contains),
                format!("{} linhas inspecionadas", log.lines().count()),
            )
        }
        AssertionKind::JsonEquals { source, expected } => {
            let actual = match ctx.resolve_operand(source) {
                Ok(value) => value,
                Err(e) => {
                    return outcome(false, format!("source de JSON: {}", e), String::new());
                }
            };
            let passed = normalized_eq(&actual, expected);
            outcome(
                passed,
                "JSON igual ao esperado".to_string(),
                format!(
                    "observado: {}",
                    truncate_details(&actual.to_string())
                ),
            )
        }
        AssertionKind::Condition { expression } => evaluate_condition(expression, ctx),
    }
}

fn outcome(passed: bool, message: String, details: String) -> AssertionOutcome {
    AssertionOutcome {
        passed,
        message,
        details,
    }
}

fn error_outcome(what: String, e: crate::errors::BackendError) -> AssertionOutcome {
    AssertionOutcome {
        passed: false,
        message: format!("{}: leitura falhou", what),
        details: e.to_string(),
    }
}

fn truncate_details(s: &str) -> String {
    if s.chars().count() <= 300 {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(300).collect::<String>())
    }
}

/// O inventário do bridge contém o item (no slot dado, se houver)?
fn inventory_contains(inventory: &Value, item: &str, slot: Option<&str>) -> bool {
    let Some(items) = inventory.get("items").and_then(Value::as_array) else {
        return false;
    };
    items.iter().any(|entry| {
        let id_matches = entry
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| id == item || id.ends_with(&format!(":{}", item)));
        let slot_matches = match slot {
            None => true,
            Some(slot) => entry
                .get("slot")
                .map(|s| value_as_string(s) == slot)
                .unwrap_or(false),
        };
        id_matches && slot_matches
    })
}

// ============================================================================
// AVALIADOR DE EXPRESSÕES SIMPLES (assert_condition)
// ============================================================================

/// Gramática fechada: `expr := atom (OP atom)?`;
/// `atom := número | string entre aspas | referência`;
/// `OP ∈ {==, !=, <, <=, >, >=}`. Sem aninhamento, sem combinadores.
/// Qualquer coisa fora disso reprova a assertion com o erro de parse.
fn evaluate_condition(expression: &str, ctx: &StoryContext) -> AssertionOutcome {
    match parse_condition(expression, ctx) {
        Ok(passed) => outcome(
            passed,
            format!("condição '{}'", expression.trim()),
            format!("avaliada como {}", passed),
        ),
        Err(e) => outcome(
            false,
            format!("condição '{}' inválida", expression.trim()),
            e,
        ),
    }
}

fn parse_condition(expression: &str, ctx: &StoryContext) -> Result<bool, String> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err("expressão vazia".to_string());
    }

    // Procura o operador fora de aspas. Os de dois caracteres primeiro.
    let operators = ["==", "!=", "<=", ">=", "<", ">"];
    let mut split: Option<(usize, &str)> = None;
    let mut in_quotes: Option<char> = None;
    let bytes: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match in_quotes {
            Some(q) if c == q => in_quotes = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => in_quotes = Some(c),
            None => {
                let rest: String = bytes[i..].iter().collect();
                if let Some(op) = operators.iter().find(|op| rest.starts_with(**op)) {
                    split = Some((i, *op));
                    break;
                }
            }
        }
        i += 1;
    }

    let Some((at, op)) = split else {
        // Sem operador: um único atom que deve ser booleano.
        let atom = parse_atom(expr, ctx)?;
        return match atom {
            Atom::Str(s) if s == "true" => Ok(true),
            Atom::Str(s) if s == "false" => Ok(false),
            other => Err(format!("expressão sem operador não é booleana: {:?}", other)),
        };
    };

    let left = parse_atom(expr[..at].trim(), ctx)?;
    let right = parse_atom(expr[at + op.len()..].trim(), ctx)?;

    let comparator = Comparator::parse(op).ok_or_else(|| format!("operador '{}' inválido", op))?;

    // Operandos numéricos comparam como números, o resto como strings.
    match (&left, &right) {
        (Atom::Num(a), Atom::Num(b)) => Ok(comparator.eval_f64(*a, *b)),
        _ => {
            let a = left.as_str();
            let b = right.as_str();
            Ok(match comparator {
                Comparator::Eq => a == b,
                Comparator::Ne => a != b,
                Comparator::Lt => a < b,
                Comparator::Le => a <= b,
                Comparator::Gt => a > b,
                Comparator::Ge => a >= b,
            })
        }
    }
}

#[derive(Debug)]
enum Atom {
    Num(f64),
    Str(String),
}

impl Atom {
    fn as_str(&self) -> String {
        match self {
            Atom::Num(n) => n.to_string(),
            Atom::Str(s) => s.clone(),
        }
    }
}

fn parse_atom(text: &str, ctx: &StoryContext) -> Result<Atom, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("atom vazio".to_string());
    }

    // String entre aspas.
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return Ok(Atom::Str(text[1..text.len() - 1].to_string()));
        }
    }

    // Referência.
    if text.contains('{') {
        let value = ctx
            .resolve_str(text)
            .map_err(|e| format!("referência não resolvida: {}", e))?;
        return Ok(match value {
            Value::Number(n) => Atom::Num(n.as_f64().unwrap_or(f64::NAN)),
            other => {
                let s = value_as_string(&other);
                match s.parse::<f64>() {
                    Ok(n) => Atom::Num(n),
                    Err(_) => Atom::Str(s),
                }
            }
        });
    }

    // Número.
    if let Ok(n) = text.parse::<f64>() {
        return Ok(Atom::Num(n));
    }

    // Identificador nu (true/false ou nome de variável direto).
    if text == "true" || text == "false" {
        return Ok(Atom::Str(text.to_string()));
    }
    if let Some(value) = ctx.get_var(text) {
        return Ok(match value {
            Value::Number(n) => Atom::Num(n.as_f64().unwrap_or(f64::NAN)),
            other => Atom::Str(value_as_string(other)),
        });
    }

    Err(format!("atom '{}' não reconhecido", text))
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// Backend de mentira, roteirizável, que grava tudo que foi chamado.
    #[derive(Default)]
    struct MockBackend {
        calls: Arc<Mutex<Vec<String>>>,
        /// Entidades "vivas" por nome local.
        entities: HashSet<String>,
        entity_health: HashMap<String, f64>,
        /// Inventário por jogador (formato do bridge).
        inventories: HashMap<String, Value>,
        /// Simula o backend console-only: plano do cliente indisponível.
        console_only: bool,
        /// Respostas de console fixas por comando.
        console_replies: HashMap<String, String>,
    }

    impl MockBackend {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn client_plane(&self, operation: &str) -> Result<(), BackendError> {
            if self.console_only {
                Err(BackendError::CapabilityUnavailable {
                    operation: operation.to_string(),
                    backend: "console".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl GameBackend for MockBackend {
        async fn initialize(&mut self) -> Result<(), BackendError> {
            self.record("initialize");
            Ok(())
        }

        async fn cleanup(&mut self) -> Result<(), BackendError> {
            self.record("cleanup");
            // Como nos backends reais: entidades de teste somem.
            self.entities.clear();
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            if self.console_only { "console" } else { "playersim" }
        }

        async fn execute_console(&mut self, cmd: &str, args: &[String]) -> Result<String, BackendError> {
            let composed = crate::backend::compose_command(cmd, args);
            self.record(format!("console:{}", composed));
            Ok(self
                .console_replies
                .get(&composed)
                .cloned()
                .unwrap_or_else(|| format!("ok:{}", composed)))
        }

        async fn execute_console_raw(&mut self, text: &str) -> Result<String, BackendError> {
            self.record(format!("raw:{}", text));
            Ok(format!("ok:{}", text))
        }

        async fn spawn_entity(
            &mut self,
            local_name: &str,
            entity_type: &str,
            _x: f64,
            _y: f64,
            _z: f64,
            _equipment: Option<&BTreeMap<String, String>>,
        ) -> Result<String, BackendError> {
            self.record(format!("spawn:{}:{}", local_name, entity_type));
            self.entities.insert(local_name.to_string());
            self.entity_health.insert(local_name.to_string(), 20.0);
            Ok(crate::backend::test_entity_name(local_name))
        }

        async fn entity_exists(&mut self, local_name: &str) -> Result<bool, BackendError> {
            self.record(format!("exists:{}", local_name));
            Ok(self.entities.contains(local_name))
        }

        async fn get_entity_health(&mut self, local_name: &str) -> Result<f64, BackendError> {
            self.entity_health
                .get(local_name)
                .copied()
                .ok_or_else(|| BackendError::Protocol(format!("entidade '{}' sem vida", local_name)))
        }

        async fn set_entity_health(&mut self, local_name: &str, health: f64) -> Result<(), BackendError> {
            self.entity_health.insert(local_name.to_string(), health);
            Ok(())
        }

        async fn kill_entity(&mut self, local_name: &str) -> Result<(), BackendError> {
            self.entities.remove(local_name);
            Ok(())
        }

        async fn damage_entity(&mut self, local_name: &str, amount: f64) -> Result<(), BackendError> {
            if let Some(h) = self.entity_health.get_mut(local_name) {
                *h -= amount;
            }
            Ok(())
        }

        async fn give_item(&mut self, player: &str, item: &str, count: u32) -> Result<(), BackendError> {
            self.record(format!("give:{}:{}:{}", player, item, count));
            let inventory = self
                .inventories
                .entry(player.to_string())
                .or_insert_with(|| json!({ "items": [], "size": 36 }));
            if let Some(items) = inventory.get_mut("items").and_then(Value::as_array_mut) {
                items.push(json!({ "slot": items.len(), "id": item, "count": count }));
            }
            Ok(())
        }

        async fn remove_item(&mut self, _player: &str, _item: &str, _count: u32) -> Result<(), BackendError> {
            Ok(())
        }

        async fn clear_inventory(&mut self, player: &str) -> Result<(), BackendError> {
            self.inventories
                .insert(player.to_string(), json!({ "items": [], "size": 36 }));
            Ok(())
        }

        async fn make_operator(&mut self, player: &str) -> Result<(), BackendError> {
            self.record(format!("op:{}", player));
            Ok(())
        }

        async fn teleport(&mut self, _p: &str, _x: f64, _y: f64, _z: f64) -> Result<(), BackendError> {
            Ok(())
        }

        async fn gamemode(&mut self, _p: &str, _m: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn set_spawn_point(&mut self, _p: &str, _x: f64, _y: f64, _z: f64) -> Result<(), BackendError> {
            Ok(())
        }

        async fn kill_player(&mut self, _p: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn heal_player(&mut self, _p: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn set_player_health(&mut self, _p: &str, _v: f64) -> Result<(), BackendError> {
            Ok(())
        }

        async fn set_weather(&mut self, _k: &str, _s: Option<u64>) -> Result<(), BackendError> {
            Ok(())
        }

        async fn set_time(&mut self, _t: i64) -> Result<(), BackendError> {
            Ok(())
        }

        async fn get_world_time(&mut self) -> Result<i64, BackendError> {
            Ok(6000)
        }

        async fn get_weather(&mut self) -> Result<String, BackendError> {
            Ok("clear".to_string())
        }

        async fn remove_all_test_entities(&mut self) -> Result<(), BackendError> {
            self.record("remove_all_test_entities");
            self.entities.clear();
            Ok(())
        }

        async fn remove_all_test_players(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn connect_player(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("connect_player")?;
            self.record(format!("connect:{}", name));
            Ok(json!({ "connected": true, "uuid": "u-1" }))
        }

        async fn disconnect_player(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("disconnect_player")?;
            self.record(format!("disconnect:{}", name));
            Ok(json!({ "disconnected": true }))
        }

        async fn send_chat(&mut self, name: &str, message: &str) -> Result<Value, BackendError> {
            self.client_plane("send_chat")?;
            self.record(format!("chat:{}:{}", name, message));
            Ok(json!({ "sent": true, "messageId": "m-1" }))
        }

        async fn execute_player_command(&mut self, name: &str, command: &str) -> Result<Value, BackendError> {
            self.client_plane("execute_player_command")?;
            self.record(format!("pcmd:{}:{}", name, command));
            Ok(json!({ "executed": true, "chatMessage": "" }))
        }

        async fn move_player(&mut self, name: &str, x: f64, y: f64, z: f64) -> Result<Value, BackendError> {
            self.client_plane("move_player")?;
            self.record(format!("move:{}", name));
            Ok(json!({ "x": x, "y": y, "z": z }))
        }

        async fn equip(&mut self, name: &str, item: &str, _slot: Option<&str>) -> Result<Value, BackendError> {
            self.client_plane("equip")?;
            self.record(format!("equip:{}:{}", name, item));
            Ok(json!({ "equipped": true }))
        }

        async fn use_item(&mut self, name: &str, target: &str) -> Result<Value, BackendError> {
            self.client_plane("use_item")?;
            self.record(format!("use:{}:{}", name, target));
            Ok(json!({ "used": true }))
        }

        async fn get_position(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("get_position")?;
            self.record(format!("position:{}", name));
            Ok(json!({
                "x": 100.0, "y": 64.0, "z": 100.0,
                "yaw": 0.0, "pitch": 0.0, "world": "overworld"
            }))
        }

        async fn get_health(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("get_health")?;
            self.record(format!("health:{}", name));
            Ok(json!({ "health": 20.0, "maxHealth": 20.0, "food": 20.0, "saturation": 5.0 }))
        }

        async fn get_inventory(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("get_inventory")?;
            self.record(format!("inventory:{}", name));
            Ok(self
                .inventories
                .get(name)
                .cloned()
                .unwrap_or_else(|| json!({ "items": [], "size": 36 })))
        }

        async fn get_entities(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("get_entities")?;
            self.record(format!("entities:{}", name));
            let entities: Vec<Value> = self
                .entities
                .iter()
                .map(|e| json!({ "id": 1, "type": "minecraft:zombie", "name": e, "x": 0.0, "y": 0.0, "z": 0.0 }))
                .collect();
            Ok(json!({ "entities": entities, "count": entities.len(), "types": {} }))
        }

        async fn get_equipment(&mut self, name: &str) -> Result<Value, BackendError> {
            self.client_plane("get_equipment")?;
            self.record(format!("equipment:{}", name));
            Ok(json!({ "hand": null, "offhand": null, "head": null, "chest": null, "legs": null, "feet": null }))
        }

        async fn check_service_health(&mut self) -> Result<bool, BackendError> {
            Ok(true)
        }
    }

    async fn run(story_yaml: &str, backend: &mut MockBackend) -> (TestResult, ReportAggregator) {
        let story = crate::parser::parse_story(story_yaml).unwrap();
        let mut report = ReportAggregator::new("test-suite");
        let result = Orchestrator::new(
            backend,
            &mut report,
            OrchestratorConfig::default(),
            CancelToken::new(),
        )
        .run_story(&story)
        .await;
        (result, report)
    }

    // ------------------------------------------------------------------
    // Cenário 1: regressão do espaço no fim
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_rcon_command_without_args_transmits_exactly() {
        let yaml = r#"
name: lista
steps:
  - action: execute_rcon_command
    command: list
    id: s1
"#;
        let mut backend = MockBackend::default();
        let (result, _) = run(yaml, &mut backend).await;

        assert!(result.success);
        let calls = backend.calls.lock().unwrap().clone();
        assert!(calls.contains(&"console:list".to_string()));
    }

    // ------------------------------------------------------------------
    // Cenário 2: spawn e leitura de vida
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_spawn_then_health_read() {
        let yaml = r#"
name: zumbi
setup:
  - action: spawn_entity
    entityType: minecraft:zombie
    location: [100, 64, 100]
    name: z1
steps:
  - action: get_entity_health
    entity: z1
    id: hp
    storeAs: zombie_hp
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;

        assert!(result.success, "erro: {:?}", result.error);
        assert!(backend.entities.is_empty(), "cleanup deve remover entidades");

        // result bound no step-output store e no variable store.
        let story = &report.stories[0];
        let hp_step = story.steps.iter().find(|s| s.name == "get_entity_health").unwrap();
        assert!(hp_step.passed);
        assert_eq!(hp_step.actual.as_deref(), Some("20.0"));
    }

    // ------------------------------------------------------------------
    // Cenário 3: comparação de estados
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_state_comparison_detects_given_item() {
        let yaml = r#"
name: inventario
steps:
  - action: get_player_inventory
    player: tester
    storeAs: inv_before
  - action: give_item
    player: tester
    item: diamond_sword
    count: 1
  - action: get_player_inventory
    player: tester
    storeAs: inv_after
  - action: compare_states
    state1: inv_before
    state2: inv_after
    id: cmp
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;
        assert!(result.success, "erro: {:?}", result.error);

        let story = &report.stories[0];
        let cmp = story.steps.iter().find(|s| s.action.starts_with("compare_states")).unwrap();
        assert!(cmp.passed);
        let diff: Value = serde_json::from_str(cmp.actual.as_ref().unwrap()).unwrap();
        assert_eq!(diff["equal"], json!(false));
        let added = diff["added"].as_array().unwrap();
        assert!(added.iter().any(|e| {
            e["path"].as_str().unwrap().contains("items")
                && e["value"].to_string().contains("diamond_sword")
        }));
    }

    // ------------------------------------------------------------------
    // Cenário 4: referências entre steps
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_step_output_reference_resolution() {
        let yaml = r#"
name: referencia
steps:
  - action: get_player_position
    player: tester
    id: p1
  - action: get_player_position
    player: tester
    id: p2
  - action: assert_response_contains
    source: "${{ steps.p1.outputs.result }}"
    contains: world
    id: calc
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;
        assert!(result.success, "erro: {:?}", result.error);

        let story = &report.stories[0];
        let calc = story.steps.iter().find(|s| s.action.contains("assert_response_contains")).unwrap();
        assert!(calc.passed);
    }

    #[tokio::test]
    async fn test_reference_to_unexecuted_step_is_unbound_and_continues() {
        let yaml = r#"
name: unbound
steps:
  - action: store_state
    value: "${{ steps.nunca.outputs.result }}"
    storeAs: x
  - action: get_world_time
    id: t
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;

        assert!(!result.success);
        let story = &report.stories[0];
        assert_eq!(story.steps[0].error.as_ref().unwrap().kind, ErrorKind::ReferenceUnbound);
        // A ação seguinte ainda executa.
        assert!(story.steps[1].passed);
    }

    // ------------------------------------------------------------------
    // Cenário 5: timeout
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_wait_for_chat_times_out_and_execution_continues() {
        let yaml = r#"
name: timeout
steps:
  - action: wait_for_chat_message
    pattern: ".*never.*"
    duration: 300
  - action: get_world_time
    id: depois
cleanup:
  - action: remove_entities
"#;
        let mut backend = MockBackend::default();
        let t0 = Instant::now();
        let (result, report) = run(yaml, &mut backend).await;
        let elapsed = t0.elapsed().as_millis() as u64;

        assert!(!result.success);
        assert!(elapsed >= 300 && elapsed < 2_000, "elapsed={}ms", elapsed);

        let story = &report.stories[0];
        assert_eq!(story.steps[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
        // Steps seguintes e cleanup rodaram.
        assert!(story.steps[1].passed);
        assert!(story.steps.iter().any(|s| s.action.starts_with("remove_entities") && s.passed));
    }

    // ------------------------------------------------------------------
    // Cenário 6: fronteira de capacidade
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_capability_boundary_on_console_backend() {
        let yaml = r#"
name: fronteira
backend: console
steps:
  - action: send_chat_message
    player: p1
    message: oi
"#;
        let mut backend = MockBackend {
            console_only: true,
            ..Default::default()
        };
        let (result, report) = run(yaml, &mut backend).await;

        assert!(!result.success);
        let story = &report.stories[0];
        assert_eq!(
            story.steps[0].error.as_ref().unwrap().kind,
            ErrorKind::CapabilityUnavailable
        );
        // Nenhuma chamada de plano de cliente chegou a ser gravada.
        let calls = backend.calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.starts_with("chat:")));
    }

    // ------------------------------------------------------------------
    // Invariantes universais
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_section_order_and_cleanup_always_runs() {
        let yaml = r#"
name: ordem
setup:
  - action: make_operator
    player: tester
steps:
  - action: execute_rcon_command
    command: quebra
    expect: "nunca vai bater"
    failOnError: true
  - action: execute_rcon_command
    command: nunca_roda
assertions:
  - action: assert_log_contains
    contains: "> quebra"
cleanup:
  - action: remove_entities
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;
        assert!(!result.success);

        let story = &report.stories[0];
        let names: Vec<&str> = story.steps.iter().map(|s| s.action.as_str()).collect();

        // setup → steps → assertions → cleanup, em ordem de arquivo.
        assert!(names[0].starts_with("make_operator"));
        assert!(names[1].starts_with("execute_rcon_command quebra"));
        assert!(names[2].starts_with("execute_rcon_command nunca_roda"));
        assert!(names[3].starts_with("assert_log_contains"));
        assert!(names[4].starts_with("remove_entities"));

        // failOnError=true curto-circuita o step seguinte...
        assert_eq!(story.steps[2].status, StepStatus::Skipped);
        // ...mas o cleanup roda do mesmo jeito.
        assert!(story.steps[4].passed);
        let calls = backend.calls.lock().unwrap().clone();
        assert!(!calls.contains(&"console:nunca_roda".to_string()));
        assert!(calls.contains(&"remove_all_test_entities".to_string()));
    }

    #[tokio::test]
    async fn test_store_as_only_binds_on_success() {
        let yaml = r#"
name: storeAs
steps:
  - action: store_state
    value: "${inexistente}"
    storeAs: falhou
  - action: store_state
    value: 42
    storeAs: ok
  - action: assert_condition
    condition: "${ok} == 42"
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;

        let story = &report.stories[0];
        assert!(!story.steps[0].passed);
        assert!(story.steps[1].passed);
        // A assertion lê ${ok} mas ${falhou} nunca foi gravada.
        assert!(story.steps[2].passed);
        assert!(!result.success); // o primeiro step falhou
    }

    #[tokio::test]
    async fn test_validator_mismatch_without_fail_on_error_does_not_fail_step() {
        let yaml = r#"
name: validador
steps:
  - action: get_world_time
    expectContains: "9999"
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;

        let story = &report.stories[0];
        assert!(story.steps[0].passed, "sem failOnError o step não falha");
        assert!(story.steps[0]
            .evidence
            .iter()
            .any(|e| e.contains("validador não bateu")));
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_validator_mismatch_with_fail_on_error_fails_step() {
        let yaml = r#"
name: validador
steps:
  - action: get_world_time
    expect: "9999"
    failOnError: true
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;

        assert!(!result.success);
        let story = &report.stories[0];
        assert_eq!(
            story.steps[0].error.as_ref().unwrap().kind,
            ErrorKind::ValidationFailed
        );
    }

    #[tokio::test]
    async fn test_zero_duration_wait_is_a_short_tick() {
        let yaml = r#"
name: espera
steps:
  - action: wait
    duration: 0
"#;
        let mut backend = MockBackend::default();
        let t0 = Instant::now();
        let (result, _) = run(yaml, &mut backend).await;
        let elapsed = t0.elapsed().as_millis();

        assert!(result.success);
        assert!(elapsed >= 40 && elapsed <= 200, "elapsed={}ms", elapsed);
    }

    #[tokio::test]
    async fn test_cancellation_skips_steps_but_runs_cleanup() {
        let yaml = r#"
name: cancelada
steps:
  - action: get_world_time
cleanup:
  - action: remove_entities
"#;
        let story = crate::parser::parse_story(yaml).unwrap();
        let mut backend = MockBackend::default();
        let mut report = ReportAggregator::new("test-suite");
        let cancel = CancelToken::new();
        cancel.cancel(); // cancelado antes de começar

        let result = Orchestrator::new(
            &mut backend,
            &mut report,
            OrchestratorConfig::default(),
            cancel,
        )
        .run_story(&story)
        .await;

        assert!(!result.success);
        let story_record = &report.stories[0];
        assert_eq!(story_record.steps[0].status, StepStatus::Skipped);
        // cleanup não consulta o token.
        let cleanup = story_record
            .steps
            .iter()
            .find(|s| s.action.starts_with("remove_entities"))
            .unwrap();
        assert!(cleanup.passed);
    }

    #[tokio::test]
    async fn test_assertion_section_outcomes() {
        let yaml = r#"
name: assertivas
setup:
  - action: spawn_entity
    entityType: minecraft:zombie
    location: [0, 64, 0]
    name: z1
assertions:
  - action: entity_health
    entity: z1
    condition: EQ
    value: 20
  - action: assert_entity_missing
    entity: z1
"#;
        let mut backend = MockBackend::default();
        let (result, _) = run(yaml, &mut backend).await;

        assert!(!result.success);
        assert_eq!(result.assertions_passed, 1);
        assert_eq!(result.assertions_failed, 1);
        assert_eq!(result.assertion_results.len(), 2);
        assert!(result.assertion_results[0].passed);
        assert!(!result.assertion_results[1].passed);
    }

    #[tokio::test]
    async fn test_player_has_item_assertion() {
        let yaml = r#"
name: item
steps:
  - action: give_item
    player: tester
    item: diamond_sword
    count: 1
assertions:
  - action: assert_player_has_item
    player: tester
    item: diamond_sword
"#;
        let mut backend = MockBackend::default();
        let (result, _) = run(yaml, &mut backend).await;
        assert!(result.success, "erro: {:?}", result.error);
    }

    #[tokio::test]
    async fn test_extract_and_filter_pipeline() {
        let yaml = r#"
name: extracao
steps:
  - action: store_state
    value:
      entities:
        - { type: "minecraft:cow", name: "c1" }
        - { type: "minecraft:zombie", name: "z1" }
    storeAs: mundo
  - action: filter_entities
    sourceVariable: mundo
    filterType: type
    filterValue: "minecraft:zombie"
    storeAs: so_zumbis
  - action: extract_with_jsonpath
    sourceVariable: so_zumbis
    jsonPath: "$[0].name"
    storeAs: nome_zumbi
  - action: assert_condition
    condition: "${nome_zumbi} == 'z1'"
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;
        assert!(result.success, "erro: {:?}", result.error);
        assert!(report.stories[0].steps.iter().all(|s| s.passed));
    }

    #[tokio::test]
    async fn test_compare_states_equal_for_same_variable() {
        let yaml = r#"
name: igual
steps:
  - action: store_state
    value: { "a": [1, 2], "b": "x" }
    storeAs: estado
  - action: compare_states
    state1: estado
    state2: estado
    id: cmp
"#;
        let mut backend = MockBackend::default();
        let (result, report) = run(yaml, &mut backend).await;
        assert!(result.success);

        let cmp = report.stories[0]
            .steps
            .iter()
            .find(|s| s.action.starts_with("compare_states"))
            .unwrap();
        let diff: Value = serde_json::from_str(cmp.actual.as_ref().unwrap()).unwrap();
        assert_eq!(diff["equal"], json!(true));
        assert_eq!(diff["added"], json!([]));
        assert_eq!(diff["removed"], json!([]));
        assert_eq!(diff["changed"], json!([]));
    }

    #[tokio::test]
    async fn test_state_snapshots_surround_give_item() {
        let yaml = r#"
name: snapshot
steps:
  - action: give_item
    player: tester
    item: stone
    count: 3
"#;
        let mut backend = MockBackend::default();
        let (_, report) = run(yaml, &mut backend).await;

        let step = &report.stories[0].steps[0];
        let before = step.state_before.as_ref().unwrap();
        let after = step.state_after.as_ref().unwrap();
        assert_eq!(before["items"].as_array().unwrap().len(), 0);
        assert_eq!(after["items"].as_array().unwrap().len(), 1);
    }

    // ------------------------------------------------------------------
    // Avaliador de expressões simples
    // ------------------------------------------------------------------

    #[test]
    fn test_condition_numeric_comparison() {
        let ctx = StoryContext::new();
        assert!(parse_condition("3 < 5", &ctx).unwrap());
        assert!(parse_condition("5 >= 5", &ctx).unwrap());
        assert!(!parse_condition("2 == 3", &ctx).unwrap());
        // Numérico compara como número, não como texto.
        assert!(parse_condition("10 > 9", &ctx).unwrap());
    }

    #[test]
    fn test_condition_string_comparison() {
        let ctx = StoryContext::new();
        assert!(parse_condition("'abc' == 'abc'", &ctx).unwrap());
        assert!(parse_condition("'abc' != 'abd'", &ctx).unwrap());
    }

    #[test]
    fn test_condition_reference_operand() {
        let mut ctx = StoryContext::new();
        ctx.set_var("hp", json!(18.5));
        assert!(parse_condition("${hp} > 10", &ctx).unwrap());
        assert!(!parse_condition("${hp} >= 20", &ctx).unwrap());
    }

    #[test]
    fn test_condition_parse_failures_are_errors() {
        let ctx = StoryContext::new();
        assert!(parse_condition("", &ctx).is_err());
        assert!(parse_condition("1 < 2 < 3", &ctx).is_err()); // sem aninhamento
        assert!(parse_condition("banana", &ctx).is_err());
    }

    #[test]
    fn test_condition_failure_reports_as_failed_assertion() {
        let ctx = StoryContext::new();
        let outcome = evaluate_condition("isto não parseia", &ctx);
        assert!(!outcome.passed);
        assert!(outcome.message.contains("inválida"));
    }

    #[test]
    fn test_inventory_contains_matches_namespaced_ids() {
        let inventory = json!({
            "items": [{ "slot": 0, "id": "minecraft:diamond_sword", "count": 1 }]
        });
        assert!(inventory_contains(&inventory, "diamond_sword", None));
        assert!(inventory_contains(&inventory, "minecraft:diamond_sword", None));
        assert!(inventory_contains(&inventory, "diamond_sword", Some("0")));
        assert!(!inventory_contains(&inventory, "diamond_sword", Some("5")));
        assert!(!inventory_contains(&inventory, "stone", None));
    }
}
