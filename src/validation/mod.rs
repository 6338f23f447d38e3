//! # Módulo de Validação de Stories
//!
//! Valida uma story depois do parse e revalida cada ação no momento da
//! execução, já com as referências materializadas.
//!
//! ## Por que validar duas vezes?
//!
//! 1. **No parse**: campos obrigatórios ausentes são erro imediato
//!    (o parser constrói a união etiquetada, então um `spawn_entity` sem
//!    `entityType` nem chega a virar uma ação).
//! 2. **Na execução**: um campo pode existir no YAML mas materializar
//!    vazio (`player: "${nome}"` onde `nome` resolveu para `""`). A
//!    segunda chance pega exatamente isso, antes de tocar a rede.
//!
//! ## Validações de story:
//!
//! - step-ids únicos dentro da story inteira (as quatro seções);
//! - padrões de regex de `wait_for_chat_message` e `expectMatches`
//!   compilam.

use std::collections::HashSet;
use thiserror::Error;

use crate::story::{Action, ActionKind, Story};

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Erros de validação de story.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// O mesmo step-id aparece duas vezes. O step-output store é um mapa
    /// por id; duplicata silenciosa sobrescreveria evidência.
    #[error("step-id '{step_id}' duplicado (seções {first} e {second})")]
    DuplicateStepId {
        step_id: String,
        first: String,
        second: String,
    },

    /// Campo obrigatório materializou vazio na hora de executar.
    #[error("ação '{action}': campo obrigatório '{field}' está vazio após resolução")]
    EmptyMaterializedField { action: String, field: String },

    /// Regex de espera ou validador não compila.
    #[error("ação '{action}': padrão '{pattern}' não é uma regex válida: {reason}")]
    InvalidPattern {
        action: String,
        pattern: String,
        reason: String,
    },
}

/// Resultado da validação: ou tudo certo, ou TODOS os problemas
/// encontrados (não paramos no primeiro, o operador corrige de uma vez).
pub type ValidationResult = Result<(), Vec<ValidationError>>;

// ============================================================================
// VALIDAÇÃO DE STORY
// ============================================================================

/// Valida uma story inteira após o parse.
pub fn validate_story(story: &Story) -> ValidationResult {
    let mut errors = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut first_section: std::collections::HashMap<&str, &'static str> =
        std::collections::HashMap::new();

    let sections: [(&'static str, &[Action]); 3] = [
        ("setup", &story.setup),
        ("steps", &story.steps),
        ("cleanup", &story.cleanup),
    ];

    for (section, actions) in sections {
        for action in actions {
            if let Some(id) = &action.id {
                if !seen.insert(id.as_str()) {
                    errors.push(ValidationError::DuplicateStepId {
                        step_id: id.clone(),
                        first: first_section.get(id.as_str()).copied().unwrap_or("?").to_string(),
                        second: section.to_string(),
                    });
                } else {
                    first_section.insert(id.as_str(), section);
                }
            }

            validate_patterns(action, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Regexes precisam compilar antes da execução começar.
fn validate_patterns(action: &Action, errors: &mut Vec<ValidationError>) {
    if let ActionKind::WaitForChatMessage { pattern, .. } = &action.kind {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(ValidationError::InvalidPattern {
                action: action.display_name(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }
    if let Some(pattern) = &action.expect_matches {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(ValidationError::InvalidPattern {
                action: action.display_name(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }
}

// ============================================================================
// SEGUNDA CHANCE (VALORES MATERIALIZADOS)
// ============================================================================

/// Revalida uma ação cujos campos já passaram pela resolução de
/// referências. Campos obrigatórios de texto não podem estar vazios.
pub fn validate_materialized(action: &Action) -> Result<(), ValidationError> {
    let check = |field: &'static str, value: &str| -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            Err(ValidationError::EmptyMaterializedField {
                action: action.display_name(),
                field: field.to_string(),
            })
        } else {
            Ok(())
        }
    };

    match &action.kind {
        ActionKind::ExecuteRconCommand { command, .. }
        | ActionKind::ExecuteRconWithCapture { command, .. }
        | ActionKind::ExecuteRconRaw { command } => check("command", command),

        ActionKind::MakeOperator { player }
        | ActionKind::ClearInventory { player }
        | ActionKind::KillPlayer { player }
        | ActionKind::HealPlayer { player }
        | ActionKind::ConnectPlayer { player }
        | ActionKind::DisconnectPlayer { player }
        | ActionKind::GetPlayerPosition { player }
        | ActionKind::GetPlayerHealth { player }
        | ActionKind::GetPlayerInventory { player }
        | ActionKind::GetPlayerEquipment { player }
        | ActionKind::GetEntities { player }
        | ActionKind::GetEntitiesInView { player } => check("player", player),

        ActionKind::GiveItem { player, item, .. }
        | ActionKind::RemoveItem { player, item, .. }
        | ActionKind::EquipItem { player, item, .. } => {
            check("player", player)?;
            check("item", item)
        }

        ActionKind::SendChatMessage { player, message } => {
            check("player", player)?;
            check("message", message)
        }

        ActionKind::ExecutePlayerCommand { player, command }
        | ActionKind::ExecutePlayerRaw { player, command } => {
            check("player", player)?;
            check("command", command)
        }

        ActionKind::SpawnEntity { entity, entity_type, .. } => {
            check("entity", entity)?;
            check("entityType", entity_type)
        }

        ActionKind::KillEntity { entity }
        | ActionKind::GetEntityHealth { entity }
        | ActionKind::WaitForEntitySpawn { entity, .. } => check("entity", entity),

        ActionKind::SetEntityHealth { entity, .. }
        | ActionKind::DamageEntity { entity, .. } => check("entity", entity),

        ActionKind::GetEntityByName { player, entity } => {
            check("player", player)?;
            check("entity", entity)
        }

        ActionKind::SetWeather { weather, .. } => check("weather", weather),

        ActionKind::CompareStates { state1, state2 }
        | ActionKind::PrintStateComparison { state1, state2 } => {
            check("state1", state1)?;
            check("state2", state2)
        }

        ActionKind::ExtractWithJsonpath { source_variable, json_path } => {
            check("sourceVariable", source_variable)?;
            check("jsonPath", json_path)
        }

        ActionKind::FilterEntities { source_variable, filter_type, .. } => {
            check("sourceVariable", source_variable)?;
            check("filterType", filter_type)
        }

        ActionKind::PrintStoredState { source_variable } => {
            check("sourceVariable", source_variable)
        }

        // Sem campos de texto obrigatórios.
        _ => Ok(()),
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{BackendKind, Location};

    fn story_with_steps(steps: Vec<Action>) -> Story {
        Story {
            name: "test".to_string(),
            description: None,
            backend: BackendKind::Console,
            setup: vec![],
            steps,
            assertions: vec![],
            cleanup: vec![],
        }
    }

    fn step_with_id(id: &str) -> Action {
        let mut action = Action::of(ActionKind::GetWorldTime);
        action.id = Some(id.to_string());
        action
    }

    #[test]
    fn test_valid_story() {
        let story = story_with_steps(vec![step_with_id("a"), step_with_id("b")]);
        assert!(validate_story(&story).is_ok());
    }

    #[test]
    fn test_empty_sections_are_legal() {
        let story = story_with_steps(vec![]);
        assert!(validate_story(&story).is_ok());
    }

    #[test]
    fn test_duplicate_step_id() {
        let story = story_with_steps(vec![step_with_id("x"), step_with_id("x")]);
        let errors = validate_story(&story).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("duplicado"));
    }

    #[test]
    fn test_duplicate_across_sections() {
        let mut story = story_with_steps(vec![step_with_id("s1")]);
        story.cleanup.push(step_with_id("s1"));
        let errors = validate_story(&story).unwrap_err();
        assert!(errors[0].to_string().contains("s1"));
    }

    #[test]
    fn test_invalid_wait_pattern() {
        let action = Action::of(ActionKind::WaitForChatMessage {
            pattern: "[unclosed".to_string(),
            timeout_ms: None,
        });
        let story = story_with_steps(vec![action]);
        let errors = validate_story(&story).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidPattern { .. }));
    }

    #[test]
    fn test_materialized_empty_player_rejected() {
        let action = Action::of(ActionKind::ConnectPlayer { player: "".to_string() });
        let err = validate_materialized(&action).unwrap_err();
        assert!(err.to_string().contains("player"));
    }

    #[test]
    fn test_materialized_whitespace_command_rejected() {
        let action = Action::of(ActionKind::ExecuteRconRaw { command: "   ".to_string() });
        assert!(validate_materialized(&action).is_err());
    }

    #[test]
    fn test_materialized_ok() {
        let action = Action::of(ActionKind::SpawnEntity {
            entity: "z1".to_string(),
            entity_type: "minecraft:zombie".to_string(),
            location: Location { x: 100.0, y: 64.0, z: 100.0 },
            equipment: None,
        });
        assert!(validate_materialized(&action).is_ok());
    }
}
