//! # Módulo de Extração - JSONPath Restrito e Filtros
//!
//! Este módulo implementa a navegação em valores JSON usada em três
//! lugares: a ação `extract_with_jsonpath`, a resolução de caminhos
//! pontilhados dentro de expressões de referência, e `filter_entities`.
//!
//! ## Para todos entenderem:
//!
//! Depois de capturar o inventário de um jogador, você quer só o id do
//! primeiro item. Em vez de escrever código, você escreve um caminho:
//!
//! ```text
//! Capturado: { "items": [ { "slot": 0, "id": "diamond_sword" } ] }
//! Caminho:   $.items[0].id
//! Resultado: "diamond_sword"
//! ```
//!
//! ## Subconjunto suportado (fechado):
//!
//! | Forma                       | Exemplo                          |
//! |-----------------------------|----------------------------------|
//! | Raiz                        | `$`                              |
//! | Chave pontilhada            | `$.items`, `items.count`         |
//! | Índice de array             | `$.items[0]`                     |
//! | Wildcard de array           | `$.items[*]`                     |
//! | Filtro (um único predicado) | `$.entities[?(@.type == 'cow')]` |
//!
//! Qualquer coisa fora disso é erro de parse do caminho: melhor rejeitar
//! cedo do que devolver silenciosamente o valor errado.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

// ============================================================================
// API PÚBLICA
// ============================================================================

/// Avalia um caminho JSONPath restrito contra um valor.
///
/// Retorna o valor casado, ou uma lista de casamentos quando o caminho
/// passa por `[*]` ou por um filtro.
pub fn extract_jsonpath(value: &Value, path: &str) -> Result<Value> {
    let clean = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    navigate_path(value, clean)
}

/// Navega um caminho pontilhado/indexado já sem o prefixo `$.`.
pub fn navigate_path(value: &Value, path: &str) -> Result<Value> {
    if path.is_empty() {
        return Ok(value.clone());
    }

    let mut current = value.clone();
    for segment in split_path(path)? {
        current = navigate_segment(&current, &segment)?;
    }
    Ok(current)
}

/// Retém os itens de uma lista cujo campo `filter_field` é igual a
/// `filter_value`. Itens sem o campo são descartados.
pub fn filter_entities(list: &Value, filter_field: &str, filter_value: &str) -> Result<Value> {
    let items = list
        .as_array()
        .ok_or_else(|| anyhow!("filter_entities espera uma lista, recebeu: {}", type_name(list)))?;

    let kept: Vec<Value> = items
        .iter()
        .filter(|item| {
            item.get(filter_field)
                .map(|v| match v {
                    Value::String(s) => s == filter_value,
                    other => other.to_string() == filter_value,
                })
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    Ok(Value::Array(kept))
}

// ============================================================================
// SEGMENTAÇÃO DO CAMINHO
// ============================================================================

/// Um segmento do caminho após o split.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Chave de objeto: `items`
    Key(String),
    /// Índice de array: `[0]`
    Index(usize),
    /// Todos os elementos: `[*]`
    Wildcard,
    /// Predicado de igualdade: `[?(@.type == 'cow')]`
    Filter { key: String, literal: String },
}

/// Divide um caminho em segmentos, respeitando colchetes.
///
/// Exemplo: `entities[?(@.type == 'cow')][0].name` →
/// `[Key(entities), Filter{type,cow}, Index(0), Key(name)]`
fn split_path(path: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(current.clone()));
                    current.clear();
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(current.clone()));
                    current.clear();
                }
                let mut inner = String::new();
                let mut closed = false;
                for nc in chars.by_ref() {
                    if nc == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(nc);
                }
                if !closed {
                    bail!("colchete sem fechamento no caminho '{}'", path);
                }
                segments.push(parse_bracket(&inner, path)?);
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }

    Ok(segments)
}

/// Interpreta o conteúdo de um par de colchetes.
fn parse_bracket(inner: &str, full_path: &str) -> Result<Segment> {
    let inner = inner.trim();

    if inner == "*" {
        return Ok(Segment::Wildcard);
    }

    if let Some(predicate) = inner.strip_prefix("?(").and_then(|s| s.strip_suffix(')')) {
        // Predicado único: @.KEY == 'LITERAL'
        let body = predicate.trim();
        let rest = body
            .strip_prefix("@.")
            .ok_or_else(|| anyhow!("filtro deve começar com '@.': '{}'", body))?;
        let (key, literal) = rest
            .split_once("==")
            .ok_or_else(|| anyhow!("filtro suporta apenas '==': '{}'", body))?;
        let literal = literal.trim();
        let literal = literal
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| literal.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .unwrap_or(literal);
        return Ok(Segment::Filter {
            key: key.trim().to_string(),
            literal: literal.to_string(),
        });
    }

    let index: usize = inner
        .parse()
        .map_err(|_| anyhow!("índice de array inválido '{}' em '{}'", inner, full_path))?;
    Ok(Segment::Index(index))
}

// ============================================================================
// NAVEGAÇÃO
// ============================================================================

fn navigate_segment(value: &Value, segment: &Segment) -> Result<Value> {
    match segment {
        Segment::Key(key) => match value {
            Value::Object(map) => map
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow!("campo '{}' não encontrado no objeto", key)),
            // Depois de um wildcard/filtro a navegação continua elemento
            // a elemento.
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(navigate_segment(item, segment)?);
                }
                Ok(Value::Array(out))
            }
            other => Err(anyhow!(
                "esperado objeto para acessar '{}', encontrado: {}",
                key,
                type_name(other)
            )),
        },
        Segment::Index(index) => match value {
            Value::Array(items) => items.get(*index).cloned().ok_or_else(|| {
                anyhow!("índice {} fora dos limites (array tem {} elementos)", index, items.len())
            }),
            other => Err(anyhow!("esperado array para [{}], encontrado: {}", index, type_name(other))),
        },
        Segment::Wildcard => match value {
            Value::Array(items) => Ok(Value::Array(items.clone())),
            other => Err(anyhow!("esperado array para [*], encontrado: {}", type_name(other))),
        },
        Segment::Filter { key, literal } => match value {
            Value::Array(items) => {
                let kept: Vec<Value> = items
                    .iter()
                    .filter(|item| {
                        item.get(key)
                            .map(|v| match v {
                                Value::String(s) => s == literal,
                                other => other.to_string() == *literal,
                            })
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                Ok(Value::Array(kept))
            }
            other => Err(anyhow!("esperado array para filtro, encontrado: {}", type_name(other))),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTES
// ============================================================================
