//! # Módulo de Diff Semântico de JSON
//!
//! Compara dois valores JSON estruturalmente e produz a lista de
//! operações que levam de um ao outro, no espírito de RFC 6902:
//! entradas `added`, `removed` e `changed`, com caminhos pontilhados
//! (`entities[0].name`).
//!
//! ## Para todos entenderem:
//!
//! O orquestrador captura o inventário antes e depois de dar um item.
//! Este módulo responde "o que mudou?":
//!
//! ```text
//! antes:  { "items": [] }
//! depois: { "items": [{ "id": "diamond_sword" }] }
//! diff:   added: items[0] = { "id": "diamond_sword" }
//! ```
//!
//! ## Regras de normalização:
//!
//! - Espaço em branco é irrelevante (comparamos valores, não texto).
//! - Ordem de chaves de objeto é irrelevante.
//! - Ordem de arrays É relevante (inventários têm slots posicionais).
//! - Números inteiros e floats equivalentes (1 vs 1.0) são iguais.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

// ============================================================================
// RESULTADO DO DIFF
// ============================================================================

/// Um valor presente em apenas um dos lados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Caminho pontilhado até o valor (`items[0].id`).
    pub path: String,
    /// O valor adicionado ou removido.
    pub value: Value,
}

/// Um valor presente nos dois lados, com conteúdos diferentes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub path: String,
    pub from: Value,
    pub to: Value,
}

/// Resultado completo de uma comparação de estados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    /// true quando os dois lados são estruturalmente iguais.
    pub equal: bool,
    /// Presentes só no lado direito (novo).
    pub added: Vec<DiffEntry>,
    /// Presentes só no lado esquerdo (antigo).
    pub removed: Vec<DiffEntry>,
    /// Presentes nos dois, com valores diferentes.
    pub changed: Vec<ChangeEntry>,
}

impl StateDiff {
    /// Serializa para `serde_json::Value`, a forma que entra no
    /// step-output store.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// NORMALIZAÇÃO
// ============================================================================

/// Normaliza um valor JSON: floats que representam inteiros exatos viram
/// inteiros, recursivamente. Depois disso, igualdade de `Value` é a
/// igualdade estrutural que queremos.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
                    return Value::Number(Number::from(f as i64));
                }
            }
            Value::Number(n.clone())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), normalize(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Igualdade estrutural normalizada.
pub fn normalized_eq(a: &Value, b: &Value) -> bool {
    normalize(a) == normalize(b)
}

// ============================================================================
// DIFF
// ============================================================================

/// Computa o diff semântico entre dois estados.
pub fn semantic_diff(before: &Value, after: &Value) -> StateDiff {
    let before = normalize(before);
    let after = normalize(after);

    let mut diff = StateDiff {
        equal: true,
        added: Vec::new(),
        removed: Vec::new(),
        changed: Vec::new(),
    };
    walk("", &before, &after, &mut diff);
    diff.equal = diff.added.is_empty() && diff.removed.is_empty() && diff.changed.is_empty();
    diff
}

fn walk(path: &str, before: &Value, after: &Value, diff: &mut StateDiff) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, bv) in b {
                let child = join_key(path, key);
                match a.get(key) {
                    Some(av) => walk(&child, bv, av, diff),
                    None => diff.removed.push(DiffEntry {
                        path: child,
                        value: bv.clone(),
                    }),
                }
            }
            for (key, av) in a {
                if !b.contains_key(key) {
                    diff.added.push(DiffEntry {
                        path: join_key(path, key),
                        value: av.clone(),
                    });
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            let common = b.len().min(a.len());
            for i in 0..common {
                walk(&format!("{}[{}]", path, i), &b[i], &a[i], diff);
            }
            for (i, bv) in b.iter().enumerate().skip(common) {
                diff.removed.push(DiffEntry {
                    path: format!("{}[{}]", path, i),
                    value: bv.clone(),
                });
            }
            for (i, av) in a.iter().enumerate().skip(common) {
                diff.added.push(DiffEntry {
                    path: format!("{}[{}]", path, i),
                    value: av.clone(),
                });
            }
        }
        (b, a) => {
            if b != a {
                diff.changed.push(ChangeEntry {
                    path: path.to_string(),
                    from: b.clone(),
                    to: a.clone(),
                });
            }
        }
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_values_produce_empty_diff() {
        let state = json!({"items": [{"id": "stone", "count": 1}]});
        let diff = semantic_diff(&state, &state);
        assert!(diff.equal);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert!(semantic_diff(&a, &b).equal);
    }

    #[test]
    fn test_integer_float_equivalence() {
        assert!(normalized_eq(&json!(1), &json!(1.0)));
        assert!(!normalized_eq(&json!(1), &json!(1.5)));
        assert!(semantic_diff(&json!({"hp": 20}), &json!({"hp": 20.0})).equal);
    }

    #[test]
    fn test_array_order_is_relevant() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        let diff = semantic_diff(&a, &b);
        assert!(!diff.equal);
        assert_eq!(diff.changed.len(), 2);
    }

    #[test]
    fn test_added_item_path() {
        let before = json!({"items": []});
        let after = json!({"items": [{"id": "diamond_sword"}]});
        let diff = semantic_diff(&before, &after);
        assert!(!diff.equal);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, "items[0]");
        assert_eq!(diff.added[0].value, json!({"id": "diamond_sword"}));
    }

    #[test]
    fn test_removed_key() {
        let before = json!({"a": 1, "b": 2});
        let after = json!({"a": 1});
        let diff = semantic_diff(&before, &after);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].path, "b");
    }

    #[test]
    fn test_changed_nested_value() {
        let before = json!({"entities": [{"name": "z1", "health": 20.0}]});
        let after = json!({"entities": [{"name": "z1", "health": 12.5}]});
        let diff = semantic_diff(&before, &after);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].path, "entities[0].health");
        assert_eq!(diff.changed[0].from, json!(20));
        assert_eq!(diff.changed[0].to, json!(12.5));
    }

    #[test]
    fn test_type_change_is_a_change() {
        let diff = semantic_diff(&json!({"v": "1"}), &json!({"v": 1}));
        assert_eq!(diff.changed.len(), 1);
    }

    #[test]
    fn test_roundtrip_normalization() {
        // normalize(serialize(V)) deve ser estável por des/re-serialização.
        let v = json!({"a": [1.0, {"b": "x"}], "c": null});
        let text = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(normalize(&v), normalize(&back));
    }
}
