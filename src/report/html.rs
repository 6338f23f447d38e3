//! # Renderizador HTML
//!
//! Gera uma página única e auto-contida (CSS embutido, zero requests
//! externos) com a visão mais rica da suite:
//!
//! - diff semântico de JSON entre `stateBefore` e `stateAfter` de cada
//!   step que tem os dois snapshots;
//! - classificação do step por canal (server/client/op/...) via regras
//!   de palavra-chave sobre a string da ação;
//! - marcadores de cor do Minecraft (`§a`, `§c`, ...) convertidos em
//!   spans estilizados dentro das evidências.

use serde_json::Value;

use super::ReportAggregator;
use crate::diff::{semantic_diff, StateDiff};
use crate::errors::Channel;

// ============================================================================
// CLASSIFICAÇÃO DE CANAL
// ============================================================================

/// Classifica a string descritiva de uma ação num canal, por regras de
/// palavra-chave. Usada quando o registro não trouxe o canal de origem
/// (relatórios importados, evidências soltas).
pub fn classify_channel(action: &str) -> Channel {
    let a = action.to_ascii_lowercase();
    if a.contains("mineflayer") {
        return Channel::Mineflayer;
    }
    if a.contains("rcon") || a.contains("console") || a.contains("weather") || a.contains("time")
        || a.contains("entity") || a.contains("summon") || a.contains("spawn")
    {
        return Channel::Server;
    }
    if a.contains("player") || a.contains("chat") || a.contains("connect")
        || a.contains("inventory") || a.contains("move") || a.contains("equip")
    {
        return Channel::Client;
    }
    if a.contains("store") || a.contains("compare") || a.contains("wait")
        || a.contains("extract") || a.contains("filter") || a.contains("assert")
    {
        return Channel::Op;
    }
    Channel::Other
}

// ============================================================================
// CORES DO MINECRAFT
// ============================================================================

/// Converte marcadores `§X` em spans HTML. Códigos de formatação
/// (`§l`, `§o`, ...) viram estilos; `§r` fecha tudo.
pub fn format_minecraft_colors(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open_spans = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '§' {
            if let Some(code) = chars.next() {
                match color_for_code(code) {
                    Some(css) => {
                        out.push_str(&format!("<span style=\"{}\">", css));
                        open_spans += 1;
                    }
                    None if code == 'r' => {
                        while open_spans > 0 {
                            out.push_str("</span>");
                            open_spans -= 1;
                        }
                    }
                    None => {} // código desconhecido: marcador some
                }
                continue;
            }
        }
        push_escaped(&mut out, c);
    }

    while open_spans > 0 {
        out.push_str("</span>");
        open_spans -= 1;
    }
    out
}

fn color_for_code(code: char) -> Option<&'static str> {
    let css = match code.to_ascii_lowercase() {
        '0' => "color:#000000",
        '1' => "color:#0000AA",
        '2' => "color:#00AA00",
        '3' => "color:#00AAAA",
        '4' => "color:#AA0000",
        '5' => "color:#AA00AA",
        '6' => "color:#FFAA00",
        '7' => "color:#AAAAAA",
        '8' => "color:#555555",
        '9' => "color:#5555FF",
        'a' => "color:#55FF55",
        'b' => "color:#55FFFF",
        'c' => "color:#FF5555",
        'd' => "color:#FF55FF",
        'e' => "color:#FFFF55",
        'f' => "color:#FFFFFF",
        'l' => "font-weight:bold",
        'o' => "font-style:italic",
        'n' => "text-decoration:underline",
        'm' => "text-decoration:line-through",
        _ => return None,
    };
    Some(css)
}

// ============================================================================
// PÁGINA
// ============================================================================

const STYLE: &str = r#"
body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 0; background: #f4f5f7; color: #1d2330; }
header { background: #1d2330; color: #fff; padding: 16px 24px; }
header h1 { margin: 0; font-size: 20px; }
.badge { display: inline-block; padding: 2px 10px; border-radius: 10px; font-size: 12px; font-weight: bold; }
.badge.pass { background: #d8f5d8; color: #1c7a2d; }
.badge.fail { background: #fde0e0; color: #b02020; }
.story { background: #fff; margin: 16px 24px; border-radius: 6px; box-shadow: 0 1px 3px rgba(0,0,0,.12); }
.story > h2 { margin: 0; padding: 12px 16px; font-size: 16px; border-bottom: 1px solid #e3e5ea; }
.step { padding: 10px 16px; border-bottom: 1px solid #eef0f3; }
.step:last-child { border-bottom: none; }
.step .meta { color: #70778a; font-size: 12px; }
.channel { font-size: 11px; padding: 1px 8px; border-radius: 8px; background: #e8ebf2; margin-left: 6px; }
.channel.server { background: #e2ecfb; color: #1d4f9c; }
.channel.client { background: #e7f6ec; color: #1c7a2d; }
.channel.op { background: #f4eafa; color: #7a2da0; }
.evidence { font-family: 'SFMono-Regular', Consolas, monospace; font-size: 12px; background: #20242e; color: #d6dae3; border-radius: 4px; padding: 8px 10px; margin: 6px 0; white-space: pre-wrap; }
.diff { font-family: monospace; font-size: 12px; margin: 6px 0; }
.diff .add { color: #1c7a2d; }
.diff .rem { color: #b02020; }
.diff .chg { color: #9c6a1d; }
details summary { cursor: pointer; color: #394866; font-size: 13px; }
"#;

/// Renderiza a página completa.
pub fn render_html(agg: &ReportAggregator) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"pt-BR\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", escape(&agg.suite_name)));
    out.push_str(&format!("<style>{}</style>\n</head>\n<body>\n", STYLE));

    let badge = if agg.suite_passed() {
        "<span class=\"badge pass\">PASSED</span>"
    } else {
        "<span class=\"badge fail\">FAILED</span>"
    };
    out.push_str(&format!(
        "<header><h1>{} {}</h1><div>início {}</div></header>\n",
        escape(&agg.suite_name),
        badge,
        agg.started_at.to_rfc3339()
    ));

    if let Some(err) = &agg.suite_error {
        out.push_str(&format!(
            "<div class=\"story\"><h2>Erro de suite</h2><div class=\"step\">{}</div></div>\n",
            escape(err)
        ));
    }

    for story in &agg.stories {
        let badge = if story.passed {
            "<span class=\"badge pass\">PASS</span>"
        } else {
            "<span class=\"badge fail\">FAIL</span>"
        };
        out.push_str(&format!(
            "<section class=\"story\"><h2>{} {}</h2>\n",
            escape(&story.name),
            badge
        ));

        for step in &story.steps {
            let channel = classify_channel(&step.action);
            out.push_str("<div class=\"step\">");
            out.push_str(&format!(
                "<div><strong>{}</strong><span class=\"channel {}\">{}</span> <span class=\"meta\">{} · {}ms</span></div>",
                escape(&step.name),
                channel,
                channel,
                escape(&step.action),
                step.duration_ms
            ));

            if let Some(err) = &step.error {
                out.push_str(&format!(
                    "<div class=\"evidence\">{}</div>",
                    escape(&err.to_string())
                ));
            }

            if !step.evidence.is_empty() {
                out.push_str("<div class=\"evidence\">");
                for (i, line) in step.evidence.iter().enumerate() {
                    if i > 0 {
                        out.push('\n');
                    }
                    out.push_str(&format_minecraft_colors(line));
                }
                out.push_str("</div>");
            }

            if let (Some(before), Some(after)) = (&step.state_before, &step.state_after) {
                out.push_str(&render_diff_block(before, after));
            }

            out.push_str("</div>\n");
        }
        out.push_str("</section>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

/// Bloco de diff semântico entre os dois snapshots de um step.
fn render_diff_block(before: &Value, after: &Value) -> String {
    let diff = semantic_diff(before, after);
    if diff.equal {
        return "<details><summary>estado inalterado</summary></details>".to_string();
    }
    let mut out = String::from("<details open><summary>mudanças de estado</summary><div class=\"diff\">");
    out.push_str(&render_diff_entries(&diff));
    out.push_str("</div></details>");
    out
}

fn render_diff_entries(diff: &StateDiff) -> String {
    let mut out = String::new();
    for entry in &diff.added {
        out.push_str(&format!(
            "<div class=\"add\">+ {} = {}</div>",
            escape(&entry.path),
            escape(&entry.value.to_string())
        ));
    }
    for entry in &diff.removed {
        out.push_str(&format!(
            "<div class=\"rem\">- {} = {}</div>",
            escape(&entry.path),
            escape(&entry.value.to_string())
        ));
    }
    for entry in &diff.changed {
        out.push_str(&format!(
            "<div class=\"chg\">~ {}: {} → {}</div>",
            escape(&entry.path),
            escape(&entry.from.to_string()),
            escape(&entry.to.to_string())
        ));
    }
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        other => out.push(other),
    }
}
