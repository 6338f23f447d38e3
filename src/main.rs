//! # Story Runner - Orquestrador de Testes de Integração
//!
//! Este é o **ponto de entrada** do runner: o binário que lê stories
//! YAML, dirige um servidor de jogo vivo (e jogadores simulados) e
//! emite relatórios estruturados.
//!
//! ## O que este arquivo faz?
//!
//! 1. **Processa argumentos da linha de comando** (CLI) usando `clap`
//! 2. **Carrega e valida** as stories (YAML)
//! 3. **Inicializa a telemetria** (tracing + OTEL opcional)
//! 4. **Constrói o backend** via fábrica (console ou playersim)
//! 5. **Executa as stories**, uma por vez, com cleanup garantido
//! 6. **Escreve os relatórios** (texto, JSON, JUnit XML, HTML)
//!
//! ## Exemplo de uso:
//!
//! ```bash
//! # Executar uma story
//! story-runner run --file stories/smoke.yaml
//!
//! # Executar uma suite inteira com relatórios em ./reports
//! story-runner run --dir stories/ --output-dir reports
//!
//! # Só validar, sem tocar o servidor
//! story-runner validate --dir stories/
//! ```
//!
//! ## Exit codes:
//!
//! | Código | Significado                                      |
//! |--------|--------------------------------------------------|
//! | 0      | suite passou                                     |
//! | 1      | alguma story ou assertion falhou                 |
//! | 2      | erro de parse/configuração antes da execução     |

mod backend;
mod bridge;
mod context;
mod diff;
mod errors;
mod extractors;
mod loader;
mod orchestrator;
mod parser;
mod rcon;
mod report;
mod retry;
mod story;
mod telemetry;
mod validation;

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use backend::{create_backend, BackendConfig, GameBackend};
use orchestrator::cancel::CancelToken;
use orchestrator::{Orchestrator, OrchestratorConfig};
use report::ReportAggregator;
use retry::ReconnectPolicy;
use story::{BackendKind, Story};
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "story-runner")]
#[command(about = "Orquestrador de testes de integração para plugins de Minecraft", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executa uma story ou uma suite de stories.
    Run {
        /// Arquivo YAML de uma única story.
        #[arg(short, long, conflicts_with = "dir")]
        file: Option<PathBuf>,

        /// Diretório com stories (*.yaml/*.yml), executadas em ordem
        /// alfabética.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Diretório de saída dos relatórios.
        #[arg(long, default_value = "reports")]
        output_dir: PathBuf,

        /// Nome da suite nos relatórios (padrão: nome do arquivo/dir).
        #[arg(long)]
        suite_name: Option<String>,

        /// Força um backend, ignorando o `backend:` das stories.
        #[arg(long)]
        backend: Option<String>,

        /// Endereço host:porta do console (ou RCON_ADDR).
        #[arg(long)]
        console_addr: Option<String>,

        /// Senha do console (ou RCON_PASSWORD).
        #[arg(long)]
        console_password: Option<String>,

        /// URL base do bridge de player-sim (ou BRIDGE_URL).
        #[arg(long)]
        bridge_url: Option<String>,

        /// Timeout de leitura do console, em segundos.
        #[arg(long, default_value = "5")]
        read_timeout_secs: u64,

        /// Habilita exportação de traces OTEL.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do coletor OTLP.
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Modo silencioso: só erros no stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Modo verbose: logs de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,

        /// ID de execução customizado (padrão: UUID v4).
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Parseia e valida stories sem executar nada.
    Validate {
        /// Arquivo YAML de uma única story.
        #[arg(short, long, conflicts_with = "dir")]
        file: Option<PathBuf>,

        /// Diretório com stories.
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            dir,
            output_dir,
            suite_name,
            backend,
            console_addr,
            console_password,
            bridge_url,
            read_timeout_secs,
            otel,
            otel_endpoint,
            silent,
            verbose,
            execution_id,
        } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if silent {
                Level::ERROR
            } else if verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            if otel {
                if let Some(endpoint) = &otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            } else {
                telemetry_config.otlp_endpoint = None;
            }

            if let Err(e) = init_telemetry(telemetry_config) {
                if !silent {
                    eprintln!("Warning: falha ao inicializar telemetria: {}", e);
                }
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exec_id = execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let code = run_suite(RunArgs {
                file,
                dir,
                output_dir,
                suite_name,
                backend_override: backend,
                console_addr,
                console_password,
                bridge_url,
                read_timeout_secs,
                execution_id: exec_id,
            })
            .await;

            shutdown_telemetry();
            std::process::exit(code);
        }

        Commands::Validate { file, dir } => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .try_init();
            std::process::exit(validate_only(file, dir));
        }
    }
}

// ============================================================================
// EXECUÇÃO DA SUITE
// ============================================================================

struct RunArgs {
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    output_dir: PathBuf,
    suite_name: Option<String>,
    backend_override: Option<String>,
    console_addr: Option<String>,
    console_password: Option<String>,
    bridge_url: Option<String>,
    read_timeout_secs: u64,
    execution_id: String,
}

async fn run_suite(args: RunArgs) -> i32 {
    info!(execution_id = %args.execution_id, "runner inicializando");

    // 1. Carrega as stories. Qualquer falha aqui é exit 2.
    let (suite_name, stories) = match load_stories(&args.file, &args.dir, &args.suite_name) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "falha ao carregar stories");
            return 2;
        }
    };

    // 2. Valida antes de tocar a rede.
    let mut invalid = false;
    for story in &stories {
        if let Err(errors) = validation::validate_story(story) {
            invalid = true;
            error!(story = %story.name, "story inválida:");
            for err in &errors {
                error!("  - {}", err);
            }
        }
    }
    if invalid {
        return 2;
    }

    // 3. Resolve a configuração de backend por tipo, antes de executar.
    let backend_override = match parse_backend_override(&args.backend_override) {
        Ok(kind) => kind,
        Err(e) => {
            error!(error = %e, "configuração inválida");
            return 2;
        }
    };
    let needed_kinds: Vec<BackendKind> = {
        let mut kinds: Vec<BackendKind> = stories
            .iter()
            .map(|s| backend_override.unwrap_or(s.backend))
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds.dedup();
        kinds
    };

    let mut report = ReportAggregator::new(suite_name);
    let mut backends: HashMap<&'static str, Box<dyn GameBackend>> = HashMap::new();
    for kind in &needed_kinds {
        let config = match backend_config(*kind, &args) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "configuração de backend inválida");
                return 2;
            }
        };
        match create_backend(&config, report.server_log.clone(), report.client_log.clone()) {
            Ok(b) => {
                backends.insert(kind.as_str(), b);
            }
            Err(e) => {
                error!(error = %e, "fábrica de backend recusou a configuração");
                return 2;
            }
        }
    }

    // 4. Cancelamento externo (Ctrl-C) vira sinal cooperativo.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupção recebida; abandonando a ação corrente");
                cancel.cancel();
            }
        });
    }

    // 5. Executa as stories em sequência, compartilhando os backends.
    for story in &stories {
        let kind = backend_override.unwrap_or(story.backend);
        let backend = backends
            .get_mut(kind.as_str())
            .expect("backend construído no passo 3");
        let mut orchestrator = Orchestrator::new(
            backend.as_mut(),
            &mut report,
            OrchestratorConfig::default(),
            cancel.clone(),
        );
        let result = orchestrator.run_story(story).await;
        if cancel.is_cancelled() {
            warn!(story = %story.name, "suite interrompida após esta story");
        }
        let _ = result;
    }

    report.finish();

    // 6. Relatórios. Falha de escrita não esconde o resultado da suite.
    if let Err(e) = report.write_reports(&args.output_dir) {
        error!(error = %e, "falha ao escrever relatórios");
    }

    if report.suite_passed() {
        0
    } else {
        1
    }
}

fn load_stories(
    file: &Option<PathBuf>,
    dir: &Option<PathBuf>,
    suite_name: &Option<String>,
) -> anyhow::Result<(String, Vec<Story>)> {
    match (file, dir) {
        (Some(file), _) => {
            let story = loader::load_story_from_file(file)?;
            let name = suite_name.clone().unwrap_or_else(|| {
                file.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("suite")
                    .to_string()
            });
            Ok((name, vec![story]))
        }
        (None, Some(dir)) => {
            let stories = loader::load_suite_from_dir(dir)?;
            let name = suite_name.clone().unwrap_or_else(|| {
                dir.file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("suite")
                    .to_string()
            });
            Ok((name, stories.into_iter().map(|(_, s)| s).collect()))
        }
        (None, None) => anyhow::bail!("use --file ou --dir"),
    }
}

fn parse_backend_override(raw: &Option<String>) -> anyhow::Result<Option<BackendKind>> {
    match raw.as_deref() {
        None => Ok(None),
        Some("console") => Ok(Some(BackendKind::Console)),
        Some("playersim") => Ok(Some(BackendKind::PlayerSim)),
        Some(other) => anyhow::bail!("backend '{}' desconhecido (use console ou playersim)", other),
    }
}

fn backend_config(kind: BackendKind, args: &RunArgs) -> anyhow::Result<BackendConfig> {
    let console_addr = args
        .console_addr
        .clone()
        .or_else(|| std::env::var("RCON_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1:25575".to_string());
    let console_password = args
        .console_password
        .clone()
        .or_else(|| std::env::var("RCON_PASSWORD").ok())
        .ok_or_else(|| anyhow::anyhow!("senha do console ausente (--console-password ou RCON_PASSWORD)"))?;
    let bridge_url = args
        .bridge_url
        .clone()
        .or_else(|| std::env::var("BRIDGE_URL").ok());

    Ok(BackendConfig {
        kind,
        console_addr,
        console_password,
        read_timeout: Duration::from_secs(args.read_timeout_secs),
        bridge_url,
        reconnect: ReconnectPolicy::default(),
    })
}

// ============================================================================
// VALIDAÇÃO SEM EXECUÇÃO
// ============================================================================

fn validate_only(file: Option<PathBuf>, dir: Option<PathBuf>) -> i32 {
    let stories = match load_stories(&file, &dir, &None) {
        Ok((_, stories)) => stories,
        Err(e) => {
            error!(error = %e, "falha ao carregar stories");
            return 2;
        }
    };

    let mut failed = false;
    for story in &stories {
        match validation::validate_story(story) {
            Ok(()) => info!(story = %story.name, "✅ válida"),
            Err(errors) => {
                failed = true;
                error!(story = %story.name, "inválida:");
                for err in &errors {
                    error!("  - {}", err);
                }
            }
        }
    }

    if failed {
        2
    } else {
        0
    }
}
