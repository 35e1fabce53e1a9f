//! `council`: submit prompts to the orchestration control plane from a
//! terminal and watch the pipeline work.

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{init_logging, LogConfig};
use council_core::{ClientMessage, ExecutionMode, ProgressKind, Role};
use orchestrator::{ControlPlane, RequestResult};

#[derive(Parser)]
#[command(name = "council", version, about = "Multi-agent AI orchestration control plane")]
struct Cli {
    /// Emit JSON logs instead of the human-readable format.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a prompt and stream progress until the final response.
    Ask {
        prompt: String,

        /// Execution mode: fast, balanced, or best-quality.
        #[arg(long, default_value = "balanced", value_parser = parse_mode)]
        mode: ExecutionMode,

        /// Principal the request is attributed to.
        #[arg(long, default_value = "cli")]
        principal: String,

        /// Caller role: demo, authenticated, or admin.
        #[arg(long, default_value = "authenticated", value_parser = parse_role)]
        role: Role,
    },

    /// Print cost and time estimates for a prompt length, all modes.
    Estimate {
        /// Prompt length in characters.
        length: usize,
    },

    /// List available models and per-provider circuit-breaker state.
    Providers,
}

fn parse_mode(s: &str) -> Result<ExecutionMode, String> {
    s.parse()
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig {
        json: cli.json_logs,
        filter: None,
    });

    let plane = ControlPlane::from_env().await;
    let _housekeeper = plane.start_housekeeper();

    match cli.command {
        Command::Ask {
            prompt,
            mode,
            principal,
            role,
        } => {
            let id = match plane.submit(&principal, role, &prompt, mode).await {
                Ok(id) => id,
                Err(err) => {
                    eprintln!("submission rejected [{}]: {err}", err.error_code());
                    std::process::exit(1);
                }
            };
            eprintln!("request {id} accepted ({mode})");

            let mut rx = plane.subscribe_progress(id, 0).await;
            while let Some(message) = rx.recv().await {
                if message.seq == 0 {
                    continue;
                }
                describe(&message.kind, &message.payload);
                plane
                    .handle_client_message(id, ClientMessage::Ack { seq: message.seq })
                    .await;
                if message.kind.is_terminal() {
                    break;
                }
            }

            match plane.result(id).await? {
                RequestResult::Completed(final_response) => {
                    println!("{}", final_response.text);
                    eprintln!(
                        "\nconfidence {:.2} · cost ${:.6} · models: {}",
                        final_response.confidence,
                        final_response.cost.total_cost,
                        final_response.models_used.join(", ")
                    );
                }
                RequestResult::Failed { error } => {
                    eprintln!("request failed: {error}");
                    std::process::exit(1);
                }
                RequestResult::Cancelled => {
                    eprintln!("request was cancelled");
                    std::process::exit(1);
                }
                RequestResult::InProgress { status } => {
                    eprintln!("request still {status} after its stream ended");
                    std::process::exit(1);
                }
            }
        }

        Command::Estimate { length } => {
            let estimates = plane.estimate(length);
            println!("estimates for a {length}-character prompt:");
            for (mode, estimate) in [
                ("FAST", estimates.fast),
                ("BALANCED", estimates.balanced),
                ("BEST_QUALITY", estimates.best_quality),
            ] {
                println!(
                    "  {mode:<13} ${:.6}  ~{:.1}s",
                    estimate.estimated_cost, estimate.estimated_time_seconds
                );
            }
        }

        Command::Providers => {
            let report = plane.status_report();
            if report.available_models.is_empty() {
                println!("no providers configured (set OPENAI_API_KEY, ANTHROPIC_API_KEY, GROQ_API_KEY, or LOCAL_LLM_URL)");
            } else {
                println!("available models:");
                for model in &report.available_models {
                    println!("  {model}");
                }
            }
            if !report.breakers.is_empty() {
                println!("circuit breakers:");
                for breaker in &report.breakers {
                    println!(
                        "  {} {} (failures: {})",
                        breaker.provider, breaker.state, breaker.consecutive_failures
                    );
                }
            }
        }
    }

    Ok(())
}

/// One terse stderr line per progress event.
fn describe(kind: &ProgressKind, payload: &serde_json::Value) {
    match kind {
        ProgressKind::AnalysisComplete => {
            eprintln!(
                "analysis: {} [{}]",
                payload["intent"].as_str().unwrap_or("?"),
                payload["complexity"].as_str().unwrap_or("?")
            );
        }
        ProgressKind::DecompositionComplete => {
            eprintln!("decomposed into {} subtasks", payload["count"]);
        }
        ProgressKind::RoutingComplete => {
            let assignments = payload["assignments"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|x| x["model"].as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            eprintln!("routed to: {assignments}");
        }
        ProgressKind::ExecutionProgress => {
            let fallback = payload["used_fallback"].as_bool().unwrap_or(false);
            eprintln!(
                "subtask {}: {}{}",
                payload["subtask_id"].as_str().unwrap_or("?"),
                payload["status"].as_str().unwrap_or("?"),
                if fallback { " (fallback)" } else { "" }
            );
        }
        ProgressKind::ArbitrationDecision => {
            eprintln!("arbitration: {}", payload["decision"].as_str().unwrap_or("?"));
        }
        ProgressKind::Error => {
            eprintln!(
                "error [{}]: {}",
                payload["code"].as_str().unwrap_or("?"),
                payload["message"].as_str().unwrap_or("?")
            );
        }
        ProgressKind::Heartbeat => {}
        other => eprintln!("{other}"),
    }
}
