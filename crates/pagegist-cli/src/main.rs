use anyhow::Result;
use clap::{Parser, Subcommand};
use pagegist_local::{PipelineConfig, PipelineController};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pagegist")]
#[command(about = "Fetch a web article and summarize it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize one URL and print the result (json).
    Summarize(SummarizeCmd),
    /// Run the HTTP service (`POST /summarize`).
    Serve(ServeCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct SummarizeCmd {
    /// Article URL (absolute http/https).
    #[arg(long, default_value = "")]
    url: String,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    #[arg(long, env = "PAGEGIST_HOST", default_value = "127.0.0.1")]
    host: std::net::IpAddr,
    #[arg(long, env = "PAGEGIST_PORT", default_value_t = 5001)]
    port: u16,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    /// Timeout for the Node/Playwright check (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// Opt-in env file (`PAGEGIST_ENV_FILE`): `KEY=value` lines, `#` comments. Never overrides the
/// process environment and never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("PAGEGIST_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

fn init_tracing() {
    // stdout carries JSON results only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pagegist_local=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn doctor(args: DoctorCmd) -> serde_json::Value {
    let t0 = std::time::Instant::now();
    let cfg = PipelineConfig::from_env();
    let mut checks: Vec<serde_json::Value> = Vec::new();

    if cfg.extract.render_disabled {
        checks.push(serde_json::json!({
            "name": "playwright_available",
            "ok": true,
            "skipped": true,
            "message": "headless render disabled (PAGEGIST_RENDER_DISABLE)",
            "hint": "",
        }));
    } else {
        let mut cmd = tokio::process::Command::new(&cfg.extract.node_bin);
        if let Some(np) = pagegist_local::render_playwright::detect_node_path_for_playwright(
            cfg.extract.node_path.as_deref(),
        ) {
            cmd.env("NODE_PATH", np);
        }
        cmd.arg("-e")
            .arg("require.resolve('playwright')")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        let timeout = std::time::Duration::from_millis(args.timeout_ms);
        let (ok, message) = match tokio::time::timeout(timeout, cmd.status()).await {
            Ok(Ok(st)) if st.success() => (true, "node can load playwright".to_string()),
            Ok(Ok(st)) => (false, format!("node could not resolve playwright ({st})")),
            Ok(Err(e)) => (false, format!("could not run {}: {e}", cfg.extract.node_bin)),
            Err(_) => (false, format!("playwright check timed out after {}ms", args.timeout_ms)),
        };
        checks.push(serde_json::json!({
            "name": "playwright_available",
            "ok": ok,
            "skipped": false,
            "message": message,
            "hint": if ok { "" } else { "Install Node.js, then `npm i -g playwright && npx playwright install chromium`, or set PAGEGIST_RENDER_DISABLE=1." },
        }));
    }

    let token_configured = cfg.models.token.is_some();
    checks.push(serde_json::json!({
        "name": "inference_token",
        "ok": token_configured,
        "skipped": false,
        "message": if token_configured { "HUGGINGFACE_TOKEN is set" } else { "HUGGINGFACE_TOKEN is not set" },
        "hint": if token_configured { "" } else { "Unauthenticated inference calls are heavily rate limited." },
    }));

    serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": checks.iter().all(|c| c["ok"].as_bool() == Some(true)),
        "name": "pagegist",
        "version": env!("CARGO_PKG_VERSION"),
        "elapsed_ms": t0.elapsed().as_millis() as u64,
        "configured": {
            // Booleans only for secrets.
            "huggingface_token": token_configured,
            "primary_model_url": cfg.models.primary_url,
            "secondary_model_url": cfg.models.secondary_url,
            "render_disabled": cfg.extract.render_disabled,
            "topic": cfg.topic,
        },
        "checks": checks,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Summarize(args) => {
            let cfg = PipelineConfig::from_env();
            let controller = PipelineController::from_config(&cfg)?;
            match controller.run(&args.url).await {
                Ok(result) => match args.output.to_ascii_lowercase().as_str() {
                    "text" => {
                        println!("{}", result.summary);
                        println!(
                            "read_time: {} min, topic: {}",
                            result.stats.read_time, result.stats.topic
                        );
                    }
                    _ => println!("{}", serde_json::to_string(&result)?),
                },
                Err(e) => {
                    println!("{}", serde_json::to_string(&e.to_body())?);
                    std::process::exit(if e.http_status() < 500 { 2 } else { 1 });
                }
            }
        }
        Commands::Serve(args) => {
            let cfg = PipelineConfig::from_env();
            let controller = Arc::new(PipelineController::from_config(&cfg)?);
            pagegist_cli::server::serve(std::net::SocketAddr::new(args.host, args.port), controller)
                .await?;
        }
        Commands::Doctor(args) => {
            let text = args.output.eq_ignore_ascii_case("text");
            let payload = doctor(args).await;
            if text {
                println!("pagegist {}", env!("CARGO_PKG_VERSION"));
                for c in payload["checks"].as_array().into_iter().flatten() {
                    let name = c["name"].as_str().unwrap_or("?");
                    let ok = c["ok"].as_bool().unwrap_or(false);
                    println!("- {}: {}", name, if ok { "ok" } else { "fail" });
                }
            } else {
                println!("{payload}");
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "pagegist",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("pagegist {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
