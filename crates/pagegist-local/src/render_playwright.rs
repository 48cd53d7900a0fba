use crate::config::ExtractConfig;
use pagegist_core::{Error, RenderBackend, RenderSession, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};

/// Browser launch can be slow on a cold machine (first run unpacks the browser).
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// One browser per process. Commands arrive as JSON lines on stdin and each gets exactly one JSON
// line back on stdout, in order. EOF on stdin closes the browser and exits.
const JS: &str = r#"
const readline = require('readline');

function reply(obj) { process.stdout.write(JSON.stringify(obj) + '\n'); }
function bad(code, message) { reply({ ok: false, error: { code, message } }); }

let pw = null;
try { pw = require('playwright'); } catch (e) { pw = null; }

let browser = null;
let page = null;

async function shutdown() {
  try { if (browser) await browser.close(); } catch (_) {}
  browser = null;
  page = null;
}

async function handle(req) {
  switch (req.op) {
    case 'open': {
      if (!pw) {
        return bad('not_configured',
          'Playwright is not installed for Node.js (require("playwright") failed). Install it with `npm i -g playwright` and `npx playwright install chromium`.');
      }
      browser = await pw.chromium.launch({
        headless: true,
        args: ['--disable-gpu', '--no-sandbox', '--disable-dev-shm-usage'],
      });
      const context = await browser.newContext({ userAgent: req.user_agent || undefined, serviceWorkers: 'block' });
      page = await context.newPage();
      // Images/media/fonts never help text extraction.
      try {
        await page.route('**/*', (route) => {
          const rt = route.request().resourceType();
          if (rt === 'image' || rt === 'media' || rt === 'font') return route.abort();
          return route.continue();
        });
      } catch (_) {}
      return reply({ ok: true });
    }
    case 'load': {
      if (!page) return bad('invalid_state', 'load before open');
      await page.goto(String(req.url || ''), { waitUntil: 'domcontentloaded', timeout: Number(req.timeout_ms || 10000) });
      return reply({ ok: true, final_url: page.url() });
    }
    case 'wait_for': {
      if (!page) return bad('invalid_state', 'wait_for before open');
      await page.waitForSelector(String(req.selector), { state: 'attached', timeout: Number(req.timeout_ms || 10000) });
      return reply({ ok: true });
    }
    case 'text': {
      if (!page) return bad('invalid_state', 'text before open');
      const el = await page.$(String(req.selector));
      if (!el) return reply({ ok: true, text: null });
      return reply({ ok: true, text: await el.innerText() });
    }
    case 'close': {
      await shutdown();
      return reply({ ok: true });
    }
    default:
      return bad('invalid_params', 'unknown op: ' + String(req.op));
  }
}

const rl = readline.createInterface({ input: process.stdin });
let chain = Promise.resolve();
rl.on('line', (line) => {
  chain = chain.then(async () => {
    let req;
    try { req = JSON.parse(line); } catch (_) { return bad('invalid_params', 'bad JSON command'); }
    try { await handle(req); } catch (e) { bad('render_failed', String(e && e.message ? e.message : e)); }
  });
});
rl.on('close', () => { chain.then(shutdown).finally(() => process.exit(0)); });
"#;

fn node_path_candidates() -> Vec<String> {
    // Best-effort Node global module roots across common setups.
    let mut out: Vec<String> = Vec::new();

    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn node_path_has_playwright(np: &str) -> bool {
    np.split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| std::path::Path::new(p).join("playwright").is_dir())
}

/// NODE_PATH to hand the child so a globally installed Playwright resolves.
pub fn detect_node_path_for_playwright(explicit: Option<&str>) -> Option<String> {
    if let Some(v) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(v.to_string());
    }

    let existing = std::env::var("NODE_PATH").ok().unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }

    let found = node_path_candidates()
        .into_iter()
        .find(|root| std::path::Path::new(root).join("playwright").is_dir())?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

/// Map one protocol reply line to a value or an error.
fn decode_reply(line: &str) -> Result<serde_json::Value> {
    let v: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| Error::Render(format!("browser returned invalid JSON: {e}")))?;
    if v.get("ok").and_then(|x| x.as_bool()) == Some(true) {
        return Ok(v);
    }
    let code = v
        .pointer("/error/code")
        .and_then(|x| x.as_str())
        .unwrap_or("render_failed");
    let message = v
        .pointer("/error/message")
        .and_then(|x| x.as_str())
        .unwrap_or("browser command failed")
        .to_string();
    Err(match code {
        "not_configured" => Error::NotConfigured(message),
        // Bad commands from our side are render failures, not caller input errors.
        _ => Error::Render(message),
    })
}

/// Launches one Node + Playwright browser per [`RenderBackend::open`].
#[derive(Debug, Clone)]
pub struct PlaywrightBackend {
    cfg: Arc<ExtractConfig>,
    command_slack: Duration,
}

impl PlaywrightBackend {
    pub fn new(cfg: Arc<ExtractConfig>) -> Self {
        Self {
            cfg,
            command_slack: Duration::from_secs(5),
        }
    }

    /// Extra wall-clock time granted on top of each command's own timeout before the session
    /// is declared hung.
    pub fn with_command_slack(mut self, slack: Duration) -> Self {
        self.command_slack = slack;
        self
    }
}

#[async_trait::async_trait]
impl RenderBackend for PlaywrightBackend {
    async fn open(&self) -> Result<Box<dyn RenderSession>> {
        let mut cmd = tokio::process::Command::new(&self.cfg.node_bin);
        if let Some(node_path) = detect_node_path_for_playwright(self.cfg.node_path.as_deref()) {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "headless render requires Node.js (`{}`) and the Playwright npm package: {e}",
                    self.cfg.node_bin
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Render("browser: missing stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Render("browser: missing stdout pipe".to_string()))?;

        let mut session = PlaywrightSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            slack: self.command_slack,
            broken: false,
        };
        // On failure `session` drops here and the child is killed.
        session
            .call(
                json!({ "op": "open", "user_agent": self.cfg.user_agent }),
                LAUNCH_TIMEOUT,
            )
            .await?;
        tracing::debug!("browser session opened");
        Ok(Box::new(session))
    }
}

/// A running browser. Dropping it kills the Node process (and with it the browser).
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    slack: Duration,
    /// Set once a command timed out: replies can no longer be matched to commands.
    broken: bool,
}

impl PlaywrightSession {
    async fn call(&mut self, cmd: serde_json::Value, timeout: Duration) -> Result<serde_json::Value> {
        if self.broken {
            return Err(Error::Render(
                "browser session is unusable after an earlier timeout".to_string(),
            ));
        }
        let op = cmd
            .get("op")
            .and_then(|x| x.as_str())
            .unwrap_or("?")
            .to_string();
        let mut line = cmd.to_string();
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Render(format!("browser stdin write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| Error::Render(format!("browser stdin flush failed: {e}")))?;

        let hard = timeout.saturating_add(self.slack);
        let next = match tokio::time::timeout(hard, self.stdout.next_line()).await {
            Ok(r) => r.map_err(|e| Error::Render(format!("browser stdout read failed: {e}")))?,
            Err(_) => {
                self.broken = true;
                return Err(Error::Render(format!(
                    "browser command {op} hard timeout after {}ms",
                    hard.as_millis()
                )));
            }
        };
        let Some(next) = next else {
            return Err(Error::Render(format!(
                "browser process exited during {op}"
            )));
        };
        decode_reply(&next)
    }
}

#[async_trait::async_trait]
impl RenderSession for PlaywrightSession {
    async fn load(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let v = self
            .call(
                json!({ "op": "load", "url": url, "timeout_ms": timeout.as_millis() as u64 }),
                timeout,
            )
            .await?;
        tracing::debug!(
            final_url = v.get("final_url").and_then(|x| x.as_str()).unwrap_or(url),
            "page loaded"
        );
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        self.call(
            json!({ "op": "wait_for", "selector": selector, "timeout_ms": timeout.as_millis() as u64 }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn query_selector_text(&mut self, selector: &str) -> Result<Option<String>> {
        let v = self
            .call(json!({ "op": "text", "selector": selector }), COMMAND_TIMEOUT)
            .await?;
        Ok(v.get("text").and_then(|x| x.as_str()).map(|s| s.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        let graceful = this
            .call(json!({ "op": "close" }), CLOSE_TIMEOUT)
            .await
            .map(|_| ());
        // EOF tells the script to exit even if the close command never got through.
        drop(this.stdin);
        if tokio::time::timeout(CLOSE_TIMEOUT, this.child.wait())
            .await
            .is_err()
        {
            let _ = this.child.kill().await;
        }
        tracing::debug!("browser session closed");
        graceful
    }
}
