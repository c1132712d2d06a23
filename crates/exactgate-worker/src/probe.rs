//! Interpreter probe: find an executable that can host the detector worker.
//!
//! Candidates are tried in order with a short import check. The first
//! success, or the aggregate failure, is cached for the lifetime of the
//! [`InterpreterProber`]; there is no retry.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;

/// Upper bound for a single capability check.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

const INSTALL_HINT: &str =
    "Install with: python3 -m pip install --user transformers torch pillow huggingface_hub";

/// Interpreters tried after an explicit override, in order.
const FALLBACK_CANDIDATES: [&str; 3] = ["python3", "/opt/homebrew/bin/python3", "/usr/bin/python3"];

// ─── Requirement ─────────────────────────────────────────────────────

/// Modules the worker host must be able to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequirement {
    pub name: String,
    pub modules: Vec<String>,
}

impl CapabilityRequirement {
    pub fn new(name: impl Into<String>, modules: &[&str]) -> Self {
        Self {
            name: name.into(),
            modules: modules.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    /// What the exact-detector worker imports at startup.
    pub fn detector_stack() -> Self {
        Self::new("exact-detector", &["transformers", "PIL"])
    }

    /// Inline program passed as `-c` to a candidate interpreter.
    pub fn check_program(&self) -> String {
        if self.modules.is_empty() {
            return "print('ok')".to_string();
        }
        format!("import {}; print('ok')", self.modules.join(", "))
    }
}

/// Build the ordered, de-duplicated candidate list.
pub fn default_candidates(explicit: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
    for candidate in explicit.into_iter().chain(FALLBACK_CANDIDATES) {
        if !out.iter().any(|c| c == candidate) {
            out.push(candidate.to_string());
        }
    }
    out
}

// ─── Prober ──────────────────────────────────────────────────────────

/// A candidate that passed the capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterpreter {
    pub executable: String,
    /// User site-packages directory reported by the interpreter, if any.
    pub user_site: Option<String>,
}

impl ResolvedInterpreter {
    /// `PYTHONPATH` for the worker: the inherited value plus the user site.
    pub fn python_path(&self, inherited: Option<&str>) -> Option<String> {
        let parts: Vec<&str> = inherited
            .into_iter()
            .chain(self.user_site.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(":"))
        }
    }
}

#[derive(Debug)]
pub struct InterpreterProber {
    candidates: Vec<String>,
    requirement: CapabilityRequirement,
    timeout: Duration,
    outcome: OnceCell<Result<ResolvedInterpreter, String>>,
}

impl InterpreterProber {
    pub fn new(candidates: Vec<String>, requirement: CapabilityRequirement) -> Self {
        Self {
            candidates,
            requirement,
            timeout: DEFAULT_PROBE_TIMEOUT,
            outcome: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Probe on first call; every later call returns the cached outcome.
    pub async fn resolve(&self) -> Result<ResolvedInterpreter, String> {
        self.outcome.get_or_init(|| self.probe()).await.clone()
    }

    /// Cached outcome, if the probe has already run.
    pub fn cached(&self) -> Option<&Result<ResolvedInterpreter, String>> {
        self.outcome.get()
    }

    async fn probe(&self) -> Result<ResolvedInterpreter, String> {
        if self.candidates.is_empty() {
            return Err(format!(
                "No interpreter candidates configured for {}.",
                self.requirement.name
            ));
        }

        let program = self.requirement.check_program();
        let mut failures = Vec::with_capacity(self.candidates.len());

        for candidate in &self.candidates {
            match run_program(candidate, &program, self.timeout).await {
                Ok(_) => {
                    let user_site = query_user_site(candidate, self.timeout).await;
                    tracing::info!(
                        executable = %candidate,
                        user_site = user_site.as_deref().unwrap_or(""),
                        "detector interpreter resolved"
                    );
                    return Ok(ResolvedInterpreter {
                        executable: candidate.clone(),
                        user_site,
                    });
                }
                Err(reason) => {
                    tracing::debug!(candidate = %candidate, %reason, "interpreter candidate rejected");
                    failures.push(format!("{candidate}: {reason}"));
                }
            }
        }

        let message = format!(
            "No Python interpreter with required packages ({}) found. Tried: {}. {INSTALL_HINT}",
            self.requirement.modules.join(", "),
            failures.join(", ")
        );
        tracing::error!("{message}");
        Err(message)
    }
}

/// Run `<executable> -c <program>`; stdout on success, a reason otherwise.
async fn run_program(executable: &str, program: &str, timeout: Duration) -> Result<String, String> {
    let child = Command::new(executable)
        .arg("-c")
        .arg(program)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("not runnable ({e})")),
        Err(_) => return Err(format!("check timed out after {}s", timeout.as_secs())),
    };

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    match stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
        Some(detail) => Err(format!("missing deps ({detail})")),
        None => Err("missing deps".to_string()),
    }
}

async fn query_user_site(executable: &str, timeout: Duration) -> Option<String> {
    let program = "import site; print(site.getusersitepackages())";
    let stdout = run_program(executable, program, timeout).await.ok()?;
    let site = stdout.trim();
    (!site.is_empty()).then(|| site.to_string())
}
