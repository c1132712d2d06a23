//! `exactgate probe`: interpreter and worker-script preflight.

use std::path::Path;

use exactgate_worker::ResolvedInterpreter;

use crate::cli::WorkerOpts;
use crate::context;

/// Run the probe and print a PASS/FAIL report. Returns the exit code.
pub async fn cmd_probe(opts: &WorkerOpts) -> i32 {
    let prober = context::prober(opts);
    tracing::debug!(candidates = ?prober.candidates(), "probing detector interpreters");
    let outcome = prober.resolve().await;
    let script_exists = opts.worker_script.is_file();

    let (lines, ok) = report(&outcome, &opts.worker_script, script_exists);
    for line in lines {
        println!("{line}");
    }
    if ok { 0 } else { 1 }
}

fn report(
    outcome: &Result<ResolvedInterpreter, String>,
    script: &Path,
    script_exists: bool,
) -> (Vec<String>, bool) {
    let mut lines = Vec::with_capacity(2);
    let interpreter_ok = match outcome {
        Ok(interp) => {
            let site = interp.user_site.as_deref().unwrap_or("none");
            lines.push(format!(
                "PASS interpreter: {} (user site: {site})",
                interp.executable
            ));
            true
        }
        Err(message) => {
            lines.push(format!("FAIL interpreter: {message}"));
            false
        }
    };
    if script_exists {
        lines.push(format!("PASS worker script: {}", script.display()));
    } else {
        lines.push(format!("FAIL worker script: {} not found", script.display()));
    }
    (lines, interpreter_ok && script_exists)
}
