//! `exactgate detect` / `exactgate evaluate`.
//!
//! Both run in-process by default. With `--remote` the request is forwarded
//! to a running `exactgate serve` and its reply is printed as-is.

use serde::Serialize;
use serde_json::Value;

use exactgate_gateway::GatewayError;

use crate::cli::{DetectOpts, EvaluateOpts, WorkerOpts};
use crate::client;
use crate::context::{self, Context};
use crate::server;

pub async fn cmd_detect(
    worker: &WorkerOpts,
    socket_path: &str,
    opts: &DetectOpts,
) -> anyhow::Result<i32> {
    let image = context::read_image_base64(&opts.image)?;

    if opts.remote {
        let params = serde_json::json!({"model_id": opts.model, "image_base64": image});
        let response = client::rpc_call(socket_path, "detect_exact", params).await?;
        return print_rpc_response(&response);
    }

    let ctx = Context::from_opts(worker);
    let outcome = ctx.detect(&opts.model, &image).await;
    ctx.shutdown();
    print_outcome(outcome)
}

pub async fn cmd_evaluate(
    worker: &WorkerOpts,
    socket_path: &str,
    opts: &EvaluateOpts,
) -> anyhow::Result<i32> {
    let image = context::read_image_base64(&opts.image)?;

    if opts.remote {
        let params = serde_json::json!({"image_base64": image});
        let response = client::rpc_call(socket_path, "evaluate", params).await?;
        return print_rpc_response(&response);
    }

    let ctx = Context::from_opts(worker);
    let outcome = ctx.evaluate(&image).await;
    ctx.shutdown();
    print_outcome(outcome)
}

fn print_outcome<T: Serialize>(outcome: Result<T, GatewayError>) -> anyhow::Result<i32> {
    let (value, code) = match outcome {
        Ok(value) => (serde_json::to_value(&value)?, 0),
        Err(err) => {
            tracing::debug!(kind = err.kind(), "detection failed: {err}");
            (server::error_data(&err), 1)
        }
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(code)
}

/// Print `result`, or `error.data` (falling back to the whole error) with exit 1.
fn print_rpc_response(response: &Value) -> anyhow::Result<i32> {
    let (value, code) = rpc_payload(response)?;
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(code)
}

fn rpc_payload(response: &Value) -> anyhow::Result<(&Value, i32)> {
    if let Some(error) = response.get("error") {
        let payload = error.get("data").unwrap_or(error);
        return Ok((payload, 1));
    }
    match response.get("result") {
        Some(result) => Ok((result, 0)),
        None => anyhow::bail!("malformed response from exactgate server: {response}"),
    }
}
