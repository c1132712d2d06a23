//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.
//!
//! Methods: `detect_exact {model_id, image_base64}`, `evaluate {image_base64}`,
//! `list_models`. Gateway errors use code -32000 with the HTTP-style status
//! in `error.data.status`.

use std::future::Future;
use std::sync::Arc;

use exactgate_gateway::GatewayError;
use exactgate_worker::WorkerLauncher;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use crate::cmd_models;
use crate::context::Context;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;
const GATEWAY_ERROR: i64 = -32000;

/// Run the UDS JSON-RPC server until ctrl-c.
pub async fn run_server<L: WorkerLauncher>(
    socket_path: &str,
    ctx: Arc<Context<L>>,
) -> anyhow::Result<()> {
    let listener = bind(socket_path).await?;
    tracing::info!("UDS server listening on {socket_path}");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    let served = serve(listener, ctx.clone(), shutdown).await;

    ctx.shutdown();
    if let Err(e) = std::fs::remove_file(socket_path) {
        tracing::debug!("could not remove socket {socket_path}: {e}");
    }
    served
}

async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another exactgate server is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<L, F>(
    listener: UnixListener,
    ctx: Arc<Context<L>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    L: WorkerLauncher,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("UDS server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        tracing::debug!("connection error: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_connection<L: WorkerLauncher>(
    stream: tokio::net::UnixStream,
    ctx: Arc<Context<L>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => handle_request(&ctx, &request).await,
        Err(e) => envelope(
            Value::Null,
            Err(RpcError::new(PARSE_ERROR, format!("parse error: {e}"))),
        ),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

pub(crate) async fn handle_request<L: WorkerLauncher>(ctx: &Context<L>, request: &Value) -> Value {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or("");
    let params = &request["params"];
    let image = params["image_base64"].as_str().unwrap_or_default();

    let result = match method {
        "detect_exact" => {
            let model_id = params["model_id"].as_str().unwrap_or_default();
            match ctx.detect(model_id, image).await {
                Ok(detection) => encode(&detection),
                Err(err) => Err(RpcError::gateway(&err)),
            }
        }
        "evaluate" => match ctx.evaluate(image).await {
            Ok(verdict) => encode(&verdict),
            Err(err) => Err(RpcError::gateway(&err)),
        },
        "list_models" => encode(&cmd_models::listing(
            ctx.gateway().catalog(),
            ctx.ensemble().members(),
        )),
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    };

    envelope(id, result)
}

fn envelope(id: Value, result: Result<Value, RpcError>) -> Value {
    match result {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(error) => serde_json::json!({
            "jsonrpc": "2.0",
            "error": error,
            "id": id,
        }),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}

/// Error payload for a gateway failure: the error body plus its status.
pub(crate) fn error_data(err: &GatewayError) -> Value {
    let mut data = serde_json::to_value(err.body()).unwrap_or_else(|_| serde_json::json!({}));
    if let Value::Object(map) = &mut data {
        map.insert("status".to_string(), err.status_code().into());
        map.insert("kind".to_string(), err.kind().into());
    }
    data
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn gateway(err: &GatewayError) -> Self {
        Self {
            code: GATEWAY_ERROR,
            message: err.to_string(),
            data: Some(error_data(err)),
        }
    }
}
