//! `moldeo eval` — Evaluate a schema file against a store document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use moldeo_config::EngineConfig;
use moldeo_core::Store;
use moldeo_engine::Engine;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Clone, Args)]
pub struct EvalArgs {
    /// Schema file (JSON), or `-` to read stdin
    pub schema: PathBuf,

    /// Store document (JSON); an empty object when omitted
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// Evaluate asynchronously so `delay` and `consulta` run
    #[arg(long = "async")]
    pub asynchronous: bool,

    /// Cancel after this many milliseconds (implies --async)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the final store next to the result
    #[arg(long)]
    pub show_store: bool,

    /// Single-line output
    #[arg(long)]
    pub compact: bool,
}

impl EvalArgs {
    fn is_async(&self) -> bool {
        self.asynchronous || self.timeout_ms.is_some()
    }
}

pub async fn run(config: EngineConfig, args: EvalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let schema = read_document(&args.schema)?;
    let store = match &args.store {
        Some(path) => Store::new(read_document(path)?),
        None => Store::default(),
    };
    let engine = Engine::from_config(config)?;

    let result = evaluate(&engine, schema, store.clone(), &args).await?;
    println!("{}", render(result, &store, &args)?);
    Ok(())
}

/// Run the evaluation the way `args` asks for.
pub async fn evaluate(
    engine: &Engine,
    schema: Value,
    store: Store,
    args: &EvalArgs,
) -> moldeo_core::Result<Value> {
    let ctx = engine.context(store);
    if !args.is_async() {
        return engine.evaluate(&schema, &ctx);
    }

    let evaluation = engine.start(schema, ctx);
    info!(id = %evaluation.id(), "Evaluation started");
    if let Some(ms) = args.timeout_ms {
        evaluation.cancel_after(Duration::from_millis(ms));
    }

    let token = evaluation.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling evaluation");
            token.cancel();
        }
    });

    evaluation.result().await
}

pub fn render(result: Value, store: &Store, args: &EvalArgs) -> serde_json::Result<String> {
    let output = if args.show_store {
        json!({"result": result, "store": store.snapshot()})
    } else {
        result
    };
    if args.compact {
        serde_json::to_string(&output)
    } else {
        serde_json::to_string_pretty(&output)
    }
}

fn read_document(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?
    };
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("Invalid JSON in {}: {e}", path.display()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> EvalArgs {
        EvalArgs {
            schema: PathBuf::from("-"),
            store: None,
            asynchronous: false,
            timeout_ms: None,
            show_store: false,
            compact: true,
        }
    }

    #[test]
    fn reads_documents_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"{"const": [1, 2], "calc": "sumar"}"#).unwrap();
        assert_eq!(read_document(&path).unwrap(), json!({"const": [1, 2], "calc": "sumar"}));

        std::fs::write(&path, "{not json").unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[tokio::test]
    async fn synchronous_eval_writes_the_store() {
        let engine = Engine::new();
        let store = Store::new(json!({"nombre": "Melany"}));
        let schema = json!({"path": "nombre", "equals": "Melany", "set": "ok"});
        let result = evaluate(&engine, schema, store.clone(), &args()).await.unwrap();
        assert_eq!(result, json!(true));

        let rendered = render(result, &store, &EvalArgs { show_store: true, ..args() }).unwrap();
        assert_eq!(
            rendered,
            r#"{"result":true,"store":{"nombre":"Melany","ok":true}}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_async_eval() {
        let engine = Engine::new();
        let args = EvalArgs {
            timeout_ms: Some(50),
            ..args()
        };
        let schema = json!({"delay": 10_000, "const": 1});
        let err = evaluate(&engine, schema, Store::default(), &args).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn async_eval_runs_delays() {
        let engine = Engine::new();
        let args = EvalArgs {
            asynchronous: true,
            ..args()
        };
        let schema = json!({"delay": 200, "const": "late"});
        let result = evaluate(&engine, schema, Store::default(), &args).await.unwrap();
        assert_eq!(result, json!("late"));
    }
}
