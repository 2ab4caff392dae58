//! Embed the engine with a custom handler and drive it through the same
//! three operations an HTTP front end would use.

use std::sync::Arc;
use std::time::Duration;

use jobhive::api::{ErrorResponse, ResultResponse, SubmitResponse};
use jobhive::config::EngineConfig;
use jobhive::engine::Engine;
use jobhive::scheduler::JobError;
use jobhive::worker::{handler_fn, JobContext};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let handler = handler_fn(|ctx: JobContext| async move {
        let n = ctx
            .payload
            .get("n")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| JobError::handler("payload needs an integer `n`"))?;

        let mut acc: u64 = 0;
        for i in 0..n {
            if ctx.is_cancelled() {
                return Err(JobError::cancelled());
            }
            acc = acc.wrapping_add(i * i);
            if i % 1000 == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok::<_, JobError>(json!({ "sum_of_squares": acc }))
    });

    let config = EngineConfig::new(2, 4).with_grace_period(Duration::from_secs(2));
    let engine = Engine::start(config, Arc::new(handler))?;

    let mut accepted = Vec::new();
    for n in [10u64, 10_000, 1_000_000] {
        match engine.submit(json!({ "n": n }), None).await {
            Ok(handle) => {
                println!("{}", serde_json::to_string(&SubmitResponse::from(&handle))?);
                accepted.push(handle.id);
            }
            Err(e) => println!("{}", serde_json::to_string(&ErrorResponse::from(&e))?),
        }
    }
    if let Err(e) = engine.submit(json!({ "oops": true }), None).await {
        println!("{}", serde_json::to_string(&ErrorResponse::from(&e))?);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    for id in &accepted {
        let outcome = engine.result(id).await?;
        let response = ResultResponse::new(id, outcome);
        println!("{} {}", response.status_code(), serde_json::to_string(&response)?);
    }

    let report = engine.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
