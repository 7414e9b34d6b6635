//! Informational commands: `provider`, `model`, `router`, `analyze`,
//! `doctor`.

use serde_json::json;

use zeke::router::RouterMode;
use zeke::{ZekeError, ZekeResult};

use crate::local::{save_router_mode, LocalBackend};

pub async fn provider_list(backend: &LocalBackend, json_output: bool) -> ZekeResult<()> {
    let result = backend.call("provider.list", json!({})).await?;
    if json_output {
        println!("{result}");
        return Ok(());
    }
    for p in result["providers"].as_array().cloned().unwrap_or_default() {
        println!("{}", p.as_str().unwrap_or("?"));
    }
    Ok(())
}

pub async fn provider_status(backend: &LocalBackend, json_output: bool) -> ZekeResult<()> {
    let result = backend.call("provider.status", json!({})).await?;
    if json_output {
        println!("{result}");
        return Ok(());
    }
    for entry in result["providers"].as_array().cloned().unwrap_or_default() {
        println!(
            "{:<10} {:<6} {} models cached",
            entry["provider"].as_str().unwrap_or("?"),
            if entry["local"].as_bool() == Some(true) {
                "local"
            } else {
                "cloud"
            },
            entry["models_cached"].as_u64().unwrap_or(0),
        );
    }
    Ok(())
}

pub async fn provider_test(backend: &LocalBackend, provider: &str) -> ZekeResult<()> {
    let result = backend
        .call("provider.test", json!({"provider": provider}))
        .await?;
    println!("{result}");
    Ok(())
}

pub async fn model_list(backend: &LocalBackend, json_output: bool) -> ZekeResult<()> {
    let models = backend.call("model.list", json!({})).await?;
    if json_output {
        println!("{models}");
        return Ok(());
    }
    for m in models.as_array().cloned().unwrap_or_default() {
        println!(
            "{:<40} ctx {:<8} in ${}/1k out ${}/1k",
            m["id"].as_str().unwrap_or("?"),
            m["context_length"].as_u64().unwrap_or(0),
            m["cost_in_per_1k"].as_f64().unwrap_or(0.0),
            m["cost_out_per_1k"].as_f64().unwrap_or(0.0),
        );
    }
    Ok(())
}

/// `model recommend <need>`: keyword suggestions from the dispatcher.
pub async fn model_recommend(backend: &LocalBackend, need: &str) -> ZekeResult<()> {
    let result = backend
        .call("package.recommend", json!({"need": need}))
        .await?;
    println!("{result}");
    Ok(())
}

pub async fn router_status(backend: &LocalBackend, json_output: bool) -> ZekeResult<()> {
    let result = backend.call("router.status", json!({})).await?;
    if json_output {
        println!("{result}");
        return Ok(());
    }
    println!("mode: {}", result["mode"].as_str().unwrap_or("?"));
    println!(
        "month-to-date cloud spend: {:.2} cents",
        result["month_cost_cents"].as_f64().unwrap_or(0.0)
    );
    let recent = result["recent"].as_array().cloned().unwrap_or_default();
    println!("recent requests: {}", recent.len());
    for row in recent.iter().take(5) {
        println!(
            "  {} {}:{} {} {}ms",
            if row["success"].as_bool() == Some(true) {
                "ok "
            } else {
                "ERR"
            },
            row["provider"].as_str().unwrap_or("?"),
            row["model"].as_str().unwrap_or("?"),
            row["intent"].as_str().unwrap_or("?"),
            row["total_duration_ms"].as_u64().unwrap_or(0),
        );
    }
    Ok(())
}

pub fn router_switch(mode: &str) -> ZekeResult<()> {
    let mode: RouterMode = mode.parse().map_err(ZekeError::InvalidArgument)?;
    save_router_mode(mode)?;
    println!("router mode saved");
    Ok(())
}

pub async fn router_test(backend: &LocalBackend) -> ZekeResult<()> {
    let result = backend.call("router.test", json!({})).await?;
    println!("{result}");
    Ok(())
}

pub async fn analyze(backend: &LocalBackend, path: &str, json_output: bool) -> ZekeResult<()> {
    let analysis = backend
        .call("project.analyze", json!({"path": path}))
        .await?;
    if json_output {
        println!("{analysis}");
        return Ok(());
    }
    println!(
        "{} ({} modules, {} dependencies)",
        analysis["project_info"]["name"].as_str().unwrap_or("?"),
        analysis["module_count"].as_u64().unwrap_or(0),
        analysis["dependencies"].as_array().map(|a| a.len()).unwrap_or(0),
    );
    println!(
        "health {:.2}  readiness: {}",
        analysis["summary"]["health_score"].as_f64().unwrap_or(0.0),
        analysis["summary"]["readiness"].as_str().unwrap_or("?"),
    );
    for issue in analysis["build_issues"].as_array().cloned().unwrap_or_default() {
        println!("issue: {}", issue.as_str().unwrap_or("?"));
    }
    for rec in analysis["summary"]["recommendations"]
        .as_array()
        .cloned()
        .unwrap_or_default()
    {
        println!("recommend: {}", rec.as_str().unwrap_or("?"));
    }
    Ok(())
}

/// `doctor`: probe every configured provider, refresh the catalog, check
/// the DB schema.
pub async fn doctor(backend: &LocalBackend) -> ZekeResult<()> {
    let schema = backend.state.db.schema_version().await?;
    println!("routing db schema: v{schema}");

    let providers = backend.call("provider.list", json!({})).await?;
    let names: Vec<String> = providers["providers"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|p| p.as_str().map(String::from))
        .collect();
    if names.is_empty() {
        println!("no providers configured; set an api key or start Ollama");
        return Ok(());
    }
    for name in names {
        let result = backend
            .call("provider.test", json!({"provider": name}))
            .await?;
        if result["ok"].as_bool() == Some(true) {
            println!(
                "{name:<10} OK   {} models ({}ms)",
                result["models"].as_u64().unwrap_or(0),
                result["latency_ms"].as_u64().unwrap_or(0),
            );
        } else {
            println!(
                "{name:<10} FAIL {}",
                result["error"].as_str().unwrap_or("unknown"),
            );
        }
    }
    println!("catalog: {} models", backend.state.catalog.len());
    Ok(())
}
