use crate::config::AppConfig;
use crate::state::{AppState, PipelineMetrics};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "calls": call_load(config, &metrics),
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let extractions = metrics.extractions_completed + metrics.extractions_failed;
    let webhooks = metrics.webhooks_succeeded + metrics.webhooks_failed;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "pipeline": metrics,
        "rates": {
            "extraction_failure_rate": ratio(metrics.extractions_failed, extractions),
            "webhook_failure_rate": ratio(metrics.webhooks_failed, webhooks),
            "frame_drop_rate": ratio(
                metrics.frames_dropped,
                metrics.frames_forwarded + metrics.frames_dropped
            )
        },
        "memory": get_memory_info()
    }))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Active calls against the registry capacity.
fn call_load(config: &AppConfig, metrics: &PipelineMetrics) -> serde_json::Value {
    let capacity = config.telephony.max_active_calls;
    let usage = if capacity > 0 {
        metrics.active_calls as f64 / capacity as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "active_calls": metrics.active_calls,
        "max_active_calls": capacity,
        "usage_percent": (usage * 100.0).round(),
        "calls_bridged": metrics.calls_bridged,
        "calls_unbridged": metrics.calls_unbridged
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/{}/status", std::process::id());
        if let Ok(status) = std::fs::read_to_string(path) {
            let read_kb = |prefix: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };
            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_load_levels() {
        let mut config = AppConfig::default();
        config.telephony.max_active_calls = 10;
        let metrics = PipelineMetrics {
            active_calls: 8,
            ..Default::default()
        };
        let load = call_load(&config, &metrics);
        assert_eq!(load["status"], "moderate_load");
        assert_eq!(load["usage_percent"], 80.0);
    }

    #[test]
    fn test_ratio_handles_zero() {
        assert_eq!(ratio(1, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }
}
