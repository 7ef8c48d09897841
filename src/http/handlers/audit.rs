//! Audit log reads and the analytics summary

use crate::http::{AppError, AppState};
use crate::model::{AuditFilter, AuditRecord};
use crate::GatewayError;
use axum::extract::{Path, Query, State};
use axum::Json;
use itertools::Itertools;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 100;

pub async fn list(
    State(state): State<AppState>,
    Query(mut filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(1000));
    Ok(Json(state.repos.audit.list(&filter).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditRecord>, AppError> {
    let record = state
        .repos
        .audit
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("audit_record", id.to_string()))?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub total_requests: usize,
    pub error_requests: usize,
    pub latency_ms_p50: i64,
    pub latency_ms_p95: i64,
    pub by_status: HashMap<String, usize>,
    pub by_server: Vec<Value>,
}

/// Aggregate the (filtered) audit window into request/error/latency stats
pub async fn analytics(
    State(state): State<AppState>,
    Query(mut filter): Query<AuditFilter>,
) -> Result<Json<AnalyticsSummary>, AppError> {
    filter.limit = Some(filter.limit.unwrap_or(10_000));
    let records = state.repos.audit.list(&filter).await?;

    let total_requests = records.len();
    let error_requests = records.iter().filter(|r| r.response_status >= 400).count();

    let latencies: Vec<i64> = records.iter().map(|r| r.latency_ms).sorted().collect();
    let percentile = |p: f64| -> i64 {
        if latencies.is_empty() {
            return 0;
        }
        let rank = ((latencies.len() as f64 - 1.0) * p).round() as usize;
        latencies[rank.min(latencies.len() - 1)]
    };

    let mut by_status: HashMap<String, usize> = HashMap::new();
    for record in &records {
        let class = format!("{}xx", record.response_status / 100);
        *by_status.entry(class).or_default() += 1;
    }

    let by_server: Vec<Value> = records
        .iter()
        .filter_map(|r| r.server_id)
        .counts()
        .into_iter()
        .sorted_by_key(|(_, count)| std::cmp::Reverse(*count))
        .map(|(server_id, count)| json!({"server_id": server_id, "requests": count}))
        .collect();

    Ok(Json(AnalyticsSummary {
        total_requests,
        error_requests,
        latency_ms_p50: percentile(0.50),
        latency_ms_p95: percentile(0.95),
        by_status,
        by_server,
    }))
}
