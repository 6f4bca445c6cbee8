//! Request dispatcher: opcode -> engine operation.
//!
//! The dispatcher owns payload decoding and error-kind mapping; it never
//! inspects payloads beyond handing them to serde. `Health` and `Shutdown`
//! are handled by the server itself.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use braid_core::enums::{DependencyType, IssueType, Status};
use braid_core::filter::{IssueFilter, WorkFilter};
use braid_engine::{Engine, EngineError, NewIssue, OpContext, resolve_actor};
use braid_proto::{Opcode, Request, Response};
use braid_storage::{IssueUpdates, OrphanMode};
use braid_sync::ImportOptions;

/// Args common to every operation: who is acting.
#[derive(Debug, Default, Deserialize)]
struct CommonArgs {
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShowArgs {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListArgs {
    #[serde(default)]
    query: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    limit: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkArgs {
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    unassigned: bool,
    #[serde(default)]
    limit: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    design: Option<String>,
    #[serde(default)]
    acceptance_criteria: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    close_reason: Option<String>,
    #[serde(default)]
    estimated_minutes: Option<Option<i32>>,
}

#[derive(Debug, Deserialize)]
struct CloseArgs {
    id: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DependencyArgs {
    issue_id: String,
    depends_on_id: String,
    #[serde(default, rename = "type")]
    dep_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentArgs {
    id: String,
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ImportArgs {
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    skip_update: bool,
    #[serde(default)]
    orphan_mode: Option<String>,
    #[serde(default)]
    protect_local_export_ids: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct MutationsArgs {
    #[serde(default)]
    since_ms: i64,
}

#[derive(Debug, Deserialize)]
struct SwarmArgs {
    epic_id: String,
}

/// Routes one request to the engine and encodes the outcome.
pub fn dispatch(engine: &Engine, req: &Request) -> Response {
    let ctx = build_context(req);
    match route(engine, &ctx, req) {
        Ok(data) => Response::ok(req.request_id, data),
        Err(e) => Response::err(req.request_id, e.kind(), e.to_string()),
    }
}

fn build_context(req: &Request) -> OpContext {
    let common: CommonArgs = serde_json::from_value(req.args.clone()).unwrap_or_default();
    let actor = resolve_actor(common.actor.as_deref());
    match req.timeout_ms {
        Some(ms) => OpContext::with_timeout(actor, Duration::from_millis(ms)),
        None => OpContext::new(actor),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(req: &Request) -> Result<T, EngineError> {
    serde_json::from_value(req.args.clone())
        .map_err(|e| EngineError::Storage(braid_storage::StorageError::validation(
            format!("bad request payload: {e}"),
            "bad_payload",
        )))
}

fn route(
    engine: &Engine,
    ctx: &OpContext,
    req: &Request,
) -> Result<serde_json::Value, EngineError> {
    match req.op {
        Opcode::Status => Ok(json!(engine.status_summary(ctx)?)),
        Opcode::Show => {
            let args: ShowArgs = parse(req)?;
            Ok(json!(engine.get_issue(ctx, &args.id)?))
        }
        Opcode::List => {
            let args: ListArgs = parse(req)?;
            let filter = IssueFilter {
                status: args.status.as_deref().map(Status::from),
                issue_type: args.issue_type.as_deref().map(IssueType::from),
                assignee: args.assignee,
                labels: args.labels,
                limit: args.limit,
                ..Default::default()
            };
            Ok(json!(engine.search_issues(ctx, &args.query, &filter)?))
        }
        Opcode::Ready => {
            let args: WorkArgs = parse(req)?;
            let filter = WorkFilter {
                assignee: args.assignee,
                unassigned: args.unassigned,
                limit: args.limit,
                ..Default::default()
            };
            Ok(json!(engine.ready_work(ctx, &filter)?))
        }
        Opcode::Blocked => {
            let args: WorkArgs = parse(req)?;
            let filter = WorkFilter {
                assignee: args.assignee,
                unassigned: args.unassigned,
                limit: args.limit,
                ..Default::default()
            };
            let blocked = engine.blocked_issues(ctx, &filter)?;
            let entries: Vec<serde_json::Value> = blocked
                .into_iter()
                .map(|b| json!({"issue": b.issue, "blocked_by": b.blocked_by}))
                .collect();
            Ok(json!(entries))
        }
        Opcode::Stats => Ok(json!({
            "statistics": stats_json(engine, ctx)?,
        })),
        Opcode::Create => {
            let params: NewIssue = parse(req)?;
            Ok(json!(engine.create_issue(ctx, &params)?))
        }
        Opcode::Update => {
            let args: UpdateArgs = parse(req)?;
            let updates = IssueUpdates {
                title: args.title,
                description: args.description,
                design: args.design,
                acceptance_criteria: args.acceptance_criteria,
                notes: args.notes,
                status: args.status.as_deref().map(|s| Status::from(s).normalize()),
                priority: args.priority,
                issue_type: args.issue_type.as_deref().map(|t| IssueType::from(t).normalize()),
                assignee: args.assignee,
                close_reason: args.close_reason,
                estimated_minutes: args.estimated_minutes,
                ..Default::default()
            };
            Ok(json!(engine.update_issue(ctx, &args.id, &updates)?))
        }
        Opcode::Close => {
            let args: CloseArgs = parse(req)?;
            Ok(json!(engine.close_issue(ctx, &args.id, &args.reason)?))
        }
        Opcode::Delete => {
            let args: DeleteArgs = parse(req)?;
            engine.delete_issue(ctx, &args.id)?;
            Ok(json!({"deleted": args.id}))
        }
        Opcode::AddDependency => {
            let args: DependencyArgs = parse(req)?;
            let dep_type = args
                .dep_type
                .as_deref()
                .map(DependencyType::from)
                .unwrap_or_default();
            engine.add_dependency(ctx, &args.issue_id, &args.depends_on_id, dep_type)?;
            Ok(json!({"issue_id": args.issue_id, "depends_on_id": args.depends_on_id}))
        }
        Opcode::RemoveDependency => {
            let args: DependencyArgs = parse(req)?;
            engine.remove_dependency(ctx, &args.issue_id, &args.depends_on_id)?;
            Ok(json!({"issue_id": args.issue_id, "depends_on_id": args.depends_on_id}))
        }
        Opcode::Comment => {
            let args: CommentArgs = parse(req)?;
            Ok(json!(engine.add_comment(ctx, &args.id, &args.text)?))
        }
        Opcode::Import => {
            let args: ImportArgs = parse(req)?;
            let options = ImportOptions {
                orphan_mode: match args.orphan_mode.as_deref() {
                    Some("allow") => OrphanMode::Allow,
                    Some("fail") => OrphanMode::Fail,
                    _ => OrphanMode::Warn,
                },
                strict: args.strict,
                skip_update: args.skip_update,
                protect_local_export_ids: args.protect_local_export_ids,
            };
            let report = engine.import(ctx, &options)?;
            Ok(json!({
                "created": report.created,
                "updated": report.updated,
                "unchanged": report.unchanged,
                "skipped": report.skipped,
                "deleted": report.deleted,
                "collisions": report.collisions,
                "warnings": report.warnings,
            }))
        }
        Opcode::Export => {
            let stats = engine.export(ctx)?;
            Ok(json!({
                "exported": stats.exported,
                "ephemeral_skipped": stats.ephemeral_skipped,
                "text_hash": stats.text_hash,
            }))
        }
        Opcode::VcsStatus => Ok(json!(engine.mirror_status(ctx)?)),
        Opcode::Mutations => {
            let args: MutationsArgs = parse(req)?;
            Ok(json!(engine.mutations_since(args.since_ms)))
        }
        Opcode::Swarm => {
            let args: SwarmArgs = parse(req)?;
            Ok(json!(engine.swarm_analysis(ctx, &args.epic_id)?))
        }
        Opcode::Health | Opcode::Shutdown => {
            // The server intercepts these before dispatch.
            Err(EngineError::Unsupported(req.op.as_str().to_owned()))
        }
    }
}

fn stats_json(engine: &Engine, ctx: &OpContext) -> Result<serde_json::Value, EngineError> {
    let stats = engine.statistics(ctx)?;
    Ok(json!({
        "total_issues": stats.total_issues,
        "open_issues": stats.open_issues,
        "in_progress_issues": stats.in_progress_issues,
        "blocked_issues": stats.blocked_issues,
        "closed_issues": stats.closed_issues,
        "deferred_issues": stats.deferred_issues,
        "tombstones": stats.tombstones,
        "by_type": stats.by_type,
        "by_priority": stats.by_priority,
        "by_assignee": stats.by_assignee,
    }))
}
