//! Backend tools the chat model can call.
//!
//! The tool set is a closed enum: adding or removing a tool is a
//! compile-time-checked change to [`ToolKind`], its schema, and the
//! dispatch match. Tools read the listing tables and never talk to the
//! language model themselves.
//!
//! Every failure mode folds into the result payload — an unknown name, a
//! failed query, a missing event — so a broken tool degrades the turn
//! instead of aborting it.

use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::listings;
use crate::models::CallerIdentity;

/// The fixed set of callable tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    GetLatestEvents,
    GetEventById,
    GetLatestJobs,
    RequireLogin,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get_latest_events" => Some(ToolKind::GetLatestEvents),
            "get_event_by_id" => Some(ToolKind::GetEventById),
            "get_latest_jobs" => Some(ToolKind::GetLatestJobs),
            "require_login" => Some(ToolKind::RequireLogin),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::GetLatestEvents => "get_latest_events",
            ToolKind::GetEventById => "get_event_by_id",
            ToolKind::GetLatestJobs => "get_latest_jobs",
            ToolKind::RequireLogin => "require_login",
        }
    }
}

/// OpenAI function-calling definitions for every tool, passed to the first
/// model call of each turn.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "get_latest_events",
                "description": "Fetch the latest approved/featured events from the platform. Use this when users ask about current events, what's happening, or upcoming events.",
                "parameters": {
                    "type": "object",
                    "properties": {},
                    "required": []
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_event_by_id",
                "description": "Get detailed information about a specific event by its ID.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "event_id": {
                            "type": "integer",
                            "description": "The ID of the event to retrieve"
                        }
                    },
                    "required": ["event_id"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_latest_jobs",
                "description": "Fetch the latest job postings on the platform. Use this when users ask about available jobs, job opportunities, or what positions are open.",
                "parameters": {
                    "type": "object",
                    "properties": {},
                    "required": []
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "require_login",
                "description": "Tell the user they need to login to perform an action like posting events, applying to jobs, or accessing protected features.",
                "parameters": {
                    "type": "object",
                    "properties": {},
                    "required": []
                }
            }
        }),
    ]
}

/// Executes tools against the listing tables, optionally on behalf of an
/// authenticated caller (unused by the current tools, carried for scoping).
pub struct ToolRegistry {
    pool: SqlitePool,
    #[allow(dead_code)]
    caller: Option<CallerIdentity>,
}

impl ToolRegistry {
    pub fn new(pool: SqlitePool, caller: Option<CallerIdentity>) -> Self {
        Self { pool, caller }
    }

    /// Execute a tool by name. Never errors: every outcome is a JSON
    /// payload with a `success` flag.
    pub async fn execute(&self, name: &str, args: &Value) -> Value {
        let Some(kind) = ToolKind::from_name(name) else {
            return json!({
                "success": false,
                "error": format!("Unknown tool: {}", name),
            });
        };

        let result = match kind {
            ToolKind::GetLatestEvents => self.get_latest_events().await,
            ToolKind::GetEventById => self.get_event_by_id(args).await,
            ToolKind::GetLatestJobs => self.get_latest_jobs().await,
            ToolKind::RequireLogin => Ok(require_login_payload()),
        };

        result.unwrap_or_else(|e| {
            json!({
                "success": false,
                "error": format!("Tool execution failed: {}", e),
            })
        })
    }

    async fn get_latest_events(&self) -> anyhow::Result<Value> {
        let events = listings::fetch_featured_events(&self.pool).await?;
        Ok(json!({ "success": true, "events": events }))
    }

    async fn get_event_by_id(&self, args: &Value) -> anyhow::Result<Value> {
        let Some(event_id) = args.get("event_id").and_then(|v| v.as_i64()) else {
            return Ok(json!({
                "success": false,
                "error": "Missing or invalid event_id",
            }));
        };

        match listings::fetch_event(&self.pool, event_id).await? {
            Some(event) => Ok(json!({ "success": true, "event": event })),
            None => Ok(json!({ "success": false, "error": "Event not found" })),
        }
    }

    async fn get_latest_jobs(&self) -> anyhow::Result<Value> {
        let jobs = listings::fetch_recent_jobs(&self.pool).await?;
        Ok(json!({ "success": true, "jobs": jobs }))
    }
}

/// Standard payload when the user must log in first. No side effect; the
/// model uses it to phrase a login prompt.
fn require_login_payload() -> Value {
    json!({
        "success": false,
        "requires_auth": true,
        "message": "You need to be logged in to perform this action. Please log in at /login",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> ToolRegistry {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        ToolRegistry::new(pool, None)
    }

    async fn seed_event(registry: &ToolRegistry, title: &str, featured: bool, created_at: i64) {
        sqlx::query(
            "INSERT INTO events (title, description, date, location, is_featured, created_at)
             VALUES (?, ?, NULL, NULL, ?, ?)",
        )
        .bind(title)
        .bind(format!("{} description", title))
        .bind(featured as i64)
        .bind(created_at)
        .execute(&registry.pool)
        .await
        .unwrap();
    }

    #[test]
    fn test_schema_names_match_dispatch() {
        for schema in tool_schemas() {
            let name = schema["function"]["name"].as_str().unwrap();
            assert!(ToolKind::from_name(name).is_some(), "no dispatch for {}", name);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let reg = registry().await;
        let result = reg.execute("nonexistent_tool", &json!({})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Unknown tool: nonexistent_tool");
    }

    #[tokio::test]
    async fn test_get_latest_events_filters_featured() {
        let reg = registry().await;
        seed_event(&reg, "Open Mic", false, 100).await;
        seed_event(&reg, "Festival", true, 200).await;
        seed_event(&reg, "Gallery Night", true, 300).await;

        let result = reg.execute("get_latest_events", &json!({})).await;
        assert_eq!(result["success"], true);
        let events = result["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["title"], "Gallery Night");
        assert_eq!(events[1]["title"], "Festival");
    }

    #[tokio::test]
    async fn test_get_event_by_id_not_found() {
        let reg = registry().await;
        let result = reg
            .execute("get_event_by_id", &json!({"event_id": 42}))
            .await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Event not found");
    }

    #[tokio::test]
    async fn test_get_event_by_id_missing_argument() {
        let reg = registry().await;
        let result = reg.execute("get_event_by_id", &json!({})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Missing or invalid event_id");
    }

    #[tokio::test]
    async fn test_require_login_fixed_payload() {
        let reg = registry().await;
        let result = reg.execute("require_login", &json!({})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["requires_auth"], true);
        assert!(result["message"].as_str().unwrap().contains("logged in"));
    }

    #[tokio::test]
    async fn test_backing_query_failure_is_contained() {
        // A registry over a database without the listing tables
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let reg = ToolRegistry::new(pool, None);

        let result = reg.execute("get_latest_events", &json!({})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"]
            .as_str()
            .unwrap()
            .starts_with("Tool execution failed:"));
    }
}
