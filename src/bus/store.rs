/**
 * Durable Message Append (C4)
 *
 * DESIGN DECISION: `message_num` is assigned inside the same transaction
 * that inserts the row, reading `max(message_num)` for the agent and
 * writing `max+1` — a tenant-serialized read-modify-write, since
 * `GraphDriver::transaction` already holds the tenant's write mutex for
 * its duration.
 * WHY: Two concurrent appends for the same agent must never be handed the
 * same `message_num` (data model invariant: messages are totally ordered,
 * and the set of `message_num` values forms a contiguous prefix of the
 * positive integers).
 */
use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;

use crate::error::Result;
use crate::graph::GraphDriver;
use crate::tenant::TenantId;

use super::types::{Message, MessageType, Role};

pub struct MessageStore {
    driver: Arc<GraphDriver>,
    tenant: TenantId,
}

impl MessageStore {
    pub fn new(driver: Arc<GraphDriver>, tenant: TenantId) -> Self {
        Self { driver, tenant }
    }

    /// Appends a message, assigning the next `message_num` for its agent.
    /// Returns the stored message (with `message_num` filled in).
    pub async fn append(
        &self,
        agent_id: &str,
        role: Role,
        message_type: MessageType,
        content: String,
        tool_use_id: Option<String>,
        parent_tool_use_id: Option<String>,
        extra: std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<Message> {
        let tenant_str = self.tenant.as_str().to_string();
        let agent_id_owned = agent_id.to_string();
        let created_at = Utc::now();

        let extra_json = serde_json::to_string(&extra)?;
        let role_json = serde_json::to_string(&role)?;
        let type_json = serde_json::to_string(&message_type)?;

        let message_num: u64 = self
            .driver
            .transaction(&self.tenant, {
                let tenant_str = tenant_str.clone();
                let agent_id_owned = agent_id_owned.clone();
                let content = content.clone();
                let tool_use_id = tool_use_id.clone();
                let parent_tool_use_id = parent_tool_use_id.clone();
                move |tx| {
                    let next: i64 = tx
                        .query_row(
                            "SELECT COALESCE(MAX(message_num), 0) + 1 FROM messages WHERE agent_id = ?1 AND tenant_id = ?2",
                            params![agent_id_owned, tenant_str],
                            |row| row.get(0),
                        )?;

                    let body = serde_json::json!({
                        "role": serde_json::from_str::<serde_json::Value>(&role_json).unwrap(),
                        "type": serde_json::from_str::<serde_json::Value>(&type_json).unwrap(),
                        "content": content,
                        "tool_use_id": tool_use_id,
                        "parent_tool_use_id": parent_tool_use_id,
                        "extra": serde_json::from_str::<serde_json::Value>(&extra_json).unwrap(),
                    })
                    .to_string();

                    tx.execute(
                        "INSERT INTO messages (agent_id, message_num, tenant_id, role, body, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![agent_id_owned, next, tenant_str, role.as_str(), body, created_at.to_rfc3339()],
                    )?;
                    Ok(next as u64)
                }
            })
            .await?;

        Ok(Message {
            agent_id: agent_id.to_string(),
            tenant_id: self.tenant.as_str().to_string(),
            message_num,
            role,
            message_type,
            content,
            tool_use_id,
            parent_tool_use_id,
            extra,
            created_at,
        })
    }

    /// Paginated read of the durable log: messages with `message_num >
    /// after`, ascending, capped at `limit`.
    pub async fn get_after(&self, agent_id: &str, after: u64, limit: usize) -> Result<Vec<Message>> {
        let tenant = self.tenant.as_str().to_string();
        let agent_id = agent_id.to_string();
        let rows = self
            .driver
            .read(&self.tenant, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT agent_id, tenant_id, message_num, body, created_at FROM messages \
                     WHERE agent_id = ?1 AND tenant_id = ?2 AND message_num > ?3 \
                     ORDER BY message_num ASC LIMIT ?4",
                )?;
                crate::graph::normalize_rows(&mut stmt, params![agent_id, tenant, after as i64, limit as i64])
            })
            .await?;

        Ok(rows.into_iter().filter_map(row_to_message).collect())
    }
}

fn row_to_message(row: crate::graph::Row) -> Option<Message> {
    let body: serde_json::Value = row.get("body").and_then(|v| v.as_str()).and_then(|s| serde_json::from_str(s).ok())?;
    let role: Role = serde_json::from_value(body.get("role")?.clone()).ok()?;
    let message_type: MessageType = serde_json::from_value(body.get("type")?.clone()).ok()?;
    let extra = body
        .get("extra")
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Some(Message {
        agent_id: row.get("agent_id")?.as_str()?.to_string(),
        tenant_id: row.get("tenant_id")?.as_str()?.to_string(),
        message_num: row.get("message_num")?.as_i64()? as u64,
        role,
        message_type,
        content: body.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        tool_use_id: body.get("tool_use_id").and_then(|v| v.as_str()).map(String::from),
        parent_tool_use_id: body.get("parent_tool_use_id").and_then(|v| v.as_str()).map(String::from),
        extra,
        created_at: row.get("created_at")?.as_str()?.parse().ok()?,
    })
}
