//! SQLite persistence for raw records, aggregations and the agent registry.

use super::{AgentDirectory, AgentFilter, AggregationQuery, Page, RecordQuery, RecordStore};
use crate::error::{StoreError, StoreResult};
use crate::records::{Agent, AggregateTotals, AggregationRecord, NormalizedRecord};
use crate::schema::Category;
use crate::utils::PeriodMonth;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

struct RawRow {
    carrier_id: i64,
    period_month: String,
    agent_number: Option<String>,
    agent_name: Option<String>,
    current_amount: Option<f64>,
    previous_amount: Option<f64>,
    change_pct: Option<f64>,
    category: Option<String>,
    source_row: i64,
    layout_id: Option<String>,
    extras: String,
}

impl SqliteStore {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> StoreResult<()> {
        self.lock()?
            .execute_batch(include_str!("../../migrations/001_ingest.sql"))?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    // ── Agent registry ─────────────────────────────────────────

    pub fn add_agent(&self, agent: &Agent) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO agents (id, name, life, elementary) VALUES (?1, ?2, ?3, ?4)",
            params![agent.id, agent.name, agent.life, agent.elementary],
        )?;
        tx.execute(
            "DELETE FROM agent_carrier_numbers WHERE agent_id = ?1",
            params![agent.id],
        )?;
        for (carrier_id, numbers) in &agent.carrier_numbers {
            tx.execute(
                "INSERT INTO agent_carrier_numbers (agent_id, carrier_id, numbers) VALUES (?1, ?2, ?3)",
                params![agent.id, carrier_id, numbers],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_unmapped_sentinel(&self, carrier_id: i64, agent: &Agent) -> StoreResult<()> {
        self.add_agent(agent)?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO unmapped_sentinels (carrier_id, agent_id) VALUES (?1, ?2)",
            params![carrier_id, agent.id],
        )?;
        Ok(())
    }

    fn load_agent(conn: &Connection, agent_id: i64) -> StoreResult<Option<Agent>> {
        let head = conn
            .query_row(
                "SELECT id, name, life, elementary FROM agents WHERE id = ?1",
                params![agent_id],
                |row| {
                    Ok(Agent {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        carrier_numbers: BTreeMap::new(),
                        life: row.get(2)?,
                        elementary: row.get(3)?,
                    })
                },
            )
            .optional()?;

        let Some(mut agent) = head else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT carrier_id, numbers FROM agent_carrier_numbers WHERE agent_id = ?1",
        )?;
        agent.carrier_numbers = stmt
            .query_map(params![agent_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<i64, String>, _>>()?;
        Ok(Some(agent))
    }
}

fn decode_category(raw: Option<String>) -> StoreResult<Option<Category>> {
    raw.map(|s| serde_json::from_value(serde_json::Value::String(s)))
        .transpose()
        .map_err(StoreError::from)
}

fn decode_month(raw: &str) -> StoreResult<PeriodMonth> {
    PeriodMonth::parse(raw).map_err(|e| StoreError::Query(e.to_string()))
}

impl RawRow {
    fn into_record(self) -> StoreResult<NormalizedRecord> {
        Ok(NormalizedRecord {
            carrier_id: self.carrier_id,
            period_month: decode_month(&self.period_month)?,
            agent_number: self.agent_number,
            agent_name: self.agent_name,
            current_amount: self.current_amount,
            previous_amount: self.previous_amount,
            change_pct: self.change_pct,
            category: decode_category(self.category)?,
            source_row: usize::try_from(self.source_row).unwrap_or_default(),
            layout_id: self.layout_id,
            extras: serde_json::from_str(&self.extras)?,
        })
    }
}

impl RecordStore for SqliteStore {
    fn insert_records(&self, records: &[NormalizedRecord]) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO raw_records (carrier_id, period_month, agent_number, agent_name,
                    current_amount, previous_amount, change_pct, category, source_row, layout_id, extras)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.carrier_id,
                    record.period_month.to_string(),
                    record.agent_number,
                    record.agent_name,
                    record.current_amount,
                    record.previous_amount,
                    record.change_pct,
                    record.category.map(|c| c.to_string()),
                    record.source_row as i64,
                    record.layout_id,
                    serde_json::to_string(&record.extras)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn delete_records(
        &self,
        carrier_id: i64,
        period_month: PeriodMonth,
        layout_id: Option<&str>,
    ) -> StoreResult<usize> {
        let deleted = self.lock()?.execute(
            "DELETE FROM raw_records
             WHERE carrier_id = ?1 AND period_month = ?2 AND layout_id IS ?3",
            params![carrier_id, period_month.to_string(), layout_id],
        )?;
        Ok(deleted)
    }

    fn fetch_records(&self, query: &RecordQuery, page: Page) -> StoreResult<Vec<NormalizedRecord>> {
        let mut sql = String::from(
            "SELECT carrier_id, period_month, agent_number, agent_name, current_amount,
                    previous_amount, change_pct, category, source_row, layout_id, extras
             FROM raw_records WHERE carrier_id = ?1 AND period_month = ?2",
        );
        let mut args: Vec<SqlValue> = vec![
            SqlValue::Integer(query.carrier_id),
            SqlValue::Text(query.period_month.to_string()),
        ];

        let placeholders = |args: &mut Vec<SqlValue>, tokens: &[String]| -> String {
            let mut marks = Vec::with_capacity(tokens.len());
            for token in tokens {
                args.push(SqlValue::Text(token.clone()));
                marks.push(format!("?{}", args.len()));
            }
            marks.join(", ")
        };

        match &query.agents {
            AgentFilter::Any => {}
            AgentFilter::In(tokens) if tokens.is_empty() => return Ok(Vec::new()),
            AgentFilter::In(tokens) => {
                let marks = placeholders(&mut args, tokens);
                sql.push_str(&format!(" AND agent_number IN ({})", marks));
            }
            AgentFilter::NotIn(tokens) if tokens.is_empty() => {}
            AgentFilter::NotIn(tokens) => {
                let marks = placeholders(&mut args, tokens);
                sql.push_str(&format!(
                    " AND (agent_number IS NULL OR agent_number NOT IN ({}))",
                    marks
                ));
            }
        }

        if let Some(name) = &query.exclude_agent_name {
            args.push(SqlValue::Text(name.clone()));
            sql.push_str(&format!(
                " AND (agent_name IS NULL OR agent_name <> ?{})",
                args.len()
            ));
        }

        args.push(SqlValue::Integer(page.limit as i64));
        sql.push_str(&format!(" ORDER BY id ASC LIMIT ?{}", args.len()));
        args.push(SqlValue::Integer(page.offset as i64));
        sql.push_str(&format!(" OFFSET ?{}", args.len()));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(RawRow {
                    carrier_id: row.get(0)?,
                    period_month: row.get(1)?,
                    agent_number: row.get(2)?,
                    agent_name: row.get(3)?,
                    current_amount: row.get(4)?,
                    previous_amount: row.get(5)?,
                    change_pct: row.get(6)?,
                    category: row.get(7)?,
                    source_row: row.get(8)?,
                    layout_id: row.get(9)?,
                    extras: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRow::into_record).collect()
    }

    fn upsert_aggregations(&self, rows: &[AggregationRecord]) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO agent_aggregations
                    (agent_id, carrier_id, period_month, totals, cumulative_share)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (agent_id, carrier_id, period_month)
                 DO UPDATE SET totals = excluded.totals,
                               cumulative_share = excluded.cumulative_share",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.agent_id,
                    row.carrier_id,
                    row.period_month.to_string(),
                    serde_json::to_string(&row.totals)?,
                    row.cumulative_share
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn fetch_aggregations(&self, query: &AggregationQuery) -> StoreResult<Vec<AggregationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT agent_id, carrier_id, period_month, totals, cumulative_share
             FROM agent_aggregations
             WHERE carrier_id = ?1 AND period_month >= ?2 AND period_month <= ?3
             ORDER BY agent_id ASC, period_month ASC",
        )?;
        let raw = stmt
            .query_map(
                params![query.carrier_id, query.from.to_string(), query.to.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(raw.len());
        for (agent_id, carrier_id, month, totals, share) in raw {
            if let Some(ids) = &query.agent_ids {
                if !ids.contains(&agent_id) {
                    continue;
                }
            }
            out.push(AggregationRecord {
                agent_id,
                carrier_id,
                period_month: decode_month(&month)?,
                totals: serde_json::from_str::<AggregateTotals>(&totals)?,
                cumulative_share: share
                    .as_deref()
                    .map(|raw| serde_json::from_str::<AggregateTotals>(raw))
                    .transpose()?,
            });
        }
        Ok(out)
    }
}

impl AgentDirectory for SqliteStore {
    fn agents_for_carrier(&self, carrier_id: i64) -> StoreResult<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT n.agent_id FROM agent_carrier_numbers n
             WHERE n.carrier_id = ?1 AND trim(n.numbers) <> ''
               AND n.agent_id NOT IN (SELECT agent_id FROM unmapped_sentinels)
             ORDER BY n.agent_id ASC",
        )?;
        let ids = stmt
            .query_map(params![carrier_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut agents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(agent) = Self::load_agent(&conn, id)? {
                agents.push(agent);
            }
        }
        Ok(agents)
    }

    fn unmapped_sentinel(&self, carrier_id: i64) -> StoreResult<Option<Agent>> {
        let conn = self.lock()?;
        let agent_id: Option<i64> = conn
            .query_row(
                "SELECT agent_id FROM unmapped_sentinels WHERE carrier_id = ?1",
                params![carrier_id],
                |row| row.get(0),
            )
            .optional()?;
        match agent_id {
            Some(id) => Self::load_agent(&conn, id),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::CategoryTotals;
    use crate::store::fetch_all;

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn record(agent: Option<&str>, amount: f64) -> NormalizedRecord {
        NormalizedRecord {
            carrier_id: 7,
            period_month: PeriodMonth::parse("2025-03").unwrap(),
            agent_number: agent.map(str::to_string),
            agent_name: Some("דני".to_string()),
            current_amount: Some(amount),
            previous_amount: None,
            change_pct: None,
            category: Some(Category::PensionTransfer),
            source_row: 5,
            layout_id: Some("transfer".to_string()),
            extras: BTreeMap::from([("product".to_string(), serde_json::json!("גמל"))]),
        }
    }

    #[test]
    fn test_insert_fetch_filters_and_order() {
        let store = store();
        store
            .insert_records(&[record(Some("111"), 1.0), record(None, 2.0), record(Some("222"), 3.0)])
            .unwrap();

        let month = PeriodMonth::parse("2025-03").unwrap();
        let known = RecordQuery::new(7, month).with_agents(AgentFilter::In(vec!["111".into()]));
        let rows = fetch_all(&store, &known, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, Some(Category::PensionTransfer));
        assert_eq!(rows[0].extras["product"], serde_json::json!("גמל"));

        let unknown = RecordQuery::new(7, month).with_agents(AgentFilter::NotIn(vec!["111".into()]));
        let rows = fetch_all(&store, &unknown, 1).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.current_amount).collect::<Vec<_>>(),
            vec![Some(2.0), Some(3.0)]
        );

        assert_eq!(store.delete_records(7, month, Some("financial")).unwrap(), 0);
        assert_eq!(store.delete_records(7, month, Some("transfer")).unwrap(), 3);
    }

    #[test]
    fn test_open_file_enables_wal() {
        let path = std::env::temp_dir().join(format!("carrier-ingest-{}.db", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();
        {
            let store = SqliteStore::open(&path_str).unwrap();
            store.migrate().unwrap();
            let mode: String = store
                .lock()
                .unwrap()
                .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
                .unwrap();
            assert_eq!(mode, "wal");
        }
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
        }

        let missing_dir = std::env::temp_dir().join("carrier-ingest-missing").join("x").join("db");
        assert!(SqliteStore::open(missing_dir.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_aggregation_upsert_and_range() {
        let store = store();
        let jan = PeriodMonth::parse("2025-01").unwrap();
        let feb = PeriodMonth::parse("2025-02").unwrap();
        let row = |month, pension| {
            AggregationRecord::new(
                3,
                7,
                month,
                AggregateTotals::Categories(CategoryTotals {
                    pension,
                    ..Default::default()
                }),
            )
        };
        let mut january = row(jan, 1.0);
        january.cumulative_share = Some(january.totals);
        store.upsert_aggregations(&[january, row(feb, 2.0)]).unwrap();
        store.upsert_aggregations(&[row(feb, 5.0)]).unwrap();

        let rows = store
            .fetch_aggregations(&AggregationQuery {
                carrier_id: 7,
                agent_ids: Some(vec![3]),
                from: jan,
                to: feb,
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cumulative_share, Some(rows[0].totals));
        assert_eq!(rows[1].totals.as_categories().unwrap().pension, 5.0);
        assert_eq!(rows[1].cumulative_share, None);
    }

    #[test]
    fn test_agent_directory_round_trip() {
        let store = store();
        store
            .add_agent(&Agent::new(1, "דני").with_numbers(7, "111,222"))
            .unwrap();
        store
            .set_unmapped_sentinel(7, &Agent::new(99, "לא ממופה").with_numbers(7, "UNMAPPED"))
            .unwrap();

        let agents = store.agents_for_carrier(7).unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].tokens_for(7), vec!["111", "222"]);
        assert_eq!(store.unmapped_sentinel(7).unwrap().map(|a| a.id), Some(99));
    }
}
