//! Odoo accounting over JSON-RPC: overdue invoices, new payments and
//! low-cash alerts in, payments out.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use vaultclaw_core::config::OdooConfig;
use vaultclaw_core::{ActionItem, Priority, Result, VaultClawError};
use vaultclaw_vault::{ApprovalToken, BackoffPolicy, GatedAction, retry_with_backoff};

use crate::watcher::EventSource;

const SEARCH_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct OdooClient {
    config: OdooConfig,
    http: reqwest::Client,
    backoff: BackoffPolicy,
}

impl OdooClient {
    pub fn new(config: OdooConfig, backoff: BackoffPolicy) -> Self {
        let http = crate::http_client(config.timeout_secs);
        Self {
            config,
            http,
            backoff,
        }
    }

    fn ensure_configured(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(VaultClawError::NotConfigured("odoo (disabled)".into()));
        }
        if self.config.username.is_empty() {
            return Err(VaultClawError::NotConfigured("ODOO_USERNAME".into()));
        }
        Ok(())
    }

    /// One JSON-RPC call, retried with backoff on transport failures.
    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        retry_with_backoff(&self.backoff, &format!("odoo {service}.{method}"), || {
            self.call_once(service, method, args.clone())
        })
        .await
    }

    async fn call_once(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "id": 1,
            "params": { "service": service, "method": method, "args": args },
        });
        let url = format!("{}/jsonrpc", self.config.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| VaultClawError::Upstream(format!("Odoo RPC failed: {e}")))?
            .error_for_status()
            .map_err(|e| VaultClawError::Upstream(format!("Odoo RPC failed: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| VaultClawError::Upstream(format!("Invalid Odoo response: {e}")))?;
        rpc_result(body)
    }

    async fn authenticate(&self) -> Result<i64> {
        let c = &self.config;
        let uid = self
            .call(
                "common",
                "authenticate",
                json!([c.db, c.username, c.password, {}]),
            )
            .await?;
        uid.as_i64().ok_or_else(|| {
            VaultClawError::Upstream("Odoo authentication failed, check username / password".into())
        })
    }

    /// Authenticated `execute_kw`.
    pub(crate) async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value> {
        self.ensure_configured()?;
        let uid = self.authenticate().await?;
        let c = &self.config;
        self.call(
            "object",
            "execute_kw",
            json!([c.db, uid, c.password, model, method, args, kwargs]),
        )
        .await
    }

    async fn search_read(&self, model: &str, domain: Value, fields: &[&str]) -> Result<Value> {
        self.execute_kw(
            model,
            "search_read",
            json!([domain]),
            json!({ "fields": fields, "limit": SEARCH_LIMIT }),
        )
        .await
    }

    pub(crate) async fn register_payment(&self, invoice_id: i64, amount: f64) -> Result<Value> {
        let invoices = self
            .execute_kw(
                "account.move",
                "read",
                json!([[invoice_id]]),
                json!({ "fields": ["name", "amount_residual"] }),
            )
            .await?;
        let name = invoices[0]["name"]
            .as_str()
            .ok_or_else(|| VaultClawError::NotFound(format!("odoo invoice {invoice_id}")))?
            .to_string();
        self.execute_kw(
            "account.move",
            "action_register_payment",
            json!([[invoice_id]]),
            json!({}),
        )
        .await?;
        tracing::info!("💸 Payment ${amount:.2} recorded for invoice {name}");
        Ok(json!({ "invoice": name, "amount": amount }))
    }
}

fn rpc_result(mut body: Value) -> Result<Value> {
    if let Some(err) = body.get("error") {
        let msg = err["data"]["message"]
            .as_str()
            .or_else(|| err["message"].as_str())
            .unwrap_or("unknown error");
        return Err(VaultClawError::Upstream(format!("Odoo RPC error: {msg}")));
    }
    Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
}

/// Per-day cursors: payments are read for the previous cursor date once the
/// day rolls over, and at most one low-balance alert is raised per day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DailyCursors {
    pub payments_checked: NaiveDate,
    pub last_alert: Option<NaiveDate>,
}

impl DailyCursors {
    fn new(today: NaiveDate) -> Self {
        Self {
            payments_checked: today,
            last_alert: None,
        }
    }

    /// Day whose payments still need reading, if any.
    fn payment_day_due(&self, today: NaiveDate) -> Option<NaiveDate> {
        (self.payments_checked < today).then_some(self.payments_checked)
    }

    fn alert_due(&self, today: NaiveDate) -> bool {
        self.last_alert != Some(today)
    }
}

pub struct OdooSource {
    client: OdooClient,
    low_balance_threshold: f64,
    cursors: DailyCursors,
}

impl OdooSource {
    pub fn new(client: OdooClient, low_balance_threshold: f64) -> Self {
        Self {
            client,
            low_balance_threshold,
            cursors: DailyCursors::new(Utc::now().date_naive()),
        }
    }
}

#[async_trait]
impl EventSource for OdooSource {
    fn name(&self) -> &str {
        "odoo"
    }

    fn actor(&self) -> &str {
        "OdooWatcher"
    }

    async fn fetch(&mut self) -> Result<Vec<ActionItem>> {
        self.client.ensure_configured()?;
        let today = Utc::now().date_naive();
        let today_str = today.format("%Y-%m-%d").to_string();
        let mut items = Vec::new();
        // Cursors only move once every call in this tick has succeeded.
        let mut next = self.cursors.clone();

        let invoices = self
            .client
            .search_read(
                "account.move",
                json!([
                    ["state", "=", "posted"],
                    ["invoice_date_due", "<", today_str],
                    ["payment_state", "!=", "paid"],
                    ["move_type", "in", ["out_invoice", "in_invoice"]],
                ]),
                &["id", "name", "partner_id", "amount_total", "invoice_date_due", "move_type"],
            )
            .await?;
        items.extend(invoice_items(&invoices));

        if let Some(day) = self.cursors.payment_day_due(today) {
            let payments = self
                .client
                .search_read(
                    "account.payment",
                    json!([
                        ["date", "=", day.format("%Y-%m-%d").to_string()],
                        ["state", "=", "posted"],
                    ]),
                    &["id", "name", "partner_id", "amount", "payment_type", "date"],
                )
                .await?;
            items.extend(payment_items(&payments));
            next.payments_checked = today;
        }

        if self.cursors.alert_due(today) {
            let accounts = self
                .client
                .search_read(
                    "account.account",
                    json!([["account_type", "like", "asset_cash"]]),
                    &["name", "code", "current_balance"],
                )
                .await?;
            if let Some(alert) = balance_alert(cash_total(&accounts), self.low_balance_threshold) {
                items.push(alert);
                next.last_alert = Some(today);
            }
        }

        self.cursors = next;
        Ok(items)
    }
}

fn rows(v: &Value) -> &[Value] {
    v.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// Odoo many2one fields come back as `[id, "Display Name"]` or `false`.
fn partner_name(v: &Value) -> &str {
    v[1].as_str().unwrap_or("Unknown")
}

pub(crate) fn invoice_items(invoices: &Value) -> Vec<ActionItem> {
    rows(invoices)
        .iter()
        .filter_map(|inv| {
            let id = inv["id"].as_i64()?;
            let name = inv["name"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("INV-{id}"));
            let partner = partner_name(&inv["partner_id"]);
            let amount = inv["amount_total"].as_f64().unwrap_or(0.0);
            let due = inv["invoice_date_due"].as_str().unwrap_or("");
            Some(
                ActionItem::new("odoo", "invoice", format!("Overdue Invoice: {name}"))
                    .with_external_id(id.to_string())
                    .with_priority(Priority::High)
                    .with_summary(format!(
                        "**Partner:** {partner}\n**Amount Due:** ${amount:.2}\n**Due Date:** {due}\n**Invoice Type:** {}",
                        inv["move_type"].as_str().unwrap_or("N/A")
                    ))
                    .with_payload(json!({
                        "invoice_id": id,
                        "invoice_name": name,
                        "partner": partner,
                        "amount": amount,
                        "due_date": due,
                    })),
            )
        })
        .collect()
}

pub(crate) fn payment_items(payments: &Value) -> Vec<ActionItem> {
    rows(payments)
        .iter()
        .filter_map(|p| {
            let id = p["id"].as_i64()?;
            let name = p["name"].as_str().unwrap_or("payment");
            let partner = partner_name(&p["partner_id"]);
            let amount = p["amount"].as_f64().unwrap_or(0.0);
            let kind = p["payment_type"].as_str().unwrap_or("inbound");
            Some(
                ActionItem::new("odoo", "payment", format!("New Payment: {name}"))
                    .with_external_id(id.to_string())
                    .with_priority(Priority::Low)
                    .with_summary(format!("**Partner:** {partner}\n**Amount:** ${amount:.2} ({kind})"))
                    .with_payload(json!({
                        "payment_id": id,
                        "name": name,
                        "partner": partner,
                        "amount": amount,
                        "payment_type": kind,
                        "date": p["date"],
                    })),
            )
        })
        .collect()
}

pub(crate) fn cash_total(accounts: &Value) -> f64 {
    rows(accounts)
        .iter()
        .map(|a| a["current_balance"].as_f64().unwrap_or(0.0))
        .sum()
}

pub(crate) fn balance_alert(total_cash: f64, threshold: f64) -> Option<ActionItem> {
    (total_cash < threshold).then(|| {
        ActionItem::new("odoo", "alert", "Low Cash Balance")
            .with_priority(Priority::High)
            .with_summary(format!(
                "Cash on hand **${total_cash:.2}** is below the alert threshold of ${threshold:.2}."
            ))
            .with_payload(json!({ "total_cash": total_cash, "threshold": threshold }))
    })
}

/// Register a payment against an invoice. Gated when the amount is over
/// the approval threshold.
pub struct RecordPayment {
    client: OdooClient,
    pub invoice_id: i64,
    pub amount: f64,
    pub memo: String,
}

impl RecordPayment {
    pub fn new(client: OdooClient, invoice_id: i64, amount: f64, memo: impl Into<String>) -> Self {
        Self {
            client,
            invoice_id,
            amount,
            memo: memo.into(),
        }
    }
}

#[async_trait]
impl GatedAction for RecordPayment {
    fn kind(&self) -> &str {
        "odoo_payment"
    }

    fn amount(&self) -> Option<f64> {
        Some(self.amount)
    }

    fn describe(&self) -> String {
        format!("Payment ${:.2} for invoice {}", self.amount, self.invoice_id)
    }

    fn payload(&self) -> Value {
        json!({ "invoice_id": self.invoice_id, "amount": self.amount, "memo": self.memo })
    }

    async fn execute(self, _token: ApprovalToken) -> Result<Value> {
        self.client.register_payment(self.invoice_id, self.amount).await
    }
}
