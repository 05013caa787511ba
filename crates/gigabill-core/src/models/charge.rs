//! Charge workflow types
//!
//! A charge is one all-or-nothing operation: price a request, apply an
//! optional voucher, debit the balance, run the fulfilment action, and
//! record what happened. These types carry the inputs and outputs of that
//! workflow; the workflow itself lives in the services crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pricing::ServiceType;

/// What a fulfilment action produced, classified from its raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FulfilDetail {
    /// Asynchronous task queued upstream
    Task { task_id: String, status: String },
    /// Direct file made available
    File {
        link: String,
        filename: String,
        filesize: i64,
    },
    /// Payload shape not recognized; kept verbatim
    Unknown { payload: Value },
}

impl FulfilDetail {
    /// Classify a raw upstream payload.
    ///
    /// A payload carrying `task.id` is a queued task; one carrying a
    /// `download` object is a direct file. Anything else is preserved
    /// as-is.
    pub fn classify(payload: Value) -> Self {
        if let Some(task) = payload.get("task") {
            if let Some(task_id) = task.get("id").and_then(Value::as_str) {
                let status = task
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("queued")
                    .to_string();
                return FulfilDetail::Task {
                    task_id: task_id.to_string(),
                    status,
                };
            }
        }
        if let Some(download) = payload.get("download") {
            let link = download
                .get("link")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let filename = download
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let filesize = download
                .get("filesize")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            return FulfilDetail::File {
                link,
                filename,
                filesize,
            };
        }
        FulfilDetail::Unknown { payload }
    }

    /// Short discriminator stored alongside charge records
    pub fn kind(&self) -> &'static str {
        match self {
            FulfilDetail::Task { .. } => "task",
            FulfilDetail::File { .. } => "file",
            FulfilDetail::Unknown { .. } => "unknown",
        }
    }
}

/// Result of a fulfilment action, fed back into the charge workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfilOutcome {
    /// Upstream reference (task id, link, or generated id)
    pub reference: String,

    /// Name shown on the ledger entry
    pub display_name: String,

    /// Actual size if the upstream reported one
    pub size_bytes: Option<i64>,

    /// Classified payload
    pub detail: FulfilDetail,
}

/// Input to the charge workflow
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeCommand {
    pub user_id: i64,
    pub service: ServiceType,

    /// Size to price; charged as one minimum unit when absent
    pub size_bytes: Option<i64>,

    /// Optional voucher code, applied atomically with the debit
    pub voucher_code: Option<String>,
}

/// Outcome of a committed charge
#[derive(Debug, Clone, Serialize)]
pub struct ChargeReceipt {
    /// Amount actually debited
    pub final_price: i64,

    /// Price before any discount
    pub original_price: i64,

    /// Discount applied, zero without a voucher
    pub discount_amount: i64,

    /// Redeemed voucher code, if any
    pub voucher_code: Option<String>,

    /// Units the price covered
    pub charged_units: i64,

    /// Size the units covered, in GB
    pub charged_size_gb: i64,

    /// Upstream reference from the fulfilment action
    pub external_reference: String,

    /// Balance after the debit
    pub new_balance: i64,

    /// Classified fulfilment payload
    pub detail: FulfilDetail,
}

/// Persisted record of a committed charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    /// Unique identifier
    pub id: i64,

    /// Charged user
    pub user_id: i64,

    /// Service the charge was for
    pub service_type: ServiceType,

    /// Amount debited
    pub final_price: i64,

    /// Price before discount
    pub original_price: i64,

    /// Discount applied
    pub discount_amount: i64,

    /// Redeemed voucher code, if any
    pub voucher_code: Option<String>,

    /// Upstream reference
    pub external_reference: String,

    /// Fulfilment payload discriminator
    pub detail_kind: String,

    /// Ledger-style description
    pub description: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ChargeRecord {
    /// Create a record from a committed receipt
    pub fn new(user_id: i64, service: ServiceType, receipt: &ChargeReceipt) -> Self {
        Self {
            id: 0,
            user_id,
            service_type: service,
            final_price: receipt.final_price,
            original_price: receipt.original_price,
            discount_amount: receipt.discount_amount,
            voucher_code: receipt.voucher_code.clone(),
            external_reference: receipt.external_reference.clone(),
            detail_kind: receipt.detail.kind().to_string(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_task_payload() {
        let detail = FulfilDetail::classify(json!({
            "task": {"id": "abc-123", "status": "downloading"},
        }));
        assert_eq!(
            detail,
            FulfilDetail::Task {
                task_id: "abc-123".to_string(),
                status: "downloading".to_string(),
            }
        );
        assert_eq!(detail.kind(), "task");
    }

    #[test]
    fn test_classify_file_payload() {
        let detail = FulfilDetail::classify(json!({
            "download": {
                "link": "https://cdn.example/f.bin",
                "filename": "f.bin",
                "filesize": 1048576,
            },
        }));
        assert_eq!(
            detail,
            FulfilDetail::File {
                link: "https://cdn.example/f.bin".to_string(),
                filename: "f.bin".to_string(),
                filesize: 1048576,
            }
        );
        assert_eq!(detail.kind(), "file");
    }

    #[test]
    fn test_classify_unknown_kept_verbatim() {
        let payload = json!({"status": "ok", "note": "nothing standard"});
        let detail = FulfilDetail::classify(payload.clone());
        assert_eq!(detail, FulfilDetail::Unknown { payload });
        assert_eq!(detail.kind(), "unknown");
    }

    #[test]
    fn test_classify_task_without_id_falls_through() {
        // A "task" object without an id is not a recognizable task.
        let payload = json!({"task": {"status": "queued"}});
        let detail = FulfilDetail::classify(payload);
        assert_eq!(detail.kind(), "unknown");
    }

    #[test]
    fn test_record_from_receipt() {
        let receipt = ChargeReceipt {
            final_price: 1300,
            original_price: 1300,
            discount_amount: 0,
            voucher_code: None,
            charged_units: 2,
            charged_size_gb: 2,
            external_reference: "abc-123".to_string(),
            new_balance: 8700,
            detail: FulfilDetail::Task {
                task_id: "abc-123".to_string(),
                status: "queued".to_string(),
            },
        };
        let record = ChargeRecord::new(7, ServiceType::Torrent, &receipt);

        assert_eq!(record.user_id, 7);
        assert_eq!(record.final_price, 1300);
        assert_eq!(record.detail_kind, "task");
        assert_eq!(record.external_reference, "abc-123");
    }
}
