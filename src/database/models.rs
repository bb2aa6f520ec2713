//! Domain model for the governance control plane.
//!
//! Entities mirror the relational schema one to one. JSON-valued columns
//! (condition trees, scopes, audit diffs) are surfaced as structured
//! `serde_json::Value`s, never opaque strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::GovernanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Allowlist,
    Blocklist,
    Auth,
    Monitoring,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowlist => "ALLOWLIST",
            Self::Blocklist => "BLOCKLIST",
            Self::Auth => "AUTH",
            Self::Monitoring => "MONITORING",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "ALLOWLIST" => Ok(Self::Allowlist),
            "BLOCKLIST" => Ok(Self::Blocklist),
            "AUTH" => Ok(Self::Auth),
            "MONITORING" => Ok(Self::Monitoring),
            other => Err(GovernanceError::validation(format!(
                "unknown rule type: {}",
                other
            ))),
        }
    }

    /// Evaluation mode carried in the compiled artifact.
    pub fn evaluation_mode(&self) -> &'static str {
        match self {
            Self::Allowlist | Self::Blocklist | Self::Auth => "FIRST_MATCH",
            Self::Monitoring => "ALL_MATCHING",
        }
    }

    /// Runtime key used in object-storage paths and manifest pointers.
    /// Governance-only types are never published.
    pub fn ruleset_key(&self) -> Option<&'static str> {
        match self {
            Self::Auth => Some("CARD_AUTH"),
            Self::Monitoring => Some("CARD_MONITORING"),
            Self::Allowlist | Self::Blocklist => None,
        }
    }
}

/// Lifecycle of every versioned entity. ACTIVE applies to ruleset versions
/// only; the approval engine rejects it elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Active,
    Superseded,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Active => "ACTIVE",
            Self::Superseded => "SUPERSEDED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "ACTIVE" => Ok(Self::Active),
            "SUPERSEDED" => Ok(Self::Superseded),
            other => Err(GovernanceError::integrity(format!(
                "unknown version status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Approve,
    Decline,
    Review,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Decline => "DECLINE",
            Self::Review => "REVIEW",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "APPROVE" => Ok(Self::Approve),
            "DECLINE" => Ok(Self::Decline),
            "REVIEW" => Ok(Self::Review),
            other => Err(GovernanceError::validation(format!(
                "unknown rule action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Enum,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Number => "NUMBER",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Enum => "ENUM",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "STRING" => Ok(Self::String),
            "NUMBER" => Ok(Self::Number),
            "BOOLEAN" => Ok(Self::Boolean),
            "DATE" => Ok(Self::Date),
            "ENUM" => Ok(Self::Enum),
            other => Err(GovernanceError::validation(format!(
                "unknown data type: {}",
                other
            ))),
        }
    }
}

/// Closed operator set for condition-tree leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::Between => "BETWEEN",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::StartsWith => "STARTS_WITH",
            Self::EndsWith => "ENDS_WITH",
            Self::Regex => "REGEX",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "EQ" => Ok(Self::Eq),
            "NE" => Ok(Self::Ne),
            "GT" => Ok(Self::Gt),
            "GTE" => Ok(Self::Gte),
            "LT" => Ok(Self::Lt),
            "LTE" => Ok(Self::Lte),
            "IN" => Ok(Self::In),
            "NOT_IN" => Ok(Self::NotIn),
            "BETWEEN" => Ok(Self::Between),
            "CONTAINS" => Ok(Self::Contains),
            "NOT_CONTAINS" => Ok(Self::NotContains),
            "STARTS_WITH" => Ok(Self::StartsWith),
            "ENDS_WITH" => Ok(Self::EndsWith),
            "REGEX" => Ok(Self::Regex),
            other => Err(GovernanceError::validation(format!(
                "unknown operator: {}",
                other
            ))),
        }
    }

    /// Operators taking a list operand rather than a scalar.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::Between)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    RuleVersion,
    RulesetVersion,
    FieldVersion,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleVersion => "RULE_VERSION",
            Self::RulesetVersion => "RULESET_VERSION",
            Self::FieldVersion => "FIELD_VERSION",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "RULE_VERSION" => Ok(Self::RuleVersion),
            "RULESET_VERSION" => Ok(Self::RulesetVersion),
            "FIELD_VERSION" => Ok(Self::FieldVersion),
            other => Err(GovernanceError::validation(format!(
                "unknown entity type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Submit,
    Approve,
    Reject,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "SUBMIT",
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "SUBMIT" => Ok(Self::Submit),
            "APPROVE" => Ok(Self::Approve),
            "REJECT" => Ok(Self::Reject),
            other => Err(GovernanceError::integrity(format!(
                "unknown approval action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GovernanceError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(GovernanceError::integrity(format!(
                "unknown approval status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleField {
    pub field_key: String,
    pub field_id: i64,
    pub display_name: String,
    pub description: String,
    pub data_type: DataType,
    pub allowed_operators: Vec<Operator>,
    pub multi_value_allowed: bool,
    pub is_sensitive: bool,
    pub is_active: bool,
    pub current_version: i64,
    pub row_version: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFieldVersion {
    pub field_version_id: String,
    pub field_key: String,
    pub version: i64,
    pub display_name: String,
    pub description: String,
    pub data_type: DataType,
    pub allowed_operators: Vec<Operator>,
    pub multi_value_allowed: bool,
    pub is_sensitive: bool,
    pub status: VersionStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub field_key: String,
    pub meta_key: String,
    pub meta_value: Value,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRegistryManifest {
    pub registry_version: i64,
    pub artifact_uri: String,
    pub checksum: String,
    pub field_count: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub rule_name: String,
    pub description: String,
    pub rule_type: RuleType,
    pub status: VersionStatus,
    pub current_version: i64,
    pub row_version: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVersion {
    pub rule_version_id: String,
    pub rule_id: String,
    pub version: i64,
    pub condition_tree: Value,
    pub scope: Value,
    pub priority: i64,
    pub action: RuleAction,
    pub status: VersionStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub ruleset_id: String,
    pub environment: String,
    pub region: String,
    pub country: String,
    pub rule_type: RuleType,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetVersion {
    pub ruleset_version_id: String,
    pub ruleset_id: String,
    pub version: i64,
    pub status: VersionStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approval_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: ApprovalAction,
    pub status: ApprovalStatus,
    pub maker: String,
    pub checker: Option<String>,
    pub remarks: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetManifest {
    pub manifest_id: String,
    pub environment: String,
    pub region: String,
    pub country: String,
    pub rule_type: RuleType,
    pub ruleset_version: i64,
    pub ruleset_version_id: String,
    pub field_registry_version: Option<i64>,
    pub artifact_uri: String,
    pub checksum: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Value, GovernanceError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn optional_json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>, GovernanceError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| serde_json::from_str(&s).map_err(GovernanceError::from))
        .transpose()
}

fn operators_column(row: &SqliteRow, column: &str) -> Result<Vec<Operator>, GovernanceError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

impl RuleField {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            field_key: row.try_get("field_key")?,
            field_id: row.try_get("field_id")?,
            display_name: row.try_get("display_name")?,
            description: row.try_get("description")?,
            data_type: DataType::parse(row.try_get::<String, _>("data_type")?.as_str())?,
            allowed_operators: operators_column(row, "allowed_operators")?,
            multi_value_allowed: row.try_get("multi_value_allowed")?,
            is_sensitive: row.try_get("is_sensitive")?,
            is_active: row.try_get("is_active")?,
            current_version: row.try_get("current_version")?,
            row_version: row.try_get("row_version")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl RuleFieldVersion {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            field_version_id: row.try_get("field_version_id")?,
            field_key: row.try_get("field_key")?,
            version: row.try_get("version")?,
            display_name: row.try_get("display_name")?,
            description: row.try_get("description")?,
            data_type: DataType::parse(row.try_get::<String, _>("data_type")?.as_str())?,
            allowed_operators: operators_column(row, "allowed_operators")?,
            multi_value_allowed: row.try_get("multi_value_allowed")?,
            is_sensitive: row.try_get("is_sensitive")?,
            status: VersionStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
        })
    }
}

impl FieldMetadata {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            field_key: row.try_get("field_key")?,
            meta_key: row.try_get("meta_key")?,
            meta_value: json_column(row, "meta_value")?,
            description: row.try_get("description")?,
        })
    }
}

impl FieldRegistryManifest {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            registry_version: row.try_get("registry_version")?,
            artifact_uri: row.try_get("artifact_uri")?,
            checksum: row.try_get("checksum")?,
            field_count: row.try_get("field_count")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Rule {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            rule_id: row.try_get("rule_id")?,
            rule_name: row.try_get("rule_name")?,
            description: row.try_get("description")?,
            rule_type: RuleType::parse(row.try_get::<String, _>("rule_type")?.as_str())?,
            status: VersionStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
            current_version: row.try_get("current_version")?,
            row_version: row.try_get("row_version")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl RuleVersion {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            rule_version_id: row.try_get("rule_version_id")?,
            rule_id: row.try_get("rule_id")?,
            version: row.try_get("version")?,
            condition_tree: json_column(row, "condition_tree")?,
            scope: json_column(row, "scope")?,
            priority: row.try_get("priority")?,
            action: RuleAction::parse(row.try_get::<String, _>("action")?.as_str())?,
            status: VersionStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
        })
    }
}

impl Ruleset {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            ruleset_id: row.try_get("ruleset_id")?,
            environment: row.try_get("environment")?,
            region: row.try_get("region")?,
            country: row.try_get("country")?,
            rule_type: RuleType::parse(row.try_get::<String, _>("rule_type")?.as_str())?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl RulesetVersion {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            ruleset_version_id: row.try_get("ruleset_version_id")?,
            ruleset_id: row.try_get("ruleset_id")?,
            version: row.try_get("version")?,
            status: VersionStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
            activated_at: row.try_get("activated_at")?,
        })
    }
}

impl Approval {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            approval_id: row.try_get("approval_id")?,
            entity_type: EntityType::parse(row.try_get::<String, _>("entity_type")?.as_str())?,
            entity_id: row.try_get("entity_id")?,
            action: ApprovalAction::parse(row.try_get::<String, _>("action")?.as_str())?,
            status: ApprovalStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
            maker: row.try_get("maker")?,
            checker: row.try_get("checker")?,
            remarks: row.try_get("remarks")?,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get("created_at")?,
            decided_at: row.try_get("decided_at")?,
        })
    }
}

impl AuditEntry {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            audit_id: row.try_get("audit_id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            action: row.try_get("action")?,
            old_value: optional_json_column(row, "old_value")?,
            new_value: optional_json_column(row, "new_value")?,
            performed_by: row.try_get("performed_by")?,
            performed_at: row.try_get("performed_at")?,
        })
    }
}

impl RulesetManifest {
    pub fn from_row(row: &SqliteRow) -> Result<Self, GovernanceError> {
        Ok(Self {
            manifest_id: row.try_get("manifest_id")?,
            environment: row.try_get("environment")?,
            region: row.try_get("region")?,
            country: row.try_get("country")?,
            rule_type: RuleType::parse(row.try_get::<String, _>("rule_type")?.as_str())?,
            ruleset_version: row.try_get("ruleset_version")?,
            ruleset_version_id: row.try_get("ruleset_version_id")?,
            field_registry_version: row.try_get("field_registry_version")?,
            artifact_uri: row.try_get("artifact_uri")?,
            checksum: row.try_get("checksum")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
