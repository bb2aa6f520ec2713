//! Standard field catalog.
//!
//! Field ids 1..26 are reserved for the standard transaction attributes
//! seeded at initialization. Their key, id, and data type never change.

use crate::database::models::{DataType, Operator};

pub struct StandardField {
    pub field_id: i64,
    pub field_key: &'static str,
    pub display_name: &'static str,
    pub data_type: DataType,
    pub allowed_operators: &'static [Operator],
    pub multi_value_allowed: bool,
    pub is_sensitive: bool,
    pub enum_values: Option<&'static [&'static str]>,
}

use DataType::*;
use Operator::*;

const EQUALITY: &[Operator] = &[Eq, Ne, In, NotIn];
const COMPARABLE: &[Operator] = &[Eq, Ne, Gt, Gte, Lt, Lte, Between, In, NotIn];
const TEXTUAL: &[Operator] = &[Eq, Ne, In, NotIn, Contains, NotContains, StartsWith, EndsWith, Regex];

/// The 26 standard fields, in field-id order.
pub fn standard_fields() -> Vec<StandardField> {
    vec![
        StandardField {
            field_id: 1,
            field_key: "transaction_id",
            display_name: "Transaction ID",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 2,
            field_key: "transaction_timestamp",
            display_name: "Transaction Timestamp",
            data_type: Date,
            allowed_operators: &[Gt, Gte, Lt, Lte, Between],
            multi_value_allowed: false,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 3,
            field_key: "amount",
            display_name: "Transaction Amount",
            data_type: Number,
            allowed_operators: COMPARABLE,
            multi_value_allowed: false,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 4,
            field_key: "currency",
            display_name: "Currency Code",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 5,
            field_key: "card_number_hash",
            display_name: "Card Number Hash",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: true,
            enum_values: None,
        },
        StandardField {
            field_id: 6,
            field_key: "card_bin",
            display_name: "Card BIN",
            data_type: String,
            allowed_operators: &[Eq, Ne, In, NotIn, StartsWith],
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 7,
            field_key: "card_last4",
            display_name: "Card Last Four",
            data_type: String,
            allowed_operators: &[Eq, Ne],
            multi_value_allowed: false,
            is_sensitive: true,
            enum_values: None,
        },
        StandardField {
            field_id: 8,
            field_key: "card_network",
            display_name: "Card Network",
            data_type: Enum,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: Some(&["VISA", "MASTERCARD", "AMEX", "RUPAY", "DISCOVER"]),
        },
        StandardField {
            field_id: 9,
            field_key: "card_type",
            display_name: "Card Type",
            data_type: Enum,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: Some(&["CREDIT", "DEBIT", "PREPAID"]),
        },
        StandardField {
            field_id: 10,
            field_key: "merchant_id",
            display_name: "Merchant ID",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 11,
            field_key: "merchant_name",
            display_name: "Merchant Name",
            data_type: String,
            allowed_operators: TEXTUAL,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 12,
            field_key: "merchant_country",
            display_name: "Merchant Country",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 13,
            field_key: "mcc",
            display_name: "Merchant Category Code",
            data_type: String,
            allowed_operators: &[Eq, Ne, In, NotIn, Between, StartsWith],
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 14,
            field_key: "pos_entry_mode",
            display_name: "POS Entry Mode",
            data_type: Enum,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: Some(&["CHIP", "MAGSTRIPE", "CONTACTLESS", "ECOMMERCE", "MANUAL"]),
        },
        StandardField {
            field_id: 15,
            field_key: "billing_address_line1",
            display_name: "Billing Address Line 1",
            data_type: String,
            allowed_operators: &[Eq, Contains, StartsWith],
            multi_value_allowed: false,
            is_sensitive: true,
            enum_values: None,
        },
        StandardField {
            field_id: 16,
            field_key: "billing_city",
            display_name: "Billing City",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 17,
            field_key: "billing_postal_code",
            display_name: "Billing Postal Code",
            data_type: String,
            allowed_operators: &[Eq, Ne, In, NotIn, StartsWith],
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 18,
            field_key: "billing_country",
            display_name: "Billing Country",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 19,
            field_key: "shipping_city",
            display_name: "Shipping City",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 20,
            field_key: "shipping_postal_code",
            display_name: "Shipping Postal Code",
            data_type: String,
            allowed_operators: &[Eq, Ne, In, NotIn, StartsWith],
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 21,
            field_key: "shipping_country",
            display_name: "Shipping Country",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 22,
            field_key: "device_fingerprint",
            display_name: "Device Fingerprint",
            data_type: String,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: true,
            enum_values: None,
        },
        StandardField {
            field_id: 23,
            field_key: "device_ip",
            display_name: "Device IP Address",
            data_type: String,
            allowed_operators: &[Eq, Ne, In, NotIn, StartsWith],
            multi_value_allowed: true,
            is_sensitive: true,
            enum_values: None,
        },
        StandardField {
            field_id: 24,
            field_key: "user_email_domain",
            display_name: "User Email Domain",
            data_type: String,
            allowed_operators: &[Eq, Ne, In, NotIn, EndsWith],
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 25,
            field_key: "is_recurring",
            display_name: "Recurring Transaction",
            data_type: Boolean,
            allowed_operators: &[Eq, Ne],
            multi_value_allowed: false,
            is_sensitive: false,
            enum_values: None,
        },
        StandardField {
            field_id: 26,
            field_key: "auth_result",
            display_name: "Authorization Result",
            data_type: Enum,
            allowed_operators: EQUALITY,
            multi_value_allowed: true,
            is_sensitive: false,
            enum_values: Some(&["APPROVED", "DECLINED", "REFERRAL"]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_six_fields_with_dense_ids() {
        let fields = standard_fields();
        assert_eq!(fields.len(), 26);
        for (i, field) in fields.iter().enumerate() {
            assert_eq!(field.field_id, i as i64 + 1);
        }
    }

    #[test]
    fn keys_are_unique() {
        let fields = standard_fields();
        let mut keys: Vec<&str> = fields.iter().map(|f| f.field_key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 26);
    }

    #[test]
    fn enum_fields_carry_value_sets() {
        for field in standard_fields() {
            match field.data_type {
                DataType::Enum => assert!(field.enum_values.is_some(), "{}", field.field_key),
                _ => assert!(field.enum_values.is_none(), "{}", field.field_key),
            }
        }
    }
}
