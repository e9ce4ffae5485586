// CyberSource Secure Acceptance adapter
//
// Builds and signs the outbound hosted-checkout payload and verifies the
// signature on inbound callbacks. Signing covers exactly the fields listed
// in signed_field_names: the sorted, comma-joined "key=value" message is
// HMAC-SHA256'd with the shared secret and base64-encoded.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use uuid::Uuid;

use crate::orders::Order;

type HmacSha256 = Hmac<Sha256>;

/// Gateway configuration failure
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Missing gateway configuration: {0}")]
    MissingConfig(String),
}

/// One purchased item as it appears in the signed payload
#[derive(Debug, Clone)]
pub struct PayloadLine {
    pub code: String,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Clone)]
pub struct CyberSourceGateway {
    access_key: String,
    security_key: String,
    profile_id: String,
    secure_acceptance_url: String,
    receipt_url: String,
    cancel_url: String,
}

impl CyberSourceGateway {
    pub fn from_env() -> Result<Self, GatewayError> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| GatewayError::MissingConfig(name.to_string()))
        };

        Ok(Self {
            access_key: var("CYBERSOURCE_ACCESS_KEY")?,
            security_key: var("CYBERSOURCE_SECURITY_KEY")?,
            profile_id: var("CYBERSOURCE_PROFILE_ID")?,
            secure_acceptance_url: var("CYBERSOURCE_SECURE_ACCEPTANCE_URL")?,
            receipt_url: var("CHECKOUT_RECEIPT_URL")?,
            cancel_url: var("CHECKOUT_CANCEL_URL")?,
        })
    }

    #[cfg(test)]
    pub fn for_testing(security_key: &str) -> Self {
        Self {
            access_key: "test-access".to_string(),
            security_key: security_key.to_string(),
            profile_id: "test-profile".to_string(),
            secure_acceptance_url: "https://testsecureacceptance.example/pay".to_string(),
            receipt_url: "https://shop.example/receipt".to_string(),
            cancel_url: "https://shop.example/cancel".to_string(),
        }
    }

    pub fn payment_url(&self) -> &str {
        &self.secure_acceptance_url
    }

    pub fn receipt_url(&self) -> &str {
        &self.receipt_url
    }

    /// Build the signed payload for the gateway's hosted payment form.
    pub fn build_payload(
        &self,
        order: &Order,
        reference_number: &str,
        lines: &[PayloadLine],
    ) -> BTreeMap<String, String> {
        let mut payload = BTreeMap::new();

        payload.insert("access_key".to_string(), self.access_key.clone());
        payload.insert("amount".to_string(), order.total_price_paid.to_string());
        payload.insert("currency".to_string(), "USD".to_string());
        payload.insert("locale".to_string(), "en-us".to_string());

        for (i, line) in lines.iter().enumerate() {
            let name = truncate_to_boundary(&line.name, 254);
            payload.insert(format!("item_{i}_code"), line.code.clone());
            payload.insert(format!("item_{i}_name"), name);
            payload.insert(format!("item_{i}_quantity"), line.quantity.to_string());
            payload.insert(format!("item_{i}_sku"), line.sku.clone());
            payload.insert(format!("item_{i}_tax_amount"), "0".to_string());
            payload.insert(format!("item_{i}_unit_price"), line.unit_price.to_string());
        }
        payload.insert("line_item_count".to_string(), lines.len().to_string());

        payload.insert("reference_number".to_string(), reference_number.to_string());
        payload.insert("profile_id".to_string(), self.profile_id.clone());
        payload.insert(
            "signed_date_time".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        payload.insert(
            "override_custom_receipt_page".to_string(),
            self.receipt_url.clone(),
        );
        payload.insert(
            "override_custom_cancel_page".to_string(),
            self.cancel_url.clone(),
        );
        payload.insert("transaction_type".to_string(), "sale".to_string());
        payload.insert(
            "transaction_uuid".to_string(),
            Uuid::new_v4().simple().to_string(),
        );
        payload.insert("unsigned_field_names".to_string(), String::new());

        // signed_field_names lists every field including itself; only the
        // signature stays outside the signed set
        let mut field_names: Vec<String> = payload.keys().cloned().collect();
        field_names.push("signed_field_names".to_string());
        field_names.sort();
        payload.insert("signed_field_names".to_string(), field_names.join(","));

        let signature = self.signature_for(&payload).unwrap_or_default();
        payload.insert("signature".to_string(), signature);

        payload
    }

    /// Verify an inbound callback's signature. Any mismatch, missing field,
    /// or undecodable signature rejects the payload.
    pub fn verify<S: std::hash::BuildHasher>(
        &self,
        payload: &std::collections::HashMap<String, String, S>,
    ) -> bool {
        let received = match payload.get("signature") {
            Some(signature) => signature,
            None => return false,
        };

        let message = match build_signed_message(|k| payload.get(k).map(String::as_str)) {
            Some(message) => message,
            None => return false,
        };

        let mut mac = match HmacSha256::new_from_slice(self.security_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(message.as_bytes());

        let decoded = match BASE64.decode(received) {
            Ok(decoded) => decoded,
            Err(_) => return false,
        };

        // Constant-time comparison
        mac.verify_slice(&decoded).is_ok()
    }

    /// The signature we expect for a callback payload, for diagnostics when
    /// verification fails. Never log the secret itself.
    pub fn expected_signature<S: std::hash::BuildHasher>(
        &self,
        payload: &std::collections::HashMap<String, String, S>,
    ) -> Option<String> {
        let message = build_signed_message(|k| payload.get(k).map(String::as_str))?;
        let mut mac = HmacSha256::new_from_slice(self.security_key.as_bytes()).ok()?;
        mac.update(message.as_bytes());
        Some(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn signature_for(&self, payload: &BTreeMap<String, String>) -> Option<String> {
        let message = build_signed_message(|k| payload.get(k).map(String::as_str))?;
        let mut mac = HmacSha256::new_from_slice(self.security_key.as_bytes()).ok()?;
        mac.update(message.as_bytes());
        Some(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Truncate to at most `max_bytes`, backing up to a character boundary so
/// multi-byte names never split mid-character.
fn truncate_to_boundary(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// The comma-joined "key=value" message over exactly the fields named in
/// signed_field_names. Returns None when signed_field_names or any named
/// field is absent.
fn build_signed_message<'a>(get: impl Fn(&str) -> Option<&'a str>) -> Option<String> {
    let field_names = get("signed_field_names")?;
    let mut parts = Vec::new();
    for name in field_names.split(',') {
        let value = get(name)?;
        parts.push(format!("{name}={value}"));
    }
    Some(parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderKind, OrderStatus};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn test_order() -> Order {
        Order {
            id: 42,
            purchaser_id: 1,
            kind: OrderKind::Standard,
            status: OrderStatus::Created,
            total_price_paid: dec!(100.00),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_line() -> PayloadLine {
        PayloadLine {
            code: "course_run".to_string(),
            name: "Test Course Run".to_string(),
            sku: "course-v1:test".to_string(),
            unit_price: dec!(100.00),
            quantity: 1,
        }
    }

    #[test]
    fn test_signed_message_matches_reference_shape() {
        let mut payload = HashMap::new();
        payload.insert("a".to_string(), "b".to_string());
        payload.insert("c".to_string(), "d".to_string());
        payload.insert("signed_field_names".to_string(), "a,c".to_string());

        let message =
            build_signed_message(|k| payload.get(k).map(String::as_str)).unwrap();
        assert_eq!(message, "a=b,c=d");
    }

    #[test]
    fn test_missing_signed_field_yields_no_message() {
        let mut payload = HashMap::new();
        payload.insert("signed_field_names".to_string(), "a,c".to_string());
        payload.insert("a".to_string(), "b".to_string());

        assert!(build_signed_message(|k| payload.get(k).map(String::as_str)).is_none());
    }

    #[test]
    fn test_outbound_payload_fields() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let payload = gateway.build_payload(&test_order(), "SEATS-test-42", &[test_line()]);

        assert_eq!(payload["amount"], "100.00");
        assert_eq!(payload["currency"], "USD");
        assert_eq!(payload["locale"], "en-us");
        assert_eq!(payload["transaction_type"], "sale");
        assert_eq!(payload["reference_number"], "SEATS-test-42");
        assert_eq!(payload["line_item_count"], "1");
        assert_eq!(payload["item_0_code"], "course_run");
        assert_eq!(payload["item_0_tax_amount"], "0");
        assert_eq!(payload["item_0_unit_price"], "100.00");
        assert_eq!(payload["unsigned_field_names"], "");
        assert!(payload.contains_key("signed_date_time"));
        assert!(payload.contains_key("transaction_uuid"));
        assert!(payload.contains_key("signature"));

        // signed_field_names is sorted, includes itself, excludes signature
        let names: Vec<&str> = payload["signed_field_names"].split(',').collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.contains(&"signed_field_names"));
        assert!(!names.contains(&"signature"));
    }

    #[test]
    fn test_outbound_signature_verifies() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let payload = gateway.build_payload(&test_order(), "SEATS-test-42", &[test_line()]);

        let as_map: HashMap<String, String> = payload.into_iter().collect();
        assert!(gateway.verify(&as_map));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let payload = gateway.build_payload(&test_order(), "SEATS-test-42", &[test_line()]);

        let mut tampered: HashMap<String, String> = payload.into_iter().collect();
        tampered.insert("amount".to_string(), "0.01".to_string());
        assert!(!gateway.verify(&tampered));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = CyberSourceGateway::for_testing("secret");
        let verifier = CyberSourceGateway::for_testing("other-secret");
        let payload = signer.build_payload(&test_order(), "SEATS-test-42", &[test_line()]);

        let as_map: HashMap<String, String> = payload.into_iter().collect();
        assert!(!verifier.verify(&as_map));
    }

    #[test]
    fn test_missing_signature_rejected() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let mut payload: HashMap<String, String> = gateway
            .build_payload(&test_order(), "SEATS-test-42", &[test_line()])
            .into_iter()
            .collect();
        payload.remove("signature");
        assert!(!gateway.verify(&payload));
    }

    #[test]
    fn test_undecodable_signature_rejected() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let mut payload: HashMap<String, String> = gateway
            .build_payload(&test_order(), "SEATS-test-42", &[test_line()])
            .into_iter()
            .collect();
        payload.insert("signature".to_string(), "not base64 !!!".to_string());
        assert!(!gateway.verify(&payload));
    }

    #[test]
    fn test_long_item_name_truncated() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let mut line = test_line();
        line.name = "x".repeat(500);
        let payload = gateway.build_payload(&test_order(), "SEATS-test-42", &[line]);
        assert_eq!(payload["item_0_name"].len(), 254);
    }

    #[test]
    fn test_multibyte_item_name_truncated_on_char_boundary() {
        let gateway = CyberSourceGateway::for_testing("secret");
        let mut line = test_line();
        // The two-byte character straddles the 254-byte cutoff
        line.name = format!("{}é and more", "a".repeat(253));
        let payload = gateway.build_payload(&test_order(), "SEATS-test-42", &[line]);
        assert_eq!(payload["item_0_name"], "a".repeat(253));
    }

    #[test]
    fn test_multibyte_item_name_within_limit_kept_whole() {
        let mut line = test_line();
        line.name = "café".repeat(10);
        assert_eq!(truncate_to_boundary(&line.name, 254), line.name);
    }
}
