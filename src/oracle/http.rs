//! HTTP client for the accrual service.
//!
//! `GET {base}/api/orders/{number}` answers 200 with a verdict body, 204 when
//! the order is unknown to the service, and 429 with `Retry-After` when the
//! caller exceeds its rate limit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use tracing::debug;

use super::{AccrualOracle, OracleError, OracleReply};
use crate::config::AccrualConfig;
use crate::models::{AccrualResponse, OrderNumber, Verdict};

/// Largest accrual a `NUMERIC(16, 2)` column holds.
const MAX_ACCRUAL: Decimal = Decimal::from_parts(0x6FC0_FFFF, 0x0023_86F2, 0, false, 2);

/// Decimal places kept for point amounts.
const ACCRUAL_SCALE: u32 = 2;

/// reqwest-backed `AccrualOracle`.
pub struct HttpAccrualClient {
    client: Client,
    base: String,
}

impl HttpAccrualClient {
    /// Create a client with the configured base address and timeout.
    pub fn new(config: &AccrualConfig) -> Result<Self, OracleError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base: normalize_base(&config.address),
        })
    }

    /// Base URL requests are sent to.
    pub fn base(&self) -> &str {
        &self.base
    }

    fn order_url(&self, number: OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base, number)
    }

    fn parse_verdict(number: OrderNumber, body: &[u8]) -> Result<OracleReply, OracleError> {
        let response: AccrualResponse = serde_json::from_slice(body)?;

        if response.order.trim().parse::<i64>().ok() != Some(number.as_i64()) {
            return Err(OracleError::OrderMismatch {
                expected: number,
                got: response.order,
            });
        }

        if let Some(accrual) = response.accrual {
            if accrual < Decimal::ZERO {
                return Err(OracleError::NegativeAccrual(accrual));
            }
            if accrual > MAX_ACCRUAL || accrual.normalize().scale() > ACCRUAL_SCALE {
                return Err(OracleError::AccrualOutOfRange(accrual));
            }
        }

        Ok(OracleReply::Verdict(Verdict::new(
            number,
            response.status,
            response.accrual,
        )))
    }
}

#[async_trait]
impl AccrualOracle for HttpAccrualClient {
    async fn fetch_verdict(&self, number: OrderNumber) -> Result<OracleReply, OracleError> {
        let response = self.client.get(self.order_url(number)).send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.bytes().await?;
                Self::parse_verdict(number, &body)
            }
            StatusCode::NO_CONTENT => Ok(OracleReply::NotReady),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_retry_after);
                debug!(order = %number, ?retry_after, "Accrual service throttled");
                Ok(OracleReply::Throttled { retry_after })
            }
            other => Err(OracleError::UnexpectedStatus(other.as_u16())),
        }
    }
}

/// Prepend `http://` to a bare `host:port` and drop trailing slashes.
fn normalize_base(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// `Retry-After` in delta-seconds form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccrualStatus;
    use rust_decimal_macros::dec;

    fn number() -> OrderNumber {
        OrderNumber::new(79927398713).unwrap()
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("localhost:8080"), "http://localhost:8080");
        assert_eq!(normalize_base("http://accrual:8080/"), "http://accrual:8080");
        assert_eq!(normalize_base(" https://accrual "), "https://accrual");
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_order_url() {
        let client = HttpAccrualClient::new(&AccrualConfig {
            address: "accrual:9000/".to_string(),
            timeout_ms: 100,
        })
        .unwrap();
        assert_eq!(
            client.order_url(number()),
            "http://accrual:9000/api/orders/79927398713"
        );
    }

    #[test]
    fn test_parse_processed_verdict() {
        let body = br#"{"order":"79927398713","status":"PROCESSED","accrual":500}"#;
        let reply = HttpAccrualClient::parse_verdict(number(), body).unwrap();
        assert_eq!(
            reply,
            OracleReply::Verdict(Verdict::processed(number(), dec!(500)))
        );
    }

    #[test]
    fn test_parse_fractional_accrual() {
        let body = br#"{"order":"79927398713","status":"PROCESSED","accrual":729.98}"#;
        let OracleReply::Verdict(verdict) =
            HttpAccrualClient::parse_verdict(number(), body).unwrap()
        else {
            panic!("expected a verdict");
        };
        assert_eq!(verdict.accrual, dec!(729.98));
    }

    #[test]
    fn test_parse_registered_without_accrual() {
        let body = br#"{"order":"79927398713","status":"REGISTERED"}"#;
        let OracleReply::Verdict(verdict) =
            HttpAccrualClient::parse_verdict(number(), body).unwrap()
        else {
            panic!("expected a verdict");
        };
        assert_eq!(verdict.status, AccrualStatus::Registered);
        assert_eq!(verdict.accrual, Decimal::ZERO);
        assert!(!verdict.is_final());
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let body = br#"{"order":"79927398713","status":"LOST"}"#;
        assert!(matches!(
            HttpAccrualClient::parse_verdict(number(), body),
            Err(OracleError::MalformedBody(_))
        ));
    }

    #[test]
    fn test_parse_rejects_other_order() {
        let body = br#"{"order":"12345678903","status":"INVALID"}"#;
        assert!(matches!(
            HttpAccrualClient::parse_verdict(number(), body),
            Err(OracleError::OrderMismatch { .. })
        ));
    }

    #[test]
    fn test_max_accrual_matches_column() {
        assert_eq!(MAX_ACCRUAL, dec!(99999999999999.99));
    }

    #[test]
    fn test_parse_accepts_largest_storable_accrual() {
        let body = br#"{"order":"79927398713","status":"PROCESSED","accrual":"99999999999999.99"}"#;
        let reply = HttpAccrualClient::parse_verdict(number(), body).unwrap();
        assert_eq!(
            reply,
            OracleReply::Verdict(Verdict::processed(number(), dec!(99999999999999.99)))
        );
    }

    #[test]
    fn test_parse_rejects_unstorable_accrual() {
        for body in [
            br#"{"order":"79927398713","status":"PROCESSED","accrual":100000000000000}"#.as_slice(),
            br#"{"order":"79927398713","status":"PROCESSED","accrual":"0.005"}"#.as_slice(),
        ] {
            assert!(matches!(
                HttpAccrualClient::parse_verdict(number(), body),
                Err(OracleError::AccrualOutOfRange(_))
            ));
        }
    }

    #[test]
    fn test_parse_accepts_trailing_zeros() {
        let body = br#"{"order":"79927398713","status":"PROCESSED","accrual":"12.500"}"#;
        let reply = HttpAccrualClient::parse_verdict(number(), body).unwrap();
        assert_eq!(
            reply,
            OracleReply::Verdict(Verdict::processed(number(), dec!(12.5)))
        );
    }

    #[test]
    fn test_parse_rejects_negative_accrual() {
        let body = br#"{"order":"79927398713","status":"PROCESSED","accrual":-5}"#;
        assert!(matches!(
            HttpAccrualClient::parse_verdict(number(), body),
            Err(OracleError::NegativeAccrual(_))
        ));
    }
}
