use serde_json::{Map, Value};

/// Payload properties that may carry the operation's primary address, in
/// priority order.
pub const PRIMARY_ADDRESS_PROPS: [&str; 14] = [
    "addr",
    "from_addr",
    "caller_addr",
    "owner_addr",
    "miner_address",
    "payer",
    "fee_paying_account",
    "lock_balance_addr",
    "pay_back_owner",
    "bonus_owner",
    "fee_pay_address",
    "publisher_addr",
    "addr_from_claim",
    "issuer_addr",
];

/// The operation's primary address, or an empty string.
///
/// The first candidate property present in the payload decides, even when its
/// value is not a string (which yields an empty address).
pub fn primary_address(payload: &Map<String, Value>) -> String {
    PRIMARY_ADDRESS_PROPS
        .iter()
        .find_map(|prop| payload.get(*prop))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The first of `props` holding a string value.
pub fn first_string<'a>(payload: &'a Map<String, Value>, props: &[&str]) -> Option<&'a str> {
    props
        .iter()
        .find_map(|prop| payload.get(*prop).and_then(Value::as_str))
}
